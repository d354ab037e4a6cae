//! JSON output of normalized articles.
//!
//! Files are organized by vendor and archive day, numbered in index order:
//! ```text
//! output_dir/
//! └── wsj/
//!     └── 2013-08-25/
//!         ├── 000-fed-holds-rates.json
//!         └── 001-markets-rally.json
//! ```

use crate::models::{Article, ArticleRef};
use crate::retriever::ArticleSink;
use crate::utils::slugify_title;
use chrono::NaiveDate;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Longest slug kept in a file name.
const MAX_SLUG: usize = 60;

/// Writes every accepted article as pretty JSON below `root/vendor`.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    root: PathBuf,
    vendor: String,
    written: usize,
}

impl JsonDirSink {
    pub fn new(root: impl Into<PathBuf>, vendor: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            vendor: vendor.into(),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Path of the file for the article at `position` of `date`'s index.
    pub fn article_path(&self, date: NaiveDate, position: usize, title: &str) -> PathBuf {
        let mut slug = slugify_title(title);
        if slug.is_empty() {
            slug.push_str("untitled");
        }
        let slug: String = slug.chars().take(MAX_SLUG).collect();
        self.day_dir(date)
            .join(format!("{position:03}-{}.json", slug.trim_end_matches('-')))
    }

    fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(&self.vendor).join(date.to_string())
    }
}

impl ArticleSink for JsonDirSink {
    #[instrument(level = "info", skip_all, fields(%date, position, url = %entry.url))]
    async fn accept(
        &mut self,
        date: NaiveDate,
        position: usize,
        entry: &ArticleRef,
        article: Article,
    ) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(&article)?;

        let dir = self.day_dir(date);
        if let Err(e) = fs::create_dir_all(&dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e);
        }

        let title = if article.headline.is_empty() {
            &entry.title
        } else {
            &article.headline
        };
        let path = self.article_path(date, position, title);
        fs::write(&path, json).await?;
        self.written += 1;
        info!(path = %path.display(), "Wrote article JSON");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2013, 8, 25).unwrap()
    }

    #[test]
    fn test_article_path_layout() {
        let sink = JsonDirSink::new("/out", "wsj");
        assert_eq!(
            sink.article_path(day(), 7, "Fed Holds Rates, Again!"),
            PathBuf::from("/out/wsj/2013-08-25/007-fed-holds-rates-again.json")
        );
        assert_eq!(
            sink.article_path(day(), 0, "???"),
            PathBuf::from("/out/wsj/2013-08-25/000-untitled.json")
        );
    }

    #[tokio::test]
    async fn test_accept_writes_pretty_json() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonDirSink::new(dir.path(), "bloomberg");
        let entry = ArticleRef {
            url: "http://www.bloomberg.com/news/a.html".to_string(),
            title: "Index Title".to_string(),
            summary: None,
            published_at: None,
        };
        let article = Article {
            url: entry.url.clone(),
            headline: "Stocks Rise".to_string(),
            ..Default::default()
        };

        sink.accept(day(), 1, &entry, article.clone()).await.unwrap();

        let path = sink.article_path(day(), 1, "Stocks Rise");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n  \"url\""), "{written}");
        let decoded: Article = serde_json::from_str(&written).unwrap();
        assert_eq!(decoded, article);
        assert_eq!(sink.written(), 1);
    }
}
