//! Destinations for normalized articles.
//!
//! # Submodules
//!
//! - [`json`]: Writes each article to its own pretty-printed JSON file
//!
//! Without an output directory the binary falls back to [`LogSink`], which
//! only reports what was retrieved.

pub mod json;

use crate::models::{Article, ArticleRef};
use crate::retriever::ArticleSink;
use crate::utils::truncate_for_log;
use chrono::NaiveDate;
use tracing::info;

/// Logs one line per article.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ArticleSink for LogSink {
    async fn accept(
        &mut self,
        date: NaiveDate,
        position: usize,
        entry: &ArticleRef,
        article: Article,
    ) -> Result<(), std::io::Error> {
        info!(
            %date,
            position,
            url = %entry.url,
            headline = %truncate_for_log(&article.headline, 120),
            blocks = article.body.len(),
            empty_page = article.empty_page,
            "Article retrieved"
        );
        Ok(())
    }
}
