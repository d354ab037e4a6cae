//! Per-day retrieval state machine.
//!
//! A day runs strictly in order: daily index (raw, then processed), then each
//! listed article (raw, then processed), handing every article to an
//! [`ArticleSink`] as soon as it is available. Every stage consults the
//! [`ContentCache`] first:
//!
//! | Stage | Partition | Reuse rule | Durability |
//! |-------|-----------|------------|------------|
//! | raw index | `YYYY/MM/DD-` | fetched after the day's cutoff | standard |
//! | processed index | `YYYY/MM/DD-` | processed after the cutoff, same version | reduced |
//! | raw article | `YYYY/MM/DD/` | always | standard |
//! | processed article | `YYYY/MM/DD/` | same version | reduced |
//!
//! The cutoff is 00:15 on the following day in the vendor's time zone: an
//! index fetched before then may still have been growing.
//!
//! Failures end the day. Outside test mode they are written to the
//! [`ErrorJournal`], announced through its notifier and reported as
//! [`RunOutcome::Failed`]; in test mode they are returned as errors.

use crate::cache::{
    CacheEntry, ContentCache, ContentType, Cutoff, Durability, LOCAL_DATE, PROCESSED_TIME, PROCESSOR_VERSION,
    RETRIEVAL_TIME, URL, WEBSITE_VERSION,
};
use crate::cookies::{CookieSet, CookieStore, parse_set_cookie};
use crate::error::{FetchError, RedirectError, RetrieveError, error_chain};
use crate::fetch::{FetchResponse, Fetcher};
use crate::journal::{ErrorJournal, ErrorRecord, error_topic};
use crate::models::{Article, ArticleRef, DailyIndex};
use crate::state::{StateStore, last_processed_date_key};
use crate::utils::{article_partition, index_partition, iso_millis};
use crate::vendors::Vendor;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// Minutes past the following local midnight before a day's index is final.
const CUTOFF_GRACE_MINUTES: i64 = 15;

/// Receives processed articles in index order.
pub trait ArticleSink {
    async fn accept(
        &mut self,
        date: NaiveDate,
        position: usize,
        entry: &ArticleRef,
        article: Article,
    ) -> Result<(), std::io::Error>;
}

impl ArticleSink for Vec<Article> {
    async fn accept(
        &mut self,
        _date: NaiveDate,
        _position: usize,
        _entry: &ArticleRef,
        article: Article,
    ) -> Result<(), std::io::Error> {
        self.push(article);
        Ok(())
    }
}

/// Sink that drops every article.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ArticleSink for Discard {
    async fn accept(
        &mut self,
        _date: NaiveDate,
        _position: usize,
        _entry: &ArticleRef,
        _article: Article,
    ) -> Result<(), std::io::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { articles: usize },
    /// The day failed and was journaled; `error` is the rendered cause chain.
    Failed { error: String },
}

/// Counters from one [`Retriever::cleanup_status`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Records from older processor versions, deleted.
    pub pruned: usize,
    /// Records already replayed by the current patch.
    pub skipped: usize,
    /// Days that now succeed; their records are deleted.
    pub resolved: usize,
    /// Days that still fail; their records are tagged with the current patch.
    pub still_failing: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrieverOptions {
    /// Propagate failures instead of journaling them, and leave the
    /// last-processed marker untouched.
    pub test_mode: bool,
    pub max_redirects: usize,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            test_mode: false,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    DailyIndex,
    Article,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Raw,
    Processed,
}

pub struct Retriever<'v> {
    vendor: &'v dyn Vendor,
    cache: ContentCache,
    fetcher: Arc<dyn Fetcher>,
    cookies: CookieStore,
    state: StateStore,
    journal: ErrorJournal,
    options: RetrieverOptions,
}

impl std::fmt::Debug for Retriever<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("vendor", &self.vendor.name())
            .field("cache", &self.cache)
            .field("options", &self.options)
            .finish()
    }
}

impl<'v> Retriever<'v> {
    pub fn new(
        vendor: &'v dyn Vendor,
        cache: ContentCache,
        fetcher: Arc<dyn Fetcher>,
        cookies: CookieStore,
        state: StateStore,
        journal: ErrorJournal,
        options: RetrieverOptions,
    ) -> Self {
        Self {
            vendor,
            cache,
            fetcher,
            cookies,
            state,
            journal,
            options,
        }
    }

    pub fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    fn topic(&self, kind: Kind, stage: Stage) -> String {
        let kind = match kind {
            Kind::DailyIndex => "daily_index",
            Kind::Article => "article",
        };
        let stage = match stage {
            Stage::Raw => "raw",
            Stage::Processed => "processed",
        };
        format!("{}:{kind}:{stage}", self.vendor.name())
    }

    fn local_midnight(&self, date: NaiveDate) -> Result<DateTime<Utc>, RetrieveError> {
        let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| RetrieveError::Date(format!("no midnight on {date}")))?;
        self.vendor
            .timezone()
            .from_local_datetime(&naive)
            .earliest()
            .map(|ts| ts.with_timezone(&Utc))
            .ok_or_else(|| RetrieveError::Date(format!("midnight of {date} does not exist in {}", self.vendor.timezone())))
    }

    /// Instant after which a daily index for `date` is considered complete.
    pub fn cache_cutoff(&self, date: NaiveDate) -> Result<DateTime<Utc>, RetrieveError> {
        let next = date
            .succ_opt()
            .ok_or_else(|| RetrieveError::Date(format!("no day after {date}")))?;
        Ok(self.local_midnight(next)? + ChronoDuration::minutes(CUTOFF_GRACE_MINUTES))
    }

    fn version_tag(&self) -> &str {
        &self.vendor.processor_version().version
    }

    /// Fetch `url`, following redirects within the vendor's allowlist and
    /// collecting session cookies set along the way.
    #[instrument(level = "debug", skip(self), fields(vendor = self.vendor.name()))]
    pub async fn fetch_following_redirects(&mut self, url: &str) -> Result<FetchResponse, RetrieveError> {
        let vendor = self.vendor;
        let mut current = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let mut pending = CookieSet::new();

        for hop in 0..=self.options.max_redirects {
            let headers = vendor.extra_headers(self.cookies.current());
            let response = self.fetcher.fetch(current.as_str(), &headers).await?;

            if !response.is_redirect() {
                if response.is_success() {
                    return Ok(response);
                }
                return Err(FetchError::Status {
                    url: current.to_string(),
                    status: response.status,
                }
                .into());
            }

            let target = response
                .header("location")
                .and_then(|location| current.join(location).ok())
                .ok_or_else(|| RedirectError::MissingLocation {
                    from: current.to_string(),
                })?;
            if !vendor.allows_redirect(&target) {
                return Err(RedirectError::Disallowed {
                    from: current.to_string(),
                    to: target.to_string(),
                }
                .into());
            }

            if let Some(policy) = vendor.cookie_policy() {
                let set = parse_set_cookie(response.header_values("set-cookie"), policy);
                if !set.is_empty() {
                    pending.merge(&set);
                    if policy.is_complete(&pending) {
                        self.cookies.update(pending.clone()).await?;
                    }
                }
            }

            info!(hop, status = response.status, from = %current, to = %target, "Following redirect");
            current = target;
        }

        Err(RedirectError::TooManyRedirects {
            url: url.to_string(),
            count: self.options.max_redirects,
        }
        .into())
    }

    /// Raw daily index HTML for `date`.
    #[instrument(level = "info", skip(self), fields(vendor = self.vendor.name()))]
    pub async fn retrieve_daily_index(&mut self, date: NaiveDate) -> Result<String, RetrieveError> {
        let url = self.vendor.daily_index_url(date);
        let topic = self.topic(Kind::DailyIndex, Stage::Raw);
        let partition = index_partition(date);
        let cutoff = self.cache_cutoff(date)?;

        if let Some(entry) = self
            .cache
            .lookup(&topic, &partition, &url, Some(Cutoff::new(cutoff, RETRIEVAL_TIME)))
            .await?
        {
            debug!(%url, "Using cached daily index");
            return Ok(String::from_utf8_lossy(&entry.content).into_owned());
        }

        let response = self.fetch_following_redirects(&url).await?;
        let metadata = self.raw_metadata(Kind::DailyIndex, &url, date);
        self.cache
            .store(&topic, &partition, &url, &response.body, ContentType::Html, metadata, Durability::Standard)
            .await?;
        Ok(response.text())
    }

    /// Parsed daily index for `date`.
    #[instrument(level = "info", skip(self), fields(vendor = self.vendor.name()))]
    pub async fn retrieve_processed_daily_index(&mut self, date: NaiveDate) -> Result<DailyIndex, RetrieveError> {
        let url = self.vendor.daily_index_url(date);
        let topic = self.topic(Kind::DailyIndex, Stage::Processed);
        let partition = index_partition(date);
        let cutoff = self.cache_cutoff(date)?;

        let cached = self
            .cache
            .lookup(&topic, &partition, &url, Some(Cutoff::new(cutoff, PROCESSED_TIME)))
            .await?;
        if let Some(index) = self.reusable::<DailyIndex>(cached, &url) {
            return Ok(index);
        }

        let raw = self.retrieve_daily_index(date).await?;
        let index = self.vendor.parse_daily_index(&raw, date)?;
        info!(%date, articles = index.articles.len(), "Processed daily index");
        self.store_processed(Kind::DailyIndex, &partition, &url, date, &index).await?;
        Ok(index)
    }

    /// Raw article HTML. Raw articles never expire.
    #[instrument(level = "debug", skip(self), fields(vendor = self.vendor.name()))]
    pub async fn retrieve_article(&mut self, url: &str, date: NaiveDate) -> Result<String, RetrieveError> {
        let topic = self.topic(Kind::Article, Stage::Raw);
        let partition = article_partition(date);

        if let Some(entry) = self.cache.lookup(&topic, &partition, url, None).await? {
            debug!(%url, "Using cached article");
            return Ok(String::from_utf8_lossy(&entry.content).into_owned());
        }

        let response = self.fetch_following_redirects(url).await?;
        let metadata = self.raw_metadata(Kind::Article, url, date);
        self.cache
            .store(&topic, &partition, url, &response.body, ContentType::Html, metadata, Durability::Standard)
            .await?;
        Ok(response.text())
    }

    /// Parsed article; reprocessed whenever the cached copy was produced by
    /// another processor version.
    #[instrument(level = "debug", skip(self), fields(vendor = self.vendor.name()))]
    pub async fn retrieve_processed_article(&mut self, url: &str, date: NaiveDate) -> Result<Article, RetrieveError> {
        let topic = self.topic(Kind::Article, Stage::Processed);
        let partition = article_partition(date);

        let cached = self.cache.lookup(&topic, &partition, url, None).await?;
        if let Some(article) = self.reusable::<Article>(cached, url) {
            return Ok(article);
        }

        let raw = self.retrieve_article(url, date).await?;
        let article = self
            .vendor
            .parse_article(url, &raw)
            .map_err(|source| RetrieveError::Article {
                url: url.to_string(),
                source,
            })?;
        self.store_processed(Kind::Article, &partition, url, date, &article).await?;
        Ok(article)
    }

    /// Decode a processed entry if the running processor version may reuse it.
    fn reusable<T: serde::de::DeserializeOwned>(&self, entry: Option<CacheEntry>, url: &str) -> Option<T> {
        let entry = entry?;
        let cached_version = entry.meta(PROCESSOR_VERSION);
        if !self.vendor.processor_version().accepts_cached(cached_version) {
            debug!(%url, cached = ?cached_version, current = %self.version_tag(), "Processed entry needs reprocessing");
            return None;
        }
        match serde_json::from_slice(&entry.content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%url, error = %e, "Discarding undecodable processed entry");
                None
            }
        }
    }

    /// `url`, plus the vendor-local date for daily indexes.
    fn entry_metadata(kind: Kind, url: &str, date: NaiveDate) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::from([(URL.to_string(), url.to_string())]);
        if let Kind::DailyIndex = kind {
            metadata.insert(LOCAL_DATE.to_string(), date.to_string());
        }
        metadata
    }

    fn raw_metadata(&self, kind: Kind, url: &str, date: NaiveDate) -> BTreeMap<String, String> {
        let mut metadata = Self::entry_metadata(kind, url, date);
        metadata.insert(RETRIEVAL_TIME.to_string(), iso_millis(Utc::now()));
        metadata.insert(WEBSITE_VERSION.to_string(), self.vendor.website_version().to_string());
        metadata
    }

    async fn store_processed<T: Serialize>(
        &self,
        kind: Kind,
        partition: &str,
        url: &str,
        date: NaiveDate,
        value: &T,
    ) -> Result<(), RetrieveError> {
        let topic = self.topic(kind, Stage::Processed);
        let body = serde_json::to_vec(value)?;
        let mut metadata = Self::entry_metadata(kind, url, date);
        metadata.insert(PROCESSED_TIME.to_string(), iso_millis(Utc::now()));
        metadata.insert(PROCESSOR_VERSION.to_string(), self.version_tag().to_string());
        self.cache
            .store(&topic, partition, url, &body, ContentType::Json, metadata, Durability::Reduced)
            .await?;
        Ok(())
    }

    /// Process one day end to end.
    ///
    /// With `record_date`, the day is stored as the vendor's last processed
    /// date before any work starts (skipped in test mode).
    #[instrument(level = "info", skip(self, sink), fields(vendor = self.vendor.name()))]
    pub async fn retrieve<S: ArticleSink>(
        &mut self,
        date: NaiveDate,
        record_date: bool,
        sink: &mut S,
    ) -> Result<RunOutcome, RetrieveError> {
        let started = Instant::now();
        match self.run_day(date, record_date, sink).await {
            Ok(articles) => {
                info!(%date, articles, elapsed_ms = started.elapsed().as_millis() as u64, "Day complete");
                Ok(RunOutcome::Completed { articles })
            }
            Err(e) => {
                let chain = error_chain(&e);
                error!(%date, error = %chain, "Day failed");
                if self.options.test_mode {
                    return Err(e);
                }
                let version = self.vendor.processor_version();
                if let Err(journal_err) = self
                    .journal
                    .record(&error_topic(self.vendor.name()), date, &version.version, version.patch)
                    .await
                {
                    error!(%date, error = %journal_err, "Failed to journal failed day");
                }
                let subject = format!("{} retrieval failed for {date}", self.vendor.name());
                let summary = format!(
                    "vendor: {}\ndate: {date}\nprocessor version: {}\nprocessor patch: {}\nelapsed: {:.1}s\n\n{chain}\n",
                    self.vendor.name(),
                    version.version,
                    version.patch,
                    started.elapsed().as_secs_f64(),
                );
                self.journal.notify(&subject, &summary).await;
                Ok(RunOutcome::Failed { error: chain })
            }
        }
    }

    async fn run_day<S: ArticleSink>(
        &mut self,
        date: NaiveDate,
        record_date: bool,
        sink: &mut S,
    ) -> Result<usize, RetrieveError> {
        if record_date && !self.options.test_mode {
            let key = last_processed_date_key(self.vendor.name(), self.version_tag());
            self.state.put_string(&key, &date.to_string()).await?;
        }

        let index = self.retrieve_processed_daily_index(date).await?;
        for (position, entry) in index.articles.iter().enumerate() {
            let article = self.retrieve_processed_article(&entry.url, date).await?;
            debug!(position, url = %entry.url, headline = %article.headline, "Article ready");
            sink.accept(date, position, entry, article).await?;
        }
        Ok(index.articles.len())
    }

    /// Day after the last one recorded for this vendor and processor
    /// version, if any.
    pub async fn next_date(&self) -> Result<Option<NaiveDate>, RetrieveError> {
        let key = last_processed_date_key(self.vendor.name(), self.version_tag());
        let Some(value) = self.state.get_string(&key).await? else {
            return Ok(None);
        };
        let last: NaiveDate = value
            .parse()
            .map_err(|e| RetrieveError::Date(format!("malformed last processed date {value:?}: {e}")))?;
        last.succ_opt()
            .map(Some)
            .ok_or_else(|| RetrieveError::Date(format!("no day after {last}")))
    }

    /// Replay journaled failures with the current processor.
    ///
    /// Records from older processor versions are deleted, records already
    /// replayed by the current patch are left alone, and every other day is
    /// retried without moving the last-processed marker. Running it twice in
    /// a row does no work the second time.
    #[instrument(level = "info", skip(self, sink), fields(vendor = self.vendor.name()))]
    pub async fn cleanup_status<S: ArticleSink>(&mut self, sink: &mut S) -> Result<CleanupReport, RetrieveError> {
        let version = self.vendor.processor_version().clone();
        let topic = error_topic(self.vendor.name());
        let mut report = CleanupReport::default();

        let kept = self
            .journal
            .prune(&topic, |record| {
                let stale = version.cmp_version(&record.processor_version) == Ordering::Greater;
                report.pruned += usize::from(stale);
                stale
            })
            .await?;

        for record in kept {
            if record.fix_patch.is_some_and(|patch| patch >= version.patch) {
                debug!(date = %record.date, fix_patch = ?record.fix_patch, "Already replayed by this patch");
                report.skipped += 1;
                continue;
            }
            info!(date = %record.date, "Replaying failed day");
            match self.retrieve(record.date, false, sink).await {
                Ok(RunOutcome::Completed { .. }) => {
                    self.journal.resolve(&record).await?;
                    report.resolved += 1;
                }
                Ok(RunOutcome::Failed { .. }) => {
                    self.mark_replayed(&record, version.patch).await?;
                    report.still_failing += 1;
                }
                Err(e) => {
                    self.mark_replayed(&record, version.patch).await?;
                    return Err(e);
                }
            }
        }

        info!(
            pruned = report.pruned,
            skipped = report.skipped,
            resolved = report.resolved,
            still_failing = report.still_failing,
            "Cleanup finished"
        );
        Ok(report)
    }

    async fn mark_replayed(&self, record: &ErrorRecord, patch: u32) -> Result<(), RetrieveError> {
        self.journal.mark_potentially_fixed(record, patch).await?;
        Ok(())
    }
}
