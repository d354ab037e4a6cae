//! # News Archiver
//!
//! Retrieves one vendor's daily news archive, normalizes every listed article
//! into a structured document and caches both the raw HTML and the processed
//! form, so a later run with a newer parser only re-parses.
//!
//! ## Usage
//!
//! ```sh
//! news_archiver --vendor wsj                      # resume after the last processed day
//! news_archiver --vendor wsj --date 2013-08-25    # one explicit day
//! news_archiver --vendor wsj --cleanup            # replay journaled failures
//! ```
//!
//! ## Architecture
//!
//! 1. **Index**: fetch (or reuse) the day's archive page and list its articles
//! 2. **Articles**: fetch (or reuse) each article, following redirects and
//!    collecting session cookies
//! 3. **Parse**: normalize each page; unknown markup fails the day
//! 4. **Output**: hand articles to the JSON writer in index order
//!
//! Failed days land in the error journal and are retried by `--cleanup`.

use chrono::{NaiveDate, Utc};
use clap::Parser;
use news_archiver::cache::ContentCache;
use news_archiver::cli::Cli;
use news_archiver::config::Config;
use news_archiver::cookies::CookieStore;
use news_archiver::fetch::HttpFetcher;
use news_archiver::journal::ErrorJournal;
use news_archiver::notify::{LogNotifier, Notifier, WebhookNotifier};
use news_archiver::outputs::LogSink;
use news_archiver::outputs::json::JsonDirSink;
use news_archiver::retriever::{ArticleSink, Retriever, RetrieverOptions, RunOutcome};
use news_archiver::state::StateStore;
use news_archiver::storage::FsObjectStore;
use news_archiver::storage::table::JsonFileTable;
use news_archiver::utils::ensure_writable_dir;
use news_archiver::vendors::{Vendor, vendor_by_name};
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_archiver starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let Some(vendor) = vendor_by_name(&args.vendor) else {
        error!(vendor = %args.vendor, "Unknown vendor");
        return Err(format!("unknown vendor '{}' (expected wsj, bloomberg or reuters)", args.vendor).into());
    };
    let config = Config::load(&args.config).await?;

    // ---- Storage and collaborators ----
    let cache = ContentCache::new(
        Arc::new(FsObjectStore::new(&config.cache.root)),
        config.cache.prefix.clone(),
        config.cache.write_policy(),
    );
    let table = Arc::new(JsonFileTable::new(&config.state.path));
    let state = StateStore::new(table.clone());
    let cookies = CookieStore::load(state.clone()).await?;
    let fetcher = Arc::new(HttpFetcher::new(&config.http.user_agent, config.http.timeout())?);

    let notifier: Option<Arc<dyn Notifier>> = match (config.notify.enabled, &config.notify.webhook_url) {
        (false, _) => None,
        (true, Some(url)) => Some(Arc::new(WebhookNotifier::new(url.clone())?) as Arc<dyn Notifier>),
        (true, None) => Some(Arc::new(LogNotifier) as Arc<dyn Notifier>),
    };
    let journal = ErrorJournal::new(table, notifier);

    let mut retriever = Retriever::new(
        vendor.as_ref(),
        cache,
        fetcher,
        cookies,
        state,
        journal,
        RetrieverOptions {
            test_mode: args.test_mode,
            ..Default::default()
        },
    );

    // ---- Run ----
    match &config.output_dir {
        Some(dir) => {
            if let Err(e) = ensure_writable_dir(dir).await {
                error!(path = %dir, error = %e, "Output directory is not writable (fix perms or choose a different path)");
                return Err(e.into());
            }
            let mut sink = JsonDirSink::new(dir, vendor.name());
            run(&mut retriever, vendor.as_ref(), &args, &mut sink).await?;
            info!(written = sink.written(), "JSON output complete");
        }
        None => run(&mut retriever, vendor.as_ref(), &args, &mut LogSink).await?,
    }

    info!(elapsed_secs = start_time.elapsed().as_secs_f64(), "news_archiver finished");
    Ok(())
}

async fn run<S: ArticleSink>(
    retriever: &mut Retriever<'_>,
    vendor: &dyn Vendor,
    args: &Cli,
    sink: &mut S,
) -> Result<(), Box<dyn Error>> {
    if args.cleanup {
        let report = retriever.cleanup_status(sink).await?;
        info!(?report, "Cleanup complete");
        return Ok(());
    }

    let date = match args.date {
        Some(date) => date,
        None => match retriever.next_date().await? {
            Some(date) => date,
            None => yesterday(vendor)?,
        },
    };
    info!(vendor = vendor.name(), %date, version = %vendor.processor_version(), "Retrieving day");

    match retriever.retrieve(date, true, sink).await? {
        RunOutcome::Completed { articles } => info!(%date, articles, "Day retrieved"),
        RunOutcome::Failed { error } => warn!(%date, %error, "Day failed and was journaled"),
    }
    Ok(())
}

/// The day before today in the vendor's time zone.
fn yesterday(vendor: &dyn Vendor) -> Result<NaiveDate, Box<dyn Error>> {
    let today = Utc::now().with_timezone(&vendor.timezone()).date_naive();
    today.pred_opt().ok_or_else(|| format!("no day before {today}").into())
}
