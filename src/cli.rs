//! Command-line interface definitions for the archiver.
//!
//! All arguments can be provided via command-line flags or environment variables.

use chrono::NaiveDate;
use clap::Parser;

/// Command-line arguments for one archiver run.
///
/// # Examples
///
/// ```sh
/// # Resume WSJ from the last processed day
/// news_archiver --vendor wsj
///
/// # Reprocess one Bloomberg day, failing loudly
/// news_archiver --vendor bloomberg --date 2013-09-01 --test-mode
///
/// # Replay journaled failures with the current parser
/// news_archiver --vendor wsj --cleanup
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Vendor to retrieve (wsj, bloomberg or reuters)
    #[arg(short, long, env = "NEWS_VENDOR")]
    pub vendor: String,

    /// Archive day (YYYY-MM-DD); defaults to the day after the last one processed
    #[arg(short, long, env = "NEWS_DATE")]
    pub date: Option<NaiveDate>,

    /// Path to config.yaml file
    #[arg(short, long, env = "NEWS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Replay journaled failures instead of retrieving a day
    #[arg(long)]
    pub cleanup: bool,

    /// Propagate failures instead of journaling them; never moves the resume marker
    #[arg(long, env = "NEWS_TEST_MODE")]
    pub test_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["news_archiver", "--vendor", "wsj", "--date", "2013-08-25"]);

        assert_eq!(cli.vendor, "wsj");
        assert_eq!(cli.date, NaiveDate::from_ymd_opt(2013, 8, 25));
        assert_eq!(cli.config, "config.yaml");
        assert!(!cli.cleanup);
        assert!(!cli.test_mode);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["news_archiver", "-v", "bloomberg", "-c", "/etc/news.yaml", "--cleanup"]);

        assert_eq!(cli.vendor, "bloomberg");
        assert_eq!(cli.date, None);
        assert_eq!(cli.config, "/etc/news.yaml");
        assert!(cli.cleanup);
    }

    #[test]
    fn test_cli_rejects_bad_date() {
        assert!(Cli::try_parse_from(["news_archiver", "--vendor", "wsj", "--date", "25/08/2013"]).is_err());
    }
}
