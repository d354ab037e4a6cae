//! News vendor strategies.
//!
//! A [`Vendor`] knows everything site specific: where a day's archive lives,
//! which time zone its calendar runs in, which hosts redirects may reach,
//! which session cookies it needs and how to parse its pages. The
//! [`Retriever`](crate::retriever::Retriever) drives any of them through the
//! same cache/fetch/parse pipeline.
//!
//! # Supported vendors
//!
//! | Vendor | Module | Archive |
//! |--------|--------|---------|
//! | `wsj` | [`wsj`] | `online.wsj.com/public/page/archive-Y-m-d.html` |
//! | `bloomberg` | [`bloomberg`] | `www.bloomberg.com/archive/news/Y-m-d/` |
//! | `reuters` | [`reuters`] | `www.reuters.com/resources/archive/us/Ymd.html` |

pub mod bloomberg;
pub mod reuters;
pub mod wsj;

use crate::cookies::{CookiePolicy, CookieSet};
use crate::error::ParseError;
use crate::models::{Article, DailyIndex};
use crate::version::ProcessorVersion;
use chrono::NaiveDate;
use chrono_tz::Tz;
use url::Url;

pub trait Vendor: Send + Sync {
    /// Short identifier used in cache topics, state keys and logs.
    fn name(&self) -> &'static str;

    /// Version of the site layout the parsers were written against.
    fn website_version(&self) -> &str;

    fn processor_version(&self) -> &ProcessorVersion;

    /// Zone in which the vendor's archive days begin and end.
    fn timezone(&self) -> Tz;

    fn daily_index_url(&self, date: NaiveDate) -> String;

    fn parse_daily_index(&self, content: &str, date: NaiveDate) -> Result<DailyIndex, ParseError>;

    fn parse_article(&self, url: &str, content: &str) -> Result<Article, ParseError>;

    /// Names of the session cookies to collect from redirect responses;
    /// `None` for vendors without a session.
    fn cookie_policy(&self) -> Option<&CookiePolicy> {
        None
    }

    /// Headers sent with every request.
    fn extra_headers(&self, cookies: &CookieSet) -> Vec<(String, String)> {
        if self.cookie_policy().is_some() && !cookies.is_empty() {
            vec![("Cookie".to_string(), cookies.header_value())]
        } else {
            Vec::new()
        }
    }

    /// Whether a redirect may lead to `target`.
    fn allows_redirect(&self, target: &Url) -> bool;
}

/// `true` if `url` is served from `domain` or one of its subdomains.
pub fn within_domain(url: &Url, domain: &str) -> bool {
    matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some_and(|host| {
            host == domain
                || host
                    .strip_suffix(domain)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
}

/// Look up a vendor by its [`Vendor::name`].
pub fn vendor_by_name(name: &str) -> Option<Box<dyn Vendor>> {
    match name {
        wsj::NAME => Some(Box::new(wsj::Wsj::new())),
        bloomberg::NAME => Some(Box::new(bloomberg::Bloomberg::new())),
        reuters::NAME => Some(Box::new(reuters::Reuters::new())),
        _ => None,
    }
}
