//! Single-request HTTP fetching.
//!
//! A [`Fetcher`] performs exactly one request and reports the status, the
//! headers and the body. It never follows redirects: the retriever inspects
//! each 3xx itself so it can check the target against the vendor allowlist
//! and pick up session cookies along the way.

use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::time::Duration;
use tracing::{debug, instrument};

/// Response to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names are lowercase; repeated headers keep one entry each.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of header `name` (case-insensitive), in response order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<FetchResponse, FetchError>;
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<FetchResponse, FetchError> {
        let parsed = url::Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let mut request = self.client.get(parsed);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let transport = |source: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(transport)?.to_vec();

        debug!(status, bytes = body.len(), "Fetched");
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new("news_archiver-test", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_sends_extra_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/archive"))
            .and(header("Cookie", "djcs_auto=X; djcs_perm=Y"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let headers = vec![("Cookie".to_string(), "djcs_auto=X; djcs_perm=Y".to_string())];
        let response = fetcher()
            .fetch(&format!("{}/archive", server.uri()), &headers)
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.text(), "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_fetch_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "/next")
                    .append_header("Set-Cookie", "djcs_auto=X; path=/")
                    .append_header("Set-Cookie", "djcs_perm=Y; path=/"),
            )
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(&format!("{}/start", server.uri()), &[])
            .await
            .unwrap();

        assert!(response.is_redirect());
        assert_eq!(response.header("location"), Some("/next"));
        assert_eq!(response.header_values("Set-Cookie").count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let err = fetcher().fetch("not a url", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = FetchResponse {
            status: 301,
            headers: vec![("location".to_string(), "http://online.wsj.com/b".to_string())],
            body: Vec::new(),
        };
        assert_eq!(response.header("Location"), Some("http://online.wsj.com/b"));
        assert!(response.is_redirect());
        assert!(!response.is_success());
    }
}
