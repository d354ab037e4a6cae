//! YAML configuration.
//!
//! Every field has a default, so a missing file or an empty document yields a
//! working local setup: a filesystem cache under `./cache`, state in
//! `./state.json`, notifications logged only.
//!
//! ```yaml
//! cache:
//!   root: /var/lib/news_archiver/cache
//!   prefix: archive/
//!   write_timeout_ms: 5000
//! state:
//!   path: /var/lib/news_archiver/state.json
//! notify:
//!   webhook_url: https://hooks.example.com/news
//! http:
//!   user_agent: news_archiver/0.1
//! output_dir: ./articles
//! ```

use crate::cache::WritePolicy;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub state: StateConfig,
    pub notify: NotifyConfig,
    pub http: HttpConfig,
    /// Directory receiving each normalized article as JSON.
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory backing the object store.
    pub root: String,
    /// Prefix of every object key.
    pub prefix: String,
    pub write_timeout_ms: u64,
    pub max_write_attempts: u32,
    pub retry_jitter_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let policy = WritePolicy::default();
        Self {
            root: "cache".to_string(),
            prefix: String::new(),
            write_timeout_ms: policy.attempt_timeout.as_millis() as u64,
            max_write_attempts: policy.max_attempts,
            retry_jitter_ms: policy.max_jitter.as_millis() as u64,
        }
    }
}

impl CacheConfig {
    pub fn write_policy(&self) -> WritePolicy {
        WritePolicy {
            attempt_timeout: Duration::from_millis(self.write_timeout_ms),
            max_attempts: self.max_write_attempts.max(1),
            max_jitter: Duration::from_millis(self.retry_jitter_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON file holding cookies, last processed dates and error records.
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: "state.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub enabled: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("news_archiver/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Parse a YAML document; `origin` names it in errors.
    pub fn from_yaml(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        match tokio::fs::read_to_string(path).await {
            Ok(yaml) => {
                let config = Self::from_yaml(&yaml, &shown)?;
                info!(path = %shown, "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %shown, "Config file not found; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read { path: shown, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let yaml = r#"
cache:
  root: /data/cache
  write_timeout_ms: 1000
notify:
  webhook_url: https://hooks.example.com/news
  enabled: false
output_dir: ./articles
"#;
        let config = Config::from_yaml(yaml, "inline").unwrap();
        assert_eq!(config.cache.root, "/data/cache");
        assert_eq!(config.cache.max_write_attempts, 4);
        assert_eq!(config.cache.write_policy().attempt_timeout, Duration::from_secs(1));
        assert_eq!(config.state.path, "state.json");
        assert_eq!(config.notify.webhook_url.as_deref(), Some("https://hooks.example.com/news"));
        assert!(!config.notify.enabled);
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.output_dir.as_deref(), Some("./articles"));
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Config::from_yaml("  \n", "inline").unwrap(), Config::default());
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let err = Config::from_yaml("cache: [1, 2", "broken.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "broken.yaml"), "{err:?}");
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "http:\n  user_agent: test-agent\n  timeout_secs: 5\n").unwrap();
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.http.user_agent, "test-agent");
        assert_eq!(config.http.timeout(), Duration::from_secs(5));
    }
}
