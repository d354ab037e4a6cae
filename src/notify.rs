//! Operator notifications.
//!
//! When a day's retrieval fails, a plain-text summary is published to a
//! pub/sub topic. Delivery is best effort:
//! [`ErrorJournal::notify`](crate::journal::ErrorJournal::notify) logs
//! failures and moves on.
//!
//! # Notifiers
//!
//! | Notifier | Delivery |
//! |----------|----------|
//! | [`LogNotifier`] | Emits the message as an `error!` event only |
//! | [`WebhookNotifier`] | POSTs `{"subject", "message"}` as JSON to an HTTP endpoint |

use crate::error::NotifyError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, instrument};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), NotifyError>;
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), NotifyError> {
        error!(%subject, %message, "Operator notification");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    message: &'a str,
}

/// Notifier posting to an HTTP pub/sub endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(level = "info", skip_all, fields(endpoint = %self.endpoint, %subject))]
    async fn publish(&self, subject: &str, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&WebhookPayload { subject, message })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        info!("Notification delivered");
        Ok(())
    }
}
