//! Webhook notifier
//!
//! POSTs the [`RunSummary`] as JSON. Failed deliveries are retried on the
//! standard doubling curve; the run id travels in `X-Worldtally-Run` so a
//! receiver can drop duplicates.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Notifier, NotifyError, RunSummary};
use crate::utils::retry::{with_retry, ClassBackoff};

/// Webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retry attempts on failure
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_ms(mut self, retry_base_ms: u64) -> Self {
        self.retry_base_ms = retry_base_ms;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Sends run summaries to an HTTP endpoint
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        config.validate().map_err(NotifyError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn post_once(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.config.url)
            .header("X-Worldtally-Event", "run_completed")
            .header("X-Worldtally-Run", summary.run.id.to_string())
            .json(summary)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        anyhow::bail!("HTTP {status}: {body}")
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn on_run_completed(&self, summary: &RunSummary) -> Result<(), NotifyError> {
        let backoff = ClassBackoff::new(self.config.retry_base_ms, 30_000, 2.0);

        let send = || self.post_once(summary);

        match with_retry(&backoff, self.config.max_retries, send).await {
            Ok(()) => {
                tracing::info!(
                    url = %self.config.url,
                    run_id = %summary.run.id,
                    "Run summary delivered"
                );
                Ok(())
            }
            Err(e) => Err(NotifyError::Rejected(e.to_string())),
        }
    }
}
