//! Run-completion hand-off
//!
//! After a successful run the scheduler passes a [`RunSummary`] to the
//! configured [`Notifier`]. Delivery is best-effort: failures are logged by
//! the caller and never change the run outcome.
//!
//! ```text
//! RunScheduler ──RunSummary──▶ Notifier
//!                                ├── LogNotifier      (default)
//!                                └── WebhookNotifier  (notifications.webhook_url)
//! ```

pub mod webhook;

pub use webhook::{WebhookConfig, WebhookNotifier};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::DayStats;
use crate::config::NotificationConfig;
use crate::models::RunRecord;

/// Errors that can occur while delivering a summary
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid notifier configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Receiver answered with a non-success status
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// What a finished run hands to the notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run: RunRecord,
    /// Logical day the run merged into
    pub date: NaiveDate,
    pub entities: usize,
    pub companions: usize,
    pub day_stats: DayStats,
    /// Previous day whose dataset is now complete and due for a report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_due: Option<NaiveDate>,
}

/// Receives run summaries
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn on_run_completed(&self, summary: &RunSummary) -> Result<(), NotifyError>;
}

/// Writes the summary to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_run_completed(&self, summary: &RunSummary) -> Result<(), NotifyError> {
        tracing::info!(
            run_id = %summary.run.id,
            trigger = %summary.run.trigger,
            date = %summary.date,
            entities = summary.entities,
            companions = summary.companions,
            avg_load = summary.day_stats.avg_load,
            had_errors = summary.run.had_errors,
            report_due = ?summary.report_due,
            "Run completed"
        );
        Ok(())
    }
}

/// Build the notifier selected by configuration
pub fn notifier_from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match &config.webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(WebhookConfig::new(url.clone()))?;
            Ok(Arc::new(webhook))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
