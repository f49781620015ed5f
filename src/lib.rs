//! worldtally - Resumable authenticated harvest orchestrator
//!
//! Periodically signs in to a rate-limited platform API, walks a paginated
//! listing across several ordering dimensions, and merges what it finds into
//! one dataset per logical day.
//!
//! # Architecture
//!
//! - [`client`] - HTTP client for the platform API behind the [`client::PlatformApi`] trait
//! - [`auth`] - Session state machine with a step-up challenge and persisted backoff
//! - [`harvest`] - Paginated, rate-limit-aware listing harvest
//! - [`merge`] - Daily dataset upsert, placeholder filter and companion fetch
//! - [`scheduler`] - Single-flight runs, timer and manual triggers, resume marker
//! - [`storage`] - Atomic JSON persistence for datasets and run state
//! - [`analytics`] - Day summaries and cross-run aggregation
//! - [`notifications`] - Run completion hand-off (log or webhook)
//! - [`control`] - HTTP control surface
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use worldtally::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let api = Arc::new(PlatformClient::new(&config.platform)?);
//!     let scheduler = RunScheduler::new(
//!         &config,
//!         api,
//!         Credentials::from_env(),
//!         Arc::new(LogNotifier),
//!     )?;
//!     let report = scheduler.run_now(RunTrigger::Manual).await?;
//!     println!("{:?}", report.record.outcome);
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod auth;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod harvest;
pub mod merge;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::{AuthOutcome, AuthSession, AuthState, AuthStatus};
    pub use crate::client::{PlatformApi, PlatformClient};
    pub use crate::config::{Config, Credentials};
    pub use crate::error::{Error, ErrorCategory, Result, WorldtallyErrorTrait};
    pub use crate::harvest::{HarvestOutcome, PaginatedHarvester};
    pub use crate::merge::DailyDatasetMerger;
    pub use crate::models::{DailyDataset, EntityRecord, RunOutcome, RunRecord, RunTrigger};
    pub use crate::notifications::{LogNotifier, Notifier, RunSummary};
    pub use crate::scheduler::{RunScheduler, RunStatus};
    pub use crate::storage::{DatasetStore, StateStore};
}

// Direct re-exports for convenience
pub use models::{DailyDataset, EntityRecord, RunRecord, RunTrigger};
