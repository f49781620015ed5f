pub mod aggregate;
pub mod run;
pub mod serve;

// Re-export command functions for convenience
pub use aggregate::{aggregate, view};
pub use run::{reset_auth, run_once, status};
pub use serve::serve;

use std::sync::Arc;

use anyhow::{Context, Result};

use worldtally::client::PlatformClient;
use worldtally::config::{Config, Credentials};
use worldtally::notifications::notifier_from_config;
use worldtally::scheduler::RunScheduler;

/// Wire the scheduler from configuration and environment credentials
pub(crate) fn build_scheduler(config: &Config) -> Result<Arc<RunScheduler>> {
    let api = Arc::new(
        PlatformClient::new(&config.platform).context("Failed to build platform client")?,
    );
    let notifier =
        notifier_from_config(&config.notifications).context("Invalid notification settings")?;

    let credentials = Credentials::from_env();
    if !credentials.is_complete() {
        tracing::warn!("WORLDTALLY_USERNAME / WORLDTALLY_PASSWORD are not set; runs will fail");
    }

    RunScheduler::new(config, api, credentials, notifier).context("Failed to initialize scheduler")
}
