use std::sync::Arc;

use anyhow::{Context, Result};

use worldtally::config::Config;
use worldtally::control::ControlServer;
use worldtally::metrics;

use super::build_scheduler;

/// Run the timer loop and the control server until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    let scheduler = build_scheduler(&config)?;
    let timer_loop = tokio::spawn(Arc::clone(&scheduler).start());

    let server = ControlServer::new(config.server.clone(), Arc::clone(&scheduler));
    let stopper = Arc::clone(&scheduler);
    server
        .start_with_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown requested");
            stopper.shutdown();
        })
        .await
        .context("Control server failed")?;

    scheduler.shutdown();
    timer_loop.await.context("Scheduler task failed")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
