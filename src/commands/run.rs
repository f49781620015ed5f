use anyhow::{Context, Result};

use worldtally::config::Config;
use worldtally::models::{RunOutcome, RunTrigger};

use super::build_scheduler;

/// Execute a single run in the foreground
pub async fn run_once(config: Config) -> Result<()> {
    let scheduler = build_scheduler(&config)?;
    let report = scheduler
        .run_now(RunTrigger::Manual)
        .await
        .context("Run refused")?;

    let record = &report.record;
    println!("Run {} finished: {}", record.id, record.outcome.as_str());
    println!("  Harvested: {}", record.entities_harvested);
    println!("  Had errors: {}", record.had_errors);

    if let Some(summary) = &report.summary {
        println!("  Date: {}", summary.date);
        println!("  Entities stored: {}", summary.entities);
        println!("  Companions stored: {}", summary.companions);
        println!("  Average load: {:.2}", summary.day_stats.avg_load);
        if let Some(day) = summary.report_due {
            println!("  Report due for: {day}");
        }
    }

    match record.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::ChallengePending => {
            println!("A challenge code is required; submit it through the control server.");
            Ok(())
        }
        RunOutcome::Failed => anyhow::bail!(
            "Run failed: {}",
            record.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Print scheduler status as JSON
pub async fn status(config: Config) -> Result<()> {
    let scheduler = build_scheduler(&config)?;
    let status = scheduler.status();
    println!(
        "{}",
        serde_json::to_string_pretty(&status).context("Failed to encode status")?
    );
    Ok(())
}

/// Clear the persisted authentication backoff
pub async fn reset_auth(config: Config) -> Result<()> {
    let scheduler = build_scheduler(&config)?;
    scheduler
        .reset_retry_state()
        .await
        .context("Failed to reset retry state")?;
    println!("Authentication retry state reset");
    Ok(())
}
