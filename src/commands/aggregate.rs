use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use worldtally::analytics::{self, AggregateOptions};
use worldtally::config::Config;
use worldtally::storage::DatasetStore;

/// Aggregate every stored day and write the report
pub async fn aggregate(
    config: Config,
    options: AggregateOptions,
    output: Option<PathBuf>,
) -> Result<()> {
    let dir = config.storage.daily_dir();
    let report = analytics::aggregate(&dir, &options)
        .with_context(|| format!("Failed to aggregate datasets in {}", dir.display()))?;

    let json = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
    write_output(&json, output.as_ref())?;

    eprintln!(
        "Aggregated {} entities from {} files ({} data points)",
        report.entities.len(),
        report.data_files,
        report.data_points
    );
    Ok(())
}

/// Print the analytics view of one day
pub async fn view(config: Config, date: NaiveDate, output: Option<PathBuf>) -> Result<()> {
    let store = DatasetStore::open(&config.storage.daily_dir());
    let dataset = store
        .load(date)?
        .with_context(|| format!("No dataset stored for {date}"))?;

    let view = analytics::analytics_view(&dataset);
    let json = serde_json::to_string_pretty(&view).context("Failed to encode view")?;
    write_output(&json, output.as_ref())
}

fn write_output(json: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
