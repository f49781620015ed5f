use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worldtally::analytics::{AggregateOptions, SortBy};
use worldtally::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "worldtally",
    version,
    about = "Resumable, authenticated harvester for platform world listings",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the timer loop and control server until interrupted
    Serve,

    /// Execute one harvest run in the foreground
    Run,

    /// Print scheduler status
    Status,

    /// Clear the persisted authentication backoff
    ResetAuth,

    /// Aggregate every stored day into one report
    Aggregate {
        /// Sort key (avg_load, max_load, occurrences, name)
        #[arg(short, long, default_value = "avg_load")]
        sort_by: SortBy,

        /// Minimum number of days an entity must appear on
        #[arg(short, long, default_value = "1")]
        min_occurrences: usize,

        /// Keep only the first N entities
        #[arg(short, long)]
        top_n: Option<usize>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the analytics view of one stored day
    View {
        /// Day to show (YYYY-MM-DD)
        date: NaiveDate,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "worldtally starting");

    match cli.command {
        Commands::Serve => commands::serve(config).await?,
        Commands::Run => commands::run_once(config).await?,
        Commands::Status => commands::status(config).await?,
        Commands::ResetAuth => commands::reset_auth(config).await?,
        Commands::Aggregate {
            sort_by,
            min_occurrences,
            top_n,
            output,
        } => {
            tracing::info!(
                sort_by = %sort_by,
                min_occurrences,
                top_n = ?top_n,
                "Starting aggregate command"
            );
            let options = AggregateOptions {
                sort_by,
                min_occurrences,
                top_n,
            };
            commands::aggregate(config, options, output).await?;
        }
        Commands::View { date, output } => commands::view(config, date, output).await?,
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("worldtally=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("worldtally={level},warn")))
            .context("Invalid log level")?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
