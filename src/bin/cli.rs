//! Bilibili update notifier CLI
//!
//! Meant to be run on a schedule; each `scan` is one complete pass.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use notifier::{
    error::Result,
    models::{Config, LoggingConfig},
    pipeline,
    storage::{LocalStateStore, StateStore},
};

/// Watch Bilibili accounts and push updates to Telegram
#[derive(Parser, Debug)]
#[command(name = "notifier", version, about = "Bilibili update notifier")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "notifier.toml")]
    config: PathBuf,

    /// Override the state file location
    #[arg(long)]
    state: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every entity once and send notifications
    Scan,

    /// Validate configuration and environment
    Validate,

    /// Show the stored state
    Info,
}

/// Initialize logging based on verbosity flag.
///
/// Without `RUST_LOG` the filter admits everything and the global max level
/// gates output, so the configured level can still be applied later.
fn init_logging(verbose: bool) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .format_timestamp_secs()
        .init();
    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
    }
}

/// Apply the configured level unless `--verbose` or `RUST_LOG` decided it.
fn apply_log_level(verbose: bool, logging: &LoggingConfig) {
    if verbose || std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    match logging.level_filter() {
        Some(filter) => log::set_max_level(filter),
        None => log::warn!("Unknown log level '{}', keeping info", logging.level),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    config.apply_env();
    if let Some(state) = cli.state {
        config.paths.state_file = state;
    }
    apply_log_level(cli.verbose, &config.logging);

    match cli.command {
        Command::Scan => {
            config.validate()?;
            log::info!("Tracking {} entities", config.entities.len());

            let report = pipeline::run_scan(&config).await?;
            log::info!(
                "Scan finished in {}s: {} notified, {} failed, {} skipped",
                (report.end_time - report.start_time).num_seconds(),
                report.notified_count,
                report.failed_count,
                report.skipped_count
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "✓ Config OK ({} entities, detector {:?}, merge {:?})",
                config.entities.len(),
                config.detector.kind,
                config.merge
            );
        }

        Command::Info => {
            let store = LocalStateStore::new(&config.paths.state_file, config.detector.kind);
            log::info!("State file: {}", store.path().display());

            if store.path().exists() {
                let state = store.load().await;
                log::info!("Entities with a watermark: {}", state.entity_count());
                for entity in &config.entities {
                    let watermark = state.watermark(&entity.id, config.detector.kind);
                    log::info!("  {}: {:?}", entity.display_name(), watermark);
                }
            } else {
                log::info!("No state recorded yet.");
            }
        }
    }

    Ok(())
}
