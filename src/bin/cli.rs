//! Listing Watcher CLI
//!
//! Local execution entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use listing_watcher::{
    error::Result,
    models::Config,
    pipeline::Monitor,
    services::{DiscordWebhook, HtmlListingScraper},
    storage::{LocalSnapshotStore, SnapshotStore},
    utils::log as display,
};
use tokio::sync::oneshot;

/// Listing Watcher - new listing announcer
#[derive(Parser, Debug)]
#[command(
    name = "listing-watcher",
    version,
    about = "Watches a listing page and announces new listings"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Override the snapshot file location
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll forever until Ctrl-C
    Run,

    /// Run a single cycle and exit
    Once,

    /// Validate the configuration
    Validate,

    /// Show the stored snapshot
    Info {
        /// Number of tracked listings to print
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Delete the stored snapshot; the next cycle is a cold start
    Reset,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Resolve config from file, environment and flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(&cli.config)?;
    config.apply_env();
    if let Some(path) = &cli.state_file {
        config.storage.state_file = path.clone();
    }
    Ok(config)
}

async fn build_monitor(config: &Config) -> Result<Monitor> {
    config.validate()?;

    let source = Arc::new(HtmlListingScraper::new(&config.scraper)?);
    let sink = Arc::new(DiscordWebhook::new(&config.notifier)?);
    let store = Arc::new(LocalSnapshotStore::new(&config.storage.state_file));

    Ok(Monitor::open(config, source, sink, store).await)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    log::debug!("Using config {}", cli.config.display());

    match cli.command {
        Command::Run => {
            let monitor = build_monitor(&config).await?;

            let (tx, rx) = oneshot::channel::<()>();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => log::info!("Ctrl-C received, finishing current cycle"),
                    Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
                }
                let _ = tx.send(());
            });

            monitor
                .run(async {
                    let _ = rx.await;
                })
                .await;
            log::info!("Listing watcher stopped");
        }

        Command::Once => {
            let mut monitor = build_monitor(&config).await?;
            let report = monitor.run_cycle().await?;
            display::summary(
                "Cycle",
                &[
                    ("fetched", report.fetched.to_string()),
                    ("new", report.new_listings.to_string()),
                    ("suppressed", report.suppressed.to_string()),
                    ("removed", report.removed.to_string()),
                    ("delivered", report.delivered.to_string()),
                    ("failed", report.failed.to_string()),
                    ("persisted", report.persisted.to_string()),
                ],
            );
        }

        Command::Validate => {
            config.validate()?;
            display::summary(
                "Configuration OK",
                &[
                    ("url", config.scraper.url.clone()),
                    ("interval", format!("{}s", config.monitor.interval_secs)),
                    ("min listings", config.monitor.min_listings.to_string()),
                    (
                        "cold start",
                        if config.monitor.backfill_on_cold_start {
                            "backfill".to_string()
                        } else {
                            "suppress".to_string()
                        },
                    ),
                    ("state file", config.storage.state_file.display().to_string()),
                ],
            );
        }

        Command::Info { limit } => {
            let store = LocalSnapshotStore::new(&config.storage.state_file);
            let Some(snapshot) = store.try_load().await? else {
                log::info!("No snapshot at {}, next cycle is a cold start", store.location());
                return Ok(());
            };

            let updated = snapshot
                .updated_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            display::summary(
                "Snapshot",
                &[
                    ("path", store.location()),
                    ("updated", updated),
                    ("tracked", snapshot.len().to_string()),
                ],
            );
            for entry in snapshot.listings.iter().take(limit) {
                log::info!("  - {} ({})", entry.title, entry.identity);
            }
            if snapshot.len() > limit {
                log::info!("  ... and {} more", snapshot.len() - limit);
            }
        }

        Command::Reset => {
            let store = LocalSnapshotStore::new(&config.storage.state_file);
            if store.clear().await? {
                log::info!("Removed snapshot at {}", store.location());
            } else {
                log::info!("No snapshot at {}", store.location());
            }
        }
    }

    Ok(())
}
