//! `chimed`, the Chime scheduling daemon.
//!
//! Usage:
//!   chimed [-c <config-path>] [--data-dir <dir>]
//!
//! Runs the schedule module's background sweepers over an embedded SQLite
//! store until interrupted.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use chime_sql::{SQLStore, SqliteStore};
use schedule::ScheduleModule;
use schedule::worker::SweepConfig;

use config::ServerConfig;

/// Chime scheduling daemon.
#[derive(Parser, Debug)]
#[command(name = "chimed", about = "Chime scheduling daemon")]
struct Cli {
    /// Path to the config file.
    #[arg(short = 'c', long = "config", default_value = "/etc/chime/chimed.toml")]
    config: PathBuf,

    /// Data directory (overrides the config file).
    #[arg(long = "data-dir")]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    // Load server configuration.
    info!("Loading configuration from {}", cli.config.display());
    let mut server_config = ServerConfig::load(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        server_config.storage.data_dir = dir;
    }

    // Initialize storage.
    std::fs::create_dir_all(&server_config.storage.data_dir)?;
    let sqlite_path = server_config.resolve_sqlite_path();
    let sql: Arc<dyn SQLStore> = Arc::new(
        SqliteStore::open(&sqlite_path)
            .map_err(|e| anyhow::anyhow!("failed to open SQL store: {}", e))?,
    );

    // Initialize the schedule module; this starts the sweepers.
    let sweep_config = SweepConfig {
        due_check_interval: server_config.sweep.due_check_interval_secs,
        recurrence_interval: server_config.sweep.recurrence_interval_secs,
    };
    let module = ScheduleModule::with_config(sql, sweep_config)?;
    info!("Schedule module initialized");
    info!("chimed running (sqlite at {})", sqlite_path.display());

    // Run until interrupted.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    module.shutdown();

    Ok(())
}
