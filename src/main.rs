//! Reward Ledger Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! reward-ledger
//!
//! # Custom config, port and catalog
//! reward-ledger --config /etc/reward-ledger.toml --http-port 9000 --catalog catalog.toml
//! ```
//!
//! The catalog file is only read when the rule and badge tables are empty.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use reward_ledger::db::catalog::{self, CatalogSeed};
use reward_ledger::services::{events, ledger_service};
use reward_ledger::{Config, HttpServer, LedgerStore, ServiceCalendar, Services, SystemClock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Interval between sweeps of idle per-user locks
const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(name = "reward-ledger")]
#[command(about = "Token reward ledger with streaks, badges and leaderboard")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "REWARD_LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (database and default config)
    #[arg(long, env = "REWARD_LEDGER_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "REWARD_LEDGER_HTTP_PORT")]
    http_port: Option<u16>,

    /// TOML catalog used to seed rules and badges on first start
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reward_ledger=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(path) = args.catalog {
        config.catalog_path = Some(path);
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        timezone_offset_minutes = config.timezone_offset_minutes,
        "Starting reward-ledger"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let store = LedgerStore::open(&config.database_path(), config.pool_size, config.storage_timeout())?;

    let seed = match &config.catalog_path {
        Some(path) => CatalogSeed::load(path)?,
        None => CatalogSeed::builtin(),
    };
    store.run(move |conn| catalog::seed_if_empty(conn, &seed)).await?;

    let calendar = ServiceCalendar::new(Arc::new(SystemClock), config.timezone_offset_minutes)?;
    let services = Arc::new(Services::new(store, calendar, &config));

    let listener = events::spawn_logging_listener(services.events.clone());
    let invalidator = events::spawn_leaderboard_invalidator(services.events.clone(), services.ledger.leaderboard());
    let pruner = ledger_service::spawn_lock_pruner(services.ledger.clone(), LOCK_PRUNE_INTERVAL);

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(HttpServer::new(services.clone(), http_addr));

    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    pruner.abort();
    invalidator.abort();
    listener.abort();

    let users = services
        .ledger
        .store()
        .run(|conn| reward_ledger::db::balances::user_count(conn))
        .await;
    if let Ok(users) = users {
        info!(users, "Final ledger stats");
    }

    Ok(())
}
