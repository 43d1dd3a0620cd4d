//! pgscale daemon - loopback HTTP bridge to engine statistics views.
//!
//! Serves `GET /pgstat/<view>` on 127.0.0.1:1137 by running
//! `select * from <view>` against the embedded DuckDB engine.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pgscale_core::executor::QueryExecutor;
use pgscale_daemon::config::BridgeConfig;
use pgscale_daemon::server::Server;
use pgscale_daemon::storage::{AccessMode, StatsBase, BUILTIN_VIEWS};
use pgscale_daemon::worker::{self, Shutdown};

/// Loopback HTTP bridge to engine statistics views
#[derive(Parser, Debug)]
#[command(name = "pgscale-daemon")]
#[command(about = "Serve engine statistics views over loopback HTTP")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ./pgscale.toml if present)
    #[arg(short, long, env = "PGSCALE_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// DuckDB database file (":memory:" for a private engine)
    #[arg(long)]
    database: Option<String>,

    /// SQL file to run once at startup
    #[arg(long)]
    init_sql: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::discover(&std::env::current_dir()?)?,
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(database) = cli.database {
        config.database.path = database;
    }
    if let Some(init_sql) = cli.init_sql {
        config.database.init_sql = Some(init_sql);
    }

    let stats = open_engine(&config)?;
    let executor: Arc<dyn QueryExecutor> = Arc::new(stats);

    let settings = config.server_settings()?;
    let mut handle = worker::register(config.worker_config(), move |shutdown: Shutdown| {
        let settings = settings.clone();
        let executor = Arc::clone(&executor);
        async move {
            let server = Server::bind(settings, executor)?;
            server.run(shutdown.requested()).await?;
            Ok::<_, anyhow::Error>(())
        }
    });

    let finished = tokio::select! {
        result = handle.join() => Some(result),
        _ = worker::termination_signal() => None,
    };

    match finished {
        Some(result) => result,
        None => {
            info!("Termination signal received, stopping {}", handle.name());
            handle.shutdown();
            handle.join().await
        }
    }
}

fn open_engine(config: &BridgeConfig) -> Result<StatsBase> {
    let db = &config.database;

    let stats = if db.is_in_memory() {
        if db.read_only {
            warn!("read_only has no effect on an in-memory database");
        }
        info!("Opening in-memory statistics engine");
        info!("Built-in views: {}", BUILTIN_VIEWS.join(", "));
        StatsBase::open_in_memory()?
    } else {
        let mode = if db.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        };
        info!("Opening statistics engine at {} ({:?})", db.path, mode);
        StatsBase::open_with_mode(&db.path, mode)?
    };

    if let Some(init_sql) = &db.init_sql {
        info!("Running {:?}", init_sql);
        stats
            .load_sql_file(init_sql)
            .context("Failed to initialize statistics engine")?;
    }

    Ok(stats)
}
