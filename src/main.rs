//! emberkv server binary
//!
//! Loads the TOML configuration, initializes logging, builds the keyspace
//! and the optional append-only log writer, and runs the TLS server until
//! SIGINT, then shuts down with a five-second deadline.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use emberkv::config::{Config, LogConfig};
use emberkv::persistence::AolWriter;
use emberkv::server::Server;
use emberkv::storage::Keyspace;

/// How long shutdown waits for live connections to drain.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "emberkv")]
#[command(version)]
#[command(about = "In-memory key-value database server over TLS")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "emberkv.toml")]
    config: PathBuf,

    /// Enable debug logging regardless of the config file
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from(&cli.config)?;
    if cli.debug {
        config.log.debug = true;
    }

    init_logging(&config.log)?;
    for warning in config.validate()? {
        warn!("{warning}");
    }
    info!(version = emberkv::VERSION, config = %cli.config.display(), "starting emberkv");

    let keyspace = Arc::new(Keyspace::new());
    let aol = if config.server.persistent_aof_path.is_empty() {
        None
    } else {
        let writer = AolWriter::open(
            &config.server.persistent_aof_path,
            config.server.aof_fsync_every_write,
        )
        .context("failed to open the append-only log")?;
        info!(path = %config.server.persistent_aof_path, "persistence enabled");
        Some(Arc::new(writer))
    };

    let address = config.server.address.clone();
    let server = Arc::new(Server::new(config, keyspace, aol)?);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let runner = Arc::clone(&server);
    let mut accept_loop = tokio::spawn(async move { runner.run(listener).await });

    tokio::select! {
        result = &mut accept_loop => {
            // The accept loop only returns early on a fatal error.
            result.context("accept loop panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, shutting down");
            if let Err(e) = server.shutdown(SHUTDOWN_DEADLINE).await {
                error!(error = %e, "forced shutdown");
            }
        }
    }

    info!("server exiting");
    Ok(())
}

/// Configures the global tracing subscriber from `[log]`.
fn init_logging(log: &LogConfig) -> Result<()> {
    let level = if log.debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);

    if log.file.is_empty() {
        builder.init();
    } else {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log.file)
            .with_context(|| format!("failed to open log file {}", log.file))?;
        builder.with_writer(Arc::new(file)).with_ansi(false).init();
    }
    Ok(())
}
