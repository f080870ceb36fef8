//! Skiff - ship log lines to a remote receiver
//!
//! Reads lines from standard input, batches them, and ships them over a
//! framed TCP/TLS connection with at-least-once delivery. Acknowledged
//! progress is persisted by the registrar so a restart can resume
//! without re-shipping what the server already has.
//!
//! # Usage
//!
//! ```bash
//! # Ship with defaults (localhost:5043, plain TCP)
//! tail -F /var/log/syslog | skiff
//!
//! # With a config file
//! skiff --config /etc/skiff/skiff.toml
//!
//! # Validate a config without starting
//! skiff --config /etc/skiff/skiff.toml --config-test
//! ```

mod harvest;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skiff_config::Config;
use skiff_publisher::{Publisher, Registrar, Spooler};
use skiff_transport::TcpTransport;

use crate::harvest::LineHarvester;

/// Config paths tried when none is given
const DEFAULT_CONFIG_PATHS: &[&str] = &["skiff.toml", "/etc/skiff/skiff.toml"];

/// How long each task gets to finish after the shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Skiff - ship log lines to a remote receiver with at-least-once delivery
#[derive(Parser, Debug)]
#[command(name = "skiff", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    config_test: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = load_config(cli.config.as_deref())?;

    if cli.config_test {
        println!("Configuration OK");
        return Ok(());
    }

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or_else(|| config.log.level.as_str());
    init_logging(level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(defaults)".into()),
        "skiff starting"
    );

    run(config, config_path).await
}

/// Load the configuration: an explicit path must exist, otherwise the
/// default locations are tried before falling back to built-in defaults
fn load_config(explicit: Option<&std::path::Path>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = Config::from_file(path).context("failed to load configuration")?;
        return Ok((config, Some(path.to_path_buf())));
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(candidate);
        if path.exists() {
            let config = Config::from_file(&path).context("failed to load configuration")?;
            return Ok((config, Some(path)));
        }
    }

    Ok((Config::default(), None))
}

/// Initialize the tracing subscriber
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}

/// Wire the pipeline and run it until a shutdown signal
async fn run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let cancel = CancellationToken::new();

    // stdin → spooler → publisher → registrar
    let (event_tx, event_rx) = mpsc::channel(64);
    let (batch_tx, batch_rx) = mpsc::channel(1);
    let (registrar_tx, registrar_rx) = mpsc::channel(128);
    let (reload_tx, reload_rx) = watch::channel(config.network.clone());

    let transport =
        TcpTransport::new(config.network.clone()).context("failed to initialize the transport")?;

    let registrar = Registrar::new(&config.general.persist_dir, registrar_rx);
    let publisher = Publisher::new(
        config.network.clone(),
        Box::new(transport),
        batch_rx,
        registrar_tx,
        cancel.clone(),
    )
    .with_reload(reload_rx);
    let spooler = Spooler::new(&config.spool, event_rx, batch_tx, cancel.clone());
    let harvester = LineHarvester::stdin(event_tx, cancel.clone());

    let registrar_task = tokio::spawn(registrar.run());
    let publisher_task = tokio::spawn(publisher.run());
    let spooler_task = tokio::spawn(spooler.run());
    let harvester_task = tokio::spawn(harvester.run());

    spawn_reload_handler(config_path, reload_tx);

    info!(
        servers = ?config.network.servers,
        transport = config.network.transport.as_str(),
        "skiff running"
    );

    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();

    // Stop the pipeline front to back so each stage can flush into the
    // next before it goes away
    for (name, task) in [("harvester", harvester_task), ("spooler", spooler_task)] {
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
            warn!(task = name, "did not stop within the shutdown timeout");
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, publisher_task).await {
        Ok(Ok(snapshot)) => {
            info!(
                batches = snapshot.batches_received,
                payloads = snapshot.payloads_sent,
                events_confirmed = snapshot.events_confirmed,
                retransmits = snapshot.retransmits,
                reconnects = snapshot.reconnects,
                "publisher finished"
            );
        }
        Ok(Err(error)) => error!(%error, "publisher task panicked"),
        Err(_) => warn!("publisher did not drain within the shutdown timeout"),
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, registrar_task)
        .await
        .is_err()
    {
        warn!("registrar did not stop within the shutdown timeout");
    }

    info!("skiff shutdown complete");
    Ok(())
}

/// Reload the configuration on SIGHUP, handing the new network section
/// to the publisher (applied at its next reconnect)
#[cfg(unix)]
fn spawn_reload_handler(
    config_path: Option<PathBuf>,
    reload: watch::Sender<skiff_config::NetworkConfig>,
) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(error) => {
                warn!(%error, "failed to install SIGHUP handler, reload disabled");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            let Some(path) = &config_path else {
                warn!("SIGHUP: no config file to reload");
                continue;
            };
            match Config::from_file(path) {
                Ok(config) => {
                    let _ = reload.send(config.network);
                    info!(config = %path.display(), "SIGHUP: configuration reloaded");
                }
                Err(error) => {
                    error!(%error, "SIGHUP: reload failed, keeping the running configuration");
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_handler(
    _config_path: Option<PathBuf>,
    _reload: watch::Sender<skiff_config::NetworkConfig>,
) {
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
