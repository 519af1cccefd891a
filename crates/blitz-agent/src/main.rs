//! # blitz-agent
//!
//! Blitz daemon binary: loads settings, wires the host sources into the
//! server, starts one poller per enabled source, and runs until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use blitz_core::SnapshotSource;
use blitz_host::{
    ArtworkResolver, BluetoothctlSource, NmcliWifiSource, PlayerctlSource, ProcessExecutor,
    ProcessRunner, TokioProcessRunner,
};
use blitz_server::config::ServerConfig;
use blitz_server::dispatch::{CommandDispatcher, CommandTable};
use blitz_server::poller::spawn_snapshot_poller;
use blitz_server::server::BlitzServer;
use blitz_settings::{BlitzSettings, PollerEntry};
use clap::Parser;
use tracing::{info, warn};

/// Blitz remote-control daemon.
#[derive(Parser, Debug)]
#[command(name = "blitz", about = "Blitz remote-control daemon")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Directory of static web assets; empty disables (overrides settings).
    #[arg(long)]
    static_dir: Option<String>,

    /// Settings file (default `~/.blitz/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply flags on top of file and environment settings.
    fn apply(&self, settings: &mut BlitzSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.static_dir {
            settings.server.static_dir.clone_from(dir);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Sources paired with their poller settings.
fn pollers(
    settings: &BlitzSettings,
    media: Arc<dyn SnapshotSource>,
    runner: &Arc<dyn ProcessRunner>,
) -> Result<Vec<(Arc<dyn SnapshotSource>, PollerEntry)>> {
    let bluetooth = BluetoothctlSource::new(Arc::clone(runner))
        .context("Failed to build bluetooth battery parser")?;
    Ok(vec![
        (media, settings.pollers.media),
        (Arc::new(bluetooth), settings.pollers.bluetooth),
        (
            Arc::new(NmcliWifiSource::new(Arc::clone(runner))),
            settings.pollers.wifi,
        ),
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load settings early (needed for log level before logging init)
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(blitz_settings::settings_path);
    let mut settings = blitz_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);

    blitz_core::logging::init_subscriber(&settings.logging.level);
    info!(path = %settings_path.display(), "settings loaded");

    let metrics_handle = match blitz_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    let config = ServerConfig::from(&settings.server);
    let runner: Arc<dyn ProcessRunner> =
        Arc::new(TokioProcessRunner::new(config.command_timeout()));
    let media: Arc<dyn SnapshotSource> = Arc::new(PlayerctlSource::new(
        Arc::clone(&runner),
        ArtworkResolver::default(),
    ));

    let table = CommandTable::new(&settings.apps);
    info!(apps = ?table.app_names(), "command table built");
    let dispatcher = CommandDispatcher::new(
        table,
        Arc::new(ProcessExecutor::new(Arc::clone(&runner))),
        config.command_timeout(),
    )
    .with_media_source(Arc::clone(&media));

    let mut server = BlitzServer::new(config, dispatcher);
    if let Some(handle) = metrics_handle {
        server = server.with_metrics(handle);
    }

    let (addr, server_task) = server
        .listen()
        .await
        .context("Failed to bind server listener")?;
    info!(%addr, "blitz ready");

    let shutdown = Arc::clone(server.shutdown());
    shutdown.track(server_task);

    for (source, entry) in pollers(&settings, media, &runner)? {
        let kind = source.kind().as_str();
        if !entry.enabled {
            info!(source = kind, "poller disabled");
            continue;
        }
        let handle = spawn_snapshot_poller(
            source,
            Arc::clone(server.hub()),
            Duration::from_millis(entry.interval_ms),
            shutdown.token(),
        )
        .with_context(|| format!("Failed to start {kind} poller"))?;
        shutdown.track(handle);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    shutdown.graceful_shutdown(None).await;
    info!("blitz stopped");
    Ok(())
}
