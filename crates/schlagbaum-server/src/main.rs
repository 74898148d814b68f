//! Schlagbaum Server
//!
//! Listens for mutually authenticated clients and drives the gate outputs
//! of the local GPIO chip from their commands.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use schlagbaum_core::config::ServerConfig;
use schlagbaum_core::tracing_init::{default_directive, init_tracing};
use schlagbaum_server::Multiplexer;

#[derive(Parser, Debug)]
#[command(name = "schlagbaum-server")]
#[command(version, about = "Schlagbaum server - mTLS gate command relay")]
struct Args {
    /// TOML configuration file; flags and environment override its values
    #[arg(long, short, env = "SCHLAGBAUM_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "SCHLAGBAUM_BIND")]
    bind: Option<String>,

    /// TCP port to listen on
    #[arg(long, short, env = "SCHLAGBAUM_PORT")]
    port: Option<u16>,

    /// GPIO character device (e.g. /dev/gpiochip0)
    #[arg(long, short, env = "SCHLAGBAUM_DEVICE")]
    device: Option<PathBuf>,

    /// PEM-encoded CA certificate used to verify clients
    #[arg(long, env = "SCHLAGBAUM_CA")]
    ca: Option<PathBuf>,

    /// PEM-encoded server certificate
    #[arg(long, env = "SCHLAGBAUM_CERT")]
    cert: Option<PathBuf>,

    /// PEM-encoded server private key
    #[arg(long, env = "SCHLAGBAUM_KEY")]
    key: Option<PathBuf>,

    /// Maximum concurrent sessions, handshaking ones included
    #[arg(long, env = "SCHLAGBAUM_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Drive outputs active-low
    #[arg(long, env = "SCHLAGBAUM_ACTIVE_LOW")]
    active_low: bool,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "SCHLAGBAUM_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SCHLAGBAUM_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn resolve(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.bind.clone_from(bind);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(device) = &self.device {
            config.gpio.device.clone_from(device);
        }
        if let Some(ca) = &self.ca {
            config.tls.ca.clone_from(ca);
        }
        if let Some(cert) = &self.cert {
            config.tls.cert.clone_from(cert);
        }
        if let Some(key) = &self.key {
            config.tls.key.clone_from(key);
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if self.active_low {
            config.gpio.active_low = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(target_os = "linux")]
fn open_chip(config: &ServerConfig) -> anyhow::Result<schlagbaum_core::lines::cdev::CdevChip> {
    schlagbaum_core::lines::cdev::CdevChip::open(
        &config.gpio.device,
        &config.inputs.lines(),
        &config.outputs.lines(),
        config.gpio.active_low,
    )
    .with_context(|| format!("Cannot open GPIO device {}", config.gpio.device.display()))
}

#[cfg(not(target_os = "linux"))]
fn open_chip(_config: &ServerConfig) -> anyhow::Result<Box<dyn schlagbaum_core::LineChip + Send>> {
    anyhow::bail!("GPIO character devices are only available on Linux")
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
            return;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
            _ = sigterm.recv() => info!("Received SIGTERM shutdown signal"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C shutdown signal");
    }
    shutdown.cancel();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(
        &default_directive("schlagbaum_server", &args.log_level),
        args.log_json,
    );

    let config = args.resolve().context("Invalid configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        port = config.port,
        device = %config.gpio.device.display(),
        max_sessions = config.max_sessions,
        "Starting schlagbaum-server"
    );

    let chip = open_chip(&config)?;
    let server = Multiplexer::bind(&config, chip)
        .await
        .context("Server setup failed")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));
    server.run(shutdown).await?;

    info!("schlagbaum-server stopped");
    Ok(())
}
