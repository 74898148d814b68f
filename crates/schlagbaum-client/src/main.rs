//! Schlagbaum Client
//!
//! Connects to the server over mutual TLS. With `--command` it sends the
//! given commands and exits; otherwise it forwards local button edges and
//! mirrors server commands on the local status outputs.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use schlagbaum_client::{ClientSession, interactive};
use schlagbaum_core::command::Command;
use schlagbaum_core::config::ClientConfig;
use schlagbaum_core::tracing_init::{default_directive, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "schlagbaum-client")]
#[command(version, about = "Schlagbaum client - mTLS gate command relay")]
struct Args {
    /// TOML configuration file; flags and environment override its values
    #[arg(long, short = 'f', env = "SCHLAGBAUM_CONFIG")]
    config: Option<PathBuf>,

    /// Server host name or address
    #[arg(long, short = 'H', env = "SCHLAGBAUM_HOST")]
    host: Option<String>,

    /// Server TCP port
    #[arg(long, short, env = "SCHLAGBAUM_PORT")]
    port: Option<u16>,

    /// Name expected in the server certificate (defaults to the host)
    #[arg(long, env = "SCHLAGBAUM_SERVER_NAME")]
    server_name: Option<String>,

    /// GPIO character device (e.g. /dev/gpiochip0)
    #[arg(long, short, env = "SCHLAGBAUM_DEVICE")]
    device: Option<PathBuf>,

    /// PEM-encoded CA certificate used to verify the server
    #[arg(long, env = "SCHLAGBAUM_CA")]
    ca: Option<PathBuf>,

    /// PEM-encoded client certificate
    #[arg(long, env = "SCHLAGBAUM_CERT")]
    cert: Option<PathBuf>,

    /// PEM-encoded client private key
    #[arg(long, env = "SCHLAGBAUM_KEY")]
    key: Option<PathBuf>,

    /// Drive outputs active-low
    #[arg(long, env = "SCHLAGBAUM_ACTIVE_LOW")]
    active_low: bool,

    /// Command to send (repeatable); selects scripted mode
    #[arg(long = "command", short = 'c', value_name = "COMMAND")]
    commands: Vec<Command>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "SCHLAGBAUM_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SCHLAGBAUM_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn resolve(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = &self.server_name {
            config.server_name = Some(name.clone());
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
        if self.active_low {
            config.gpio.active_low = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(target_os = "linux")]
fn open_chip(config: &ClientConfig) -> anyhow::Result<schlagbaum_core::lines::cdev::CdevChip> {
    schlagbaum_core::lines::cdev::CdevChip::open(
        &config.gpio.device,
        &config.inputs.lines(),
        &config.outputs.lines(),
        config.gpio.active_low,
    )
    .with_context(|| format!("Cannot open GPIO device {}", config.gpio.device.display()))
}

#[cfg(not(target_os = "linux"))]
fn open_chip(_config: &ClientConfig) -> anyhow::Result<Box<dyn schlagbaum_core::LineChip + Send>> {
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
        &default_directive("schlagbaum_client", &args.log_level),
        args.log_json,
    );

    let config = args.resolve().context("Invalid configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        scripted = !args.commands.is_empty(),
        "Starting schlagbaum-client"
    );

    if !args.commands.is_empty() {
        let session = ClientSession::connect(&config).await?;
        let report = session.run_script(&args.commands, config.drain()).await?;
        info!(
            sent = report.sent,
            replies = report.replies.len(),
            "Scripted run finished"
        );
        return Ok(());
    }

    let chip = open_chip(&config)?;
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));
    interactive(&config, chip, shutdown).await?;

    info!("schlagbaum-client stopped");
    Ok(())
}
