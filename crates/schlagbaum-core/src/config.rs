//! Configuration for the server and client roles.
//!
//! Resolution order (lowest to highest):
//! 1. Built-in defaults (the reference gate installation)
//! 2. TOML config file (`--config`)
//! 3. Environment variables (`SCHLAGBAUM_*`, applied by the binaries)
//! 4. CLI arguments
//!
//! Every section is `#[serde(default)]`, so a partial file is valid.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{CLIENT_MAX_RECORD, SERVER_MAX_RECORD};
use crate::command::{Command, CommandTable};
use crate::dispatch::EdgeFormat;
use crate::lines::{EdgeDirection, LineTiming, MAX_LINES};
use crate::tls::TlsPaths;

/// Default TCP port of the relay.
pub const DEFAULT_PORT: u16 = 4444;

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Loop and line timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Main loop period.
    pub tick_ms: u64,
    /// Active outputs are forced off after this long.
    pub auto_clear_secs: u64,
    /// Minimum gap between two clears of one output.
    pub anti_flap_ms: u64,
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    /// Pause between clearing an exclusive group and setting its member.
    pub settle_ms: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1,
            auto_clear_secs: 60,
            anti_flap_ms: 1000,
            debounce_ms: 50,
            poll_interval_ms: 50,
            settle_ms: 100,
            handshake_timeout_secs: 10,
        }
    }
}

impl TimingConfig {
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Controller rules; edge waits are bounded by one tick.
    pub const fn line_timing(&self) -> LineTiming {
        LineTiming {
            auto_clear: Duration::from_secs(self.auto_clear_secs),
            anti_flap: Duration::from_millis(self.anti_flap_ms),
            debounce: Duration::from_millis(self.debounce_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            edge_wait: self.tick(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("timing.tick_ms must be > 0".into()));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timing.handshake_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// GPIO character device settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub device: PathBuf,
    /// Drive outputs inverted (relay boards that switch on low).
    pub active_low: bool,
    /// Which accepted input edges are forwarded to the peer.
    pub edge_direction: EdgeDirection,
    pub edge_format: EdgeFormat,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/gpiochip0"),
            active_low: false,
            edge_direction: EdgeDirection::Rising,
            edge_format: EdgeFormat::Raw,
        }
    }
}

/// Server role configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Concurrent sessions, handshaking ones included.
    pub max_sessions: usize,
    pub heartbeat_secs: u64,
    /// Longest accepted inbound record, terminator included.
    pub max_record: usize,
    pub tls: TlsPaths,
    pub gpio: GpioConfig,
    pub timing: TimingConfig,
    pub outputs: CommandTable,
    pub inputs: CommandTable,
    /// Commands whose outputs must never be active together.
    pub exclusive: Vec<Command>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            max_sessions: 10,
            heartbeat_secs: 5,
            max_record: SERVER_MAX_RECORD,
            tls: TlsPaths::default(),
            gpio: GpioConfig::default(),
            timing: TimingConfig::default(),
            outputs: CommandTable::server_outputs(),
            inputs: CommandTable::server_inputs(),
            exclusive: vec![Command::Open, Command::Close],
        }
    }
}

impl ServerConfig {
    /// Read a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }

    pub const fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be > 0".into()));
        }
        if self.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_secs must be > 0".into()));
        }
        validate_record(self.max_record)?;
        self.timing.validate()?;
        validate_lines(&self.outputs, &self.inputs, &self.exclusive)
    }
}

/// Client role configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Name checked against the server certificate, defaults to `host`.
    pub server_name: Option<String>,
    pub max_record: usize,
    /// How long scripted mode keeps reading replies after its last command.
    pub drain_secs: u64,
    pub tls: TlsPaths,
    pub gpio: GpioConfig,
    pub timing: TimingConfig,
    pub outputs: CommandTable,
    pub inputs: CommandTable,
    pub exclusive: Vec<Command>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            server_name: None,
            max_record: CLIENT_MAX_RECORD,
            drain_secs: 2,
            tls: TlsPaths::default(),
            gpio: GpioConfig::default(),
            timing: TimingConfig::default(),
            outputs: CommandTable::client_outputs(),
            inputs: CommandTable::client_inputs(),
            exclusive: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }

    pub const fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }

    /// TLS server name to verify.
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        validate_record(self.max_record)?;
        self.timing.validate()?;
        validate_lines(&self.outputs, &self.inputs, &self.exclusive)
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn validate_record(max_record: usize) -> Result<(), ConfigError> {
    let longest = Command::ALL
        .iter()
        .map(|c| c.frame().len())
        .max()
        .unwrap_or_default();
    if max_record < longest {
        return Err(ConfigError::Invalid(format!(
            "max_record {max_record} is shorter than the longest command ({longest} bytes)"
        )));
    }
    Ok(())
}

fn validate_table(table: &CommandTable, what: &str) -> Result<(), ConfigError> {
    if table.len() > MAX_LINES {
        return Err(ConfigError::Invalid(format!(
            "{what}: {} lines exceed the limit of {MAX_LINES}",
            table.len()
        )));
    }
    let mut lines = HashSet::new();
    let mut commands = HashSet::new();
    for binding in table.bindings() {
        if !lines.insert(binding.line) {
            return Err(ConfigError::Invalid(format!(
                "{what}: line {} bound twice",
                binding.line
            )));
        }
        if !commands.insert(binding.command) {
            return Err(ConfigError::Invalid(format!(
                "{what}: command {} bound twice",
                binding.command
            )));
        }
    }
    Ok(())
}

fn validate_lines(
    outputs: &CommandTable,
    inputs: &CommandTable,
    exclusive: &[Command],
) -> Result<(), ConfigError> {
    if outputs.is_empty() {
        return Err(ConfigError::Invalid("outputs: no lines configured".into()));
    }
    validate_table(outputs, "outputs")?;
    validate_table(inputs, "inputs")?;

    if let Some(line) = inputs
        .lines()
        .into_iter()
        .find(|l| outputs.command_for(*l).is_some())
    {
        return Err(ConfigError::Invalid(format!(
            "line {line} is configured as both input and output"
        )));
    }
    if let Some(command) = exclusive.iter().find(|c| outputs.line_for(**c).is_none()) {
        return Err(ConfigError::Invalid(format!(
            "exclusive command {command} has no output line"
        )));
    }
    Ok(())
}
