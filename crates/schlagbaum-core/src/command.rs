//! Command vocabulary and role-specific line mapping tables.
//!
//! The vocabulary is closed and shared by both roles. What a command *does*
//! is decided by the [`CommandTable`] of the receiving side: the server and
//! the client each carry their own input table (edge → outbound token) and
//! output table (inbound token → physical line).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One command of the fixed line protocol vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Open the gate.
    Open,
    /// Close the gate.
    Close,
    /// Sound the siren.
    Siren,
    /// Status LED 0.
    Led0,
    /// Status LED 1.
    Led1,
    /// Heartbeat.
    Ping,
}

impl Command {
    /// Every command, in wire-table order.
    pub const ALL: [Self; 6] = [
        Self::Open,
        Self::Close,
        Self::Siren,
        Self::Led0,
        Self::Led1,
        Self::Ping,
    ];

    /// Wire token for this command (without terminator).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Siren => "siren",
            Self::Led0 => "led0",
            Self::Led1 => "led1",
            Self::Ping => "ping",
        }
    }

    /// Wire frame for this command, newline terminated.
    pub fn frame(self) -> String {
        format!("{}\n", self.as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a token is not part of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// Pairs a command with a GPIO line offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineBinding {
    pub command: Command,
    pub line: u32,
}

impl LineBinding {
    pub const fn new(command: Command, line: u32) -> Self {
        Self { command, line }
    }
}

/// Ordered, immutable mapping between commands and line offsets.
///
/// Lookups are linear; tables hold a handful of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTable {
    bindings: Vec<LineBinding>,
}

impl CommandTable {
    pub fn new(bindings: Vec<LineBinding>) -> Self {
        Self { bindings }
    }

    /// Line bound to `command`, if any.
    pub fn line_for(&self, command: Command) -> Option<u32> {
        self.bindings
            .iter()
            .find(|b| b.command == command)
            .map(|b| b.line)
    }

    /// Command bound to `line`, if any.
    pub fn command_for(&self, line: u32) -> Option<Command> {
        self.bindings
            .iter()
            .find(|b| b.line == line)
            .map(|b| b.command)
    }

    /// Line offsets in table order.
    pub fn lines(&self) -> Vec<u32> {
        self.bindings.iter().map(|b| b.line).collect()
    }

    pub fn bindings(&self) -> &[LineBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Server output table: gate actuators and siren.
    pub fn server_outputs() -> Self {
        Self::new(vec![
            LineBinding::new(Command::Open, 17),
            LineBinding::new(Command::Close, 27),
            LineBinding::new(Command::Siren, 22),
        ])
    }

    /// Server input table: gate position indicators.
    pub fn server_inputs() -> Self {
        Self::new(vec![
            LineBinding::new(Command::Led0, 8),
            LineBinding::new(Command::Led1, 7),
        ])
    }

    /// Client output table: status LEDs, `ping` drives the link LED.
    pub fn client_outputs() -> Self {
        Self::new(vec![
            LineBinding::new(Command::Led0, 10),
            LineBinding::new(Command::Ping, 9),
            LineBinding::new(Command::Led1, 11),
        ])
    }

    /// Client input table: push buttons.
    pub fn client_inputs() -> Self {
        Self::new(vec![
            LineBinding::new(Command::Open, 18),
            LineBinding::new(Command::Close, 23),
            LineBinding::new(Command::Siren, 24),
        ])
    }
}
