//! Digital input/output lines.
//!
//! ```text
//!   LineChip (hardware port) ──▶ LineController ──▶ Dispatcher
//! ```
//!
//! [`LineChip`] is the boundary to the GPIO hardware: blocking-with-timeout
//! edge reads and atomic multi-line level writes. [`LineController`] owns
//! the per-line state on top of it and enforces debounce, auto-clear and
//! anti-flap rules.

#[cfg(target_os = "linux")]
pub mod cdev;
pub mod controller;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use controller::{LineController, LineTiming};

/// Maximum number of lines in one hardware request.
pub const MAX_LINES: usize = 64;

/// Direction of an input transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    Rising,
    Falling,
}

impl EdgeDirection {
    /// Prefix used when an edge is reported on the wire (`up18`).
    pub const fn wire_prefix(self) -> &'static str {
        match self {
            Self::Rising => "up",
            Self::Falling => "down",
        }
    }
}

/// One transition reported by the line chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEdge {
    /// Line offset on the chip.
    pub line: u32,
    pub direction: EdgeDirection,
    /// Monotonic timestamp of the transition.
    pub timestamp: Duration,
}

/// Hardware port for a GPIO line controller device.
///
/// Output bit `i` of `mask`/`bits` addresses the `i`-th output line the chip
/// was configured with.
pub trait LineChip {
    /// Wait at most `timeout` for one input edge.
    fn poll_edge(&mut self, timeout: Duration) -> Result<Option<RawEdge>, LineError>;

    /// Atomically drive every output selected by `mask` to the level in `bits`.
    fn set_levels(&mut self, mask: u64, bits: u64) -> Result<(), LineError>;
}

impl<C: LineChip + ?Sized> LineChip for Box<C> {
    fn poll_edge(&mut self, timeout: Duration) -> Result<Option<RawEdge>, LineError> {
        (**self).poll_edge(timeout)
    }

    fn set_levels(&mut self, mask: u64, bits: u64) -> Result<(), LineError> {
        (**self).set_levels(mask, bits)
    }
}

/// Line controller and line chip errors.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("cannot open GPIO device {device}: {source}")]
    Open {
        device: String,
        source: std::io::Error,
    },

    #[error("{op} failed: {source}")]
    Sys {
        op: &'static str,
        source: nix::errno::Errno,
    },

    #[error("line {0} is not configured")]
    UnknownLine(u32),

    #[error("line {line} was cleared {elapsed_ms} ms ago, anti-flap guard holds")]
    Guarded { line: u32, elapsed_ms: u128 },

    #[error("too many lines requested: {0} (max {MAX_LINES})")]
    TooManyLines(usize),

    #[error("GPIO I/O error: {0}")]
    Io(#[from] std::io::Error),
}
