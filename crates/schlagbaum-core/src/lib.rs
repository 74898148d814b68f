//! Schlagbaum Core Library
//!
//! Shared functionality for the Schlagbaum server and client:
//! - Command vocabulary and role-specific line mapping tables
//! - Newline-framed line protocol codec
//! - Digital-line controller (debounce, auto-clear, anti-flap) over a
//!   pluggable GPIO line chip
//! - Command dispatch and edge event encoding
//! - Mutual TLS context construction
//! - Configuration and common error types

pub mod codec;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lines;
pub mod tls;
pub mod tracing_init;

pub use codec::{FrameError, LineCodec};
pub use command::{Command, CommandTable, LineBinding};
pub use config::{ClientConfig, ServerConfig};
pub use dispatch::{Dispatcher, EdgeFormat, Reply};
pub use error::{Error, Result};
pub use lines::{EdgeDirection, LineChip, LineController, LineError, RawEdge};
