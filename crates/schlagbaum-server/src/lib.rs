//! Schlagbaum Server Library
//!
//! Central end of the command relay:
//! - Accepts mutually authenticated TLS sessions up to a fixed capacity
//! - Applies inbound commands to the gate outputs and answers `OK`/`FAIL`
//! - Broadcasts heartbeats and local input edges to every session
//! - Forces stuck outputs off through the line controller sweep

pub mod session;

pub use session::{Multiplexer, MultiplexerConfig};
