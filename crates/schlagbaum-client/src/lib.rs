//! Schlagbaum Client Library
//!
//! Remote end of the command relay. A [`ClientSession`] holds exactly one
//! mutually authenticated connection to the server and runs either:
//! - scripted mode: send a fixed command list, drain replies, exit
//! - interactive mode: forward local button edges and apply server
//!   commands to the local status outputs until the link drops

pub mod error;
pub mod session;

pub use error::ClientError;
pub use session::{ClientSession, ScriptReport, interactive, line_setup};
