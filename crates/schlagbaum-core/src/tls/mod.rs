//! Mutual TLS contexts for the server and client roles.
//!
//! Both sides load a CA, a certificate and a private key from PEM files.
//! Peers must present a certificate signed directly by that CA.

#[cfg(any(test, feature = "test-utils"))]
pub mod certs;
pub mod config;
mod verify;

pub use config::{TlsConfigError, TlsPaths, client_config, server_config};
