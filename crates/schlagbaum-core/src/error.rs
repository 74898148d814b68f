//! Error types for the Schlagbaum core library.

use thiserror::Error;

use crate::config::ConfigError;
use crate::lines::LineError;
use crate::tls::TlsConfigError;

/// Result type alias using Schlagbaum `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Schlagbaum operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Certificate, key or CA material could not be loaded
    #[error(transparent)]
    Tls(#[from] TlsConfigError),

    /// Digital line operation failed
    #[error(transparent)]
    Line(#[from] LineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
