//! Client session errors.

use std::time::Duration;

use schlagbaum_core::codec::FrameError;
use schlagbaum_core::lines::LineError;
use schlagbaum_core::tls::TlsConfigError;
use tokio_rustls::rustls::pki_types::InvalidDnsNameError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsConfigError),

    #[error("Invalid TLS server name: {0}")]
    ServerName(#[from] InvalidDnsNameError),

    #[error("Cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("TLS handshake with server timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("TLS handshake with server failed: {0}")]
    Handshake(std::io::Error),

    #[error("Server closed the connection")]
    Disconnected,

    #[error("Protocol violation: {0}")]
    Frame(#[from] FrameError),

    #[error("Line error: {0}")]
    Line(#[from] LineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
