//! Session multiplexer types.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use schlagbaum_core::codec::{FrameError, SERVER_MAX_RECORD};
use schlagbaum_core::config::ServerConfig;

/// Sent in plaintext to a connection refused because every slot is taken.
pub const CAPACITY_MESSAGE: &str = "Max client number reached, connect later\n";

/// Sent in plaintext over the raw socket when the TLS handshake fails.
pub const HANDSHAKE_REJECTION: &str = "TLS handshake failed, connection refused\n";

/// Monotonic per-process session number.
pub type SessionId = u64;

/// Configuration for the connection multiplexer.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Slot table size; handshaking sessions count.
    pub max_sessions: usize,
    /// Interval between `ping` broadcasts.
    pub heartbeat: Duration,
    /// Upper bound of one loop wait.
    pub tick: Duration,
    pub handshake_timeout: Duration,
    /// Longest inbound record, terminator included.
    pub max_record: usize,
    /// Frames queued towards one session before it counts as stalled.
    pub outbound_capacity: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            heartbeat: Duration::from_secs(5),
            tick: Duration::from_millis(1),
            handshake_timeout: Duration::from_secs(10),
            max_record: SERVER_MAX_RECORD,
            outbound_capacity: 64,
        }
    }
}

impl MultiplexerConfig {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            heartbeat: config.heartbeat(),
            tick: config.timing.tick(),
            handshake_timeout: config.timing.handshake_timeout(),
            max_record: config.max_record,
            ..Self::default()
        }
    }
}

/// Session lifecycle as seen by the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Established,
    Closing,
    Failed,
}

/// Reported by a session task to the multiplexer loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// TLS handshake completed.
    Established { id: SessionId },
    /// One complete inbound record, terminator stripped.
    Frame { id: SessionId, token: String },
    /// The task has ended; `Ok` means the peer went away cleanly.
    Closed {
        id: SessionId,
        result: Result<(), SessionError>,
    },
}

/// Session task errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),

    #[error("Protocol violation: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub const fn is_handshake(&self) -> bool {
        matches!(self, Self::HandshakeTimeout(_) | Self::Handshake(_))
    }
}

/// Multiplexer-side handle to one session task.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub state: SessionState,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub outbound: mpsc::Sender<String>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue a frame without waiting. `false` when the session is stalled
    /// or its task is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.outbound.try_send(frame.to_owned()).is_ok()
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }
}
