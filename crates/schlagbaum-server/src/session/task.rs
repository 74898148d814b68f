//! Per-session transport task.
//!
//! Owns the TCP stream from accept to teardown: TLS handshake under a
//! deadline, framing of inbound bytes, writing of queued outbound frames.
//! Everything that touches lines or the slot table happens in the loop.

use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use schlagbaum_core::codec::LineCodec;

use super::types::{HANDSHAKE_REJECTION, SessionError, SessionEvent, SessionId};

const READ_CHUNK: usize = 1024;

pub(crate) struct SessionTask {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub acceptor: TlsAcceptor,
    pub handshake_timeout: Duration,
    pub max_record: usize,
    pub events: mpsc::Sender<SessionEvent>,
    pub outbound: mpsc::Receiver<String>,
    pub cancel: CancellationToken,
}

impl SessionTask {
    pub async fn run(mut self, stream: TcpStream) {
        let result = self.serve(stream).await;
        // The loop may already be gone during shutdown.
        let _ = self
            .events
            .send(SessionEvent::Closed {
                id: self.id,
                result,
            })
            .await;
    }

    async fn serve(&mut self, stream: TcpStream) -> Result<(), SessionError> {
        let (stream, mut raw) = duplicate(stream)?;

        let handshake = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            res = tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(stream)) => res,
        };
        let mut tls = match handshake {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => {
                reject(&mut raw);
                return Err(SessionError::Handshake(e));
            }
            Err(_) => {
                reject(&mut raw);
                return Err(SessionError::HandshakeTimeout(self.handshake_timeout));
            }
        };
        drop(raw);

        if self
            .events
            .send(SessionEvent::Established { id: self.id })
            .await
            .is_err()
        {
            return Ok(());
        }

        let mut codec = LineCodec::new(self.max_record);
        let mut buf = [0u8; READ_CHUNK];
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    // Best effort close_notify; the peer may already be gone.
                    let _ = tls.shutdown().await;
                    return Ok(());
                }
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    tls.write_all(frame.as_bytes()).await?;
                    tls.flush().await?;
                    trace!(session = self.id, frame = frame.trim_end(), "Frame sent");
                }
                read = tls.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => return Ok(()),
                        Ok(n) => n,
                        Err(e) if is_peer_gone(&e) => {
                            debug!(session = self.id, peer = %self.peer, error = %e, "Peer went away");
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    };
                    codec.extend(&buf[..n]);
                    while let Some(token) = codec.next_frame()? {
                        let event = SessionEvent::Frame { id: self.id, token };
                        if self.events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Keep a second handle on the raw socket for plaintext rejection.
fn duplicate(stream: TcpStream) -> std::io::Result<(TcpStream, std::net::TcpStream)> {
    let std_stream = stream.into_std()?;
    let raw = std_stream.try_clone()?;
    Ok((TcpStream::from_std(std_stream)?, raw))
}

/// Best-effort plaintext notice. The descriptor is non-blocking, so this
/// never stalls the task.
fn reject(raw: &mut std::net::TcpStream) {
    let _ = raw.write(HANDSHAKE_REJECTION.as_bytes());
    let _ = raw.shutdown(Shutdown::Both);
}

fn is_peer_gone(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}
