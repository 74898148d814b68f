//! One outbound session to the server.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use schlagbaum_core::codec::LineCodec;
use schlagbaum_core::command::Command;
use schlagbaum_core::config::ClientConfig;
use schlagbaum_core::dispatch::{Dispatcher, Reply};
use schlagbaum_core::lines::{LineChip, LineController, LineError, controller};
use schlagbaum_core::tls;

use crate::error::ClientError;

const READ_CHUNK: usize = 1024;

/// What a scripted run sent and heard back.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    pub sent: usize,
    /// Server replies in arrival order (`OK`/`FAIL`).
    pub replies: Vec<Reply>,
}

/// Build the interactive-mode controller and dispatcher for `chip`.
pub fn line_setup<C: LineChip>(
    config: &ClientConfig,
    chip: C,
) -> Result<(LineController<C>, Dispatcher), LineError> {
    let lines = LineController::new(
        chip,
        &config.outputs.lines(),
        &config.inputs.lines(),
        config.timing.line_timing(),
        config.gpio.edge_direction,
    )?;
    let dispatcher = Dispatcher::new(
        config.outputs.clone(),
        config.inputs.clone(),
        config.exclusive.clone(),
        config.timing.settle(),
        config.gpio.edge_format,
    );
    Ok((lines, dispatcher))
}

/// Interactive mode from start to finish.
///
/// The lines are taken over before the server is contacted, so a chip
/// that cannot be driven never costs a TLS session.
pub async fn interactive<C: LineChip>(
    config: &ClientConfig,
    chip: C,
    shutdown: CancellationToken,
) -> Result<(), ClientError> {
    let (mut lines, dispatcher) = line_setup(config, chip)?;
    let session = ClientSession::connect(config).await?;
    session
        .run_interactive(&mut lines, &dispatcher, shutdown)
        .await
}

/// An established, mutually authenticated connection to the server.
pub struct ClientSession {
    stream: TlsStream<TcpStream>,
    codec: LineCodec,
    server: String,
    tick: Duration,
}

impl ClientSession {
    /// Connect and complete the TLS handshake within the configured timeout.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let tls_config = tls::client_config(&config.tls)?;
        let name = ServerName::try_from(config.server_name().to_owned())?;
        let server = format!("{}:{}", config.host, config.port);

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|source| ClientError::Connect {
                addr: server.clone(),
                source,
            })?;

        let timeout = config.timing.handshake_timeout();
        let stream = tokio::time::timeout(timeout, TlsConnector::from(tls_config).connect(name, tcp))
            .await
            .map_err(|_| ClientError::HandshakeTimeout(timeout))?
            .map_err(ClientError::Handshake)?;

        info!(%server, "Connected to server");
        Ok(Self {
            stream,
            codec: LineCodec::new(config.max_record),
            server,
            tick: config.timing.tick(),
        })
    }

    async fn send(&mut self, frame: &str) -> Result<(), ClientError> {
        self.stream.write_all(frame.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read and hand every complete record to `on_frame` until `deadline`.
    ///
    /// Returns `false` once the server has gone away.
    async fn drain_until(
        &mut self,
        deadline: Instant,
        mut on_frame: impl FnMut(String),
    ) -> Result<bool, ClientError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let read = tokio::select! {
                read = self.stream.read(&mut buf) => read,
                () = tokio::time::sleep_until(deadline) => return Ok(true),
            };
            let n = match read {
                Ok(0) => return Ok(false),
                Ok(n) => n,
                Err(e) if is_peer_gone(&e) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            self.codec.extend(&buf[..n]);
            while let Some(frame) = self.codec.next_frame()? {
                on_frame(frame);
            }
        }
    }

    /// Scripted mode: send `commands` in order, then keep draining replies
    /// for `drain` before closing.
    pub async fn run_script(
        mut self,
        commands: &[Command],
        drain: Duration,
    ) -> Result<ScriptReport, ClientError> {
        let mut report = ScriptReport::default();
        let mut collect = |frame: String| match Reply::parse(&frame) {
            Some(reply) => {
                info!(reply = %frame, "Server replied");
                report.replies.push(reply);
            }
            None => debug!(frame = %frame, "Discarding server message"),
        };

        let mut connected = true;
        for command in commands {
            self.send(&command.frame()).await?;
            info!(%command, "Command sent");
            connected = self
                .drain_until(Instant::now() + self.tick, &mut collect)
                .await?;
            if !connected {
                warn!(server = %self.server, "Server closed the connection during script");
                break;
            }
        }
        if connected {
            self.drain_until(Instant::now() + drain, &mut collect).await?;
        }
        report.sent = commands.len();

        // Best effort close_notify.
        let _ = self.stream.shutdown().await;
        Ok(report)
    }

    /// Interactive mode: forward local edges and apply inbound commands
    /// until `shutdown` fires or the server goes away.
    pub async fn run_interactive<C: LineChip>(
        mut self,
        lines: &mut LineController<C>,
        dispatcher: &Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<(), ClientError> {
        let mut buf = [0u8; READ_CHUNK];
        let result = 'session: loop {
            match lines.poll_edge(controller::now()) {
                Ok(Some(edge)) => {
                    if let Some(frame) = dispatcher.encode_edge(&edge) {
                        info!(line = edge.line, event = frame.trim_end(), "Forwarding input edge");
                        if let Err(e) = self.send(&frame).await {
                            break Err(e);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Input line poll failed"),
            }

            let read = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                read = self.stream.read(&mut buf) => Some(read),
                () = tokio::time::sleep(self.tick) => None,
            };
            if let Some(read) = read {
                let n = match read {
                    Ok(0) => break Err(ClientError::Disconnected),
                    Ok(n) => n,
                    Err(e) if is_peer_gone(&e) => break Err(ClientError::Disconnected),
                    Err(e) => break Err(e.into()),
                };
                self.codec.extend(&buf[..n]);
                loop {
                    match self.codec.next_frame() {
                        Ok(Some(token)) => apply(&token, lines, dispatcher).await,
                        Ok(None) => break,
                        Err(e) => break 'session Err(e.into()),
                    }
                }
            }

            lines.sweep(controller::now());
        };

        if result.is_ok() {
            let _ = self.stream.shutdown().await;
        }
        lines.release()?;
        info!(server = %self.server, "Interactive session ended");
        result
    }
}

async fn apply<C: LineChip>(token: &str, lines: &mut LineController<C>, dispatcher: &Dispatcher) {
    if let Some(reply) = Reply::parse(token) {
        info!(?reply, "Server replied");
        return;
    }
    if !dispatcher.dispatch(token, lines).await {
        debug!(token, "Inbound token not applicable here");
    }
}

fn is_peer_gone(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
