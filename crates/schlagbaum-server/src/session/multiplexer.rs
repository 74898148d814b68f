//! Connection multiplexer: the server's single event loop.
//!
//! Each tick runs, in this order:
//! 1. heartbeat broadcast when due
//! 2. one local input poll, accepted edges broadcast
//! 3. a bounded wait for an accept, a session event or the tick timer
//! 4. accept handling (capacity check before any handshake)
//! 5. queued session events: dispatch frames and reply `OK`/`FAIL`
//! 6. slot compaction for sessions that ended during step 5
//! 7. output sweep
//!
//! Session tasks never touch lines or the slot table, so nothing here
//! needs a lock.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use schlagbaum_core::config::ServerConfig;
use schlagbaum_core::dispatch::{Dispatcher, Reply};
use schlagbaum_core::lines::{LineChip, LineController, controller};
use schlagbaum_core::{Result, tls};

use super::slots::SlotTable;
use super::task::SessionTask;
use super::types::{
    CAPACITY_MESSAGE, MultiplexerConfig, SessionEvent, SessionHandle, SessionId, SessionState,
};

const HEARTBEAT_FRAME: &str = "ping\n";
const EVENT_QUEUE: usize = 256;
const SESSION_STOP_GRACE: Duration = Duration::from_secs(1);

/// Owns the listener, the slot table and the line controller.
pub struct Multiplexer<C> {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    lines: LineController<C>,
    dispatcher: Dispatcher,
    slots: SlotTable<SessionHandle>,
    config: MultiplexerConfig,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    sessions_cancel: CancellationToken,
    next_id: SessionId,
    last_heartbeat: Instant,
}

impl<C: LineChip + Send + 'static> Multiplexer<C> {
    /// Check the configuration, load TLS material, bind the listener and
    /// take over the lines.
    ///
    /// Every failure here is fatal setup: nothing has been served yet.
    pub async fn bind(config: &ServerConfig, chip: C) -> Result<Self> {
        config.validate()?;
        let tls_config = tls::server_config(&config.tls)?;
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
        let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
        Ok(Self::new(
            listener,
            TlsAcceptor::from(tls_config),
            lines,
            dispatcher,
            MultiplexerConfig::from_config(config),
        ))
    }

    pub fn new(
        listener: TcpListener,
        acceptor: TlsAcceptor,
        lines: LineController<C>,
        dispatcher: Dispatcher,
        config: MultiplexerConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            listener,
            acceptor,
            lines,
            dispatcher,
            slots: SlotTable::with_capacity(config.max_sessions),
            config,
            events_tx,
            events_rx,
            sessions_cancel: CancellationToken::new(),
            next_id: 0,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` fires, then close every session and drive
    /// all outputs inactive.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            max_sessions = self.config.max_sessions,
            "Server listening"
        );
        while !shutdown.is_cancelled() {
            self.tick(&shutdown).await;
        }
        self.stop().await
    }

    async fn tick(&mut self, shutdown: &CancellationToken) {
        self.heartbeat();
        self.poll_lines();

        let mut events = Vec::new();
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            accepted = self.listener.accept() => self.on_accept(accepted),
            Some(event) = self.events_rx.recv() => events.push(event),
            () = tokio::time::sleep(self.config.tick) => {}
        }
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }

        let mut finished = Vec::new();
        for event in events {
            self.on_event(event, &mut finished).await;
        }
        self.remove_sessions(&finished);

        self.lines.sweep(controller::now());
    }

    fn heartbeat(&mut self) {
        if self.last_heartbeat.elapsed() < self.config.heartbeat {
            return;
        }
        self.last_heartbeat = Instant::now();
        let stalled = self.broadcast(HEARTBEAT_FRAME);
        debug!(sessions = self.slots.len(), "Heartbeat sent");
        self.remove_sessions(&stalled);
    }

    fn poll_lines(&mut self) {
        match self.lines.poll_edge(controller::now()) {
            Ok(Some(edge)) => {
                if let Some(frame) = self.dispatcher.encode_edge(&edge) {
                    info!(line = edge.line, event = frame.trim_end(), "Broadcasting input edge");
                    let stalled = self.broadcast(&frame);
                    self.remove_sessions(&stalled);
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Input line poll failed"),
        }
    }

    /// Queue `frame` on every established session; returns stalled ones.
    fn broadcast(&self, frame: &str) -> Vec<SessionId> {
        self.slots
            .iter()
            .filter(|s| s.is_established() && !s.send(frame))
            .map(|s| s.id)
            .collect()
    }

    fn on_accept(&mut self, accepted: std::io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                return;
            }
        };

        if self.slots.is_full() {
            warn!(%peer, max = self.slots.capacity(), "Session table full, rejecting");
            tokio::spawn(refuse(stream));
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity);
        let cancel = self.sessions_cancel.child_token();
        let task = SessionTask {
            id,
            peer,
            acceptor: self.acceptor.clone(),
            handshake_timeout: self.config.handshake_timeout,
            max_record: self.config.max_record,
            events: self.events_tx.clone(),
            outbound: outbound_rx,
            cancel: cancel.clone(),
        };
        let now = Instant::now();
        let handle = SessionHandle {
            id,
            peer,
            state: SessionState::Handshaking,
            connected_at: now,
            last_activity: now,
            outbound: outbound_tx,
            cancel,
            task: tokio::spawn(task.run(stream)),
        };
        match self.slots.push(handle) {
            Ok(slot) => debug!(%peer, session = id, slot, "Connection accepted, handshaking"),
            Err(handle) => handle.cancel.cancel(),
        }
    }

    async fn on_event(&mut self, event: SessionEvent, finished: &mut Vec<SessionId>) {
        match event {
            SessionEvent::Established { id } => {
                if let Some(slot) = self.slot_of(id)
                    && let Some(session) = self.slots.get_mut(slot)
                {
                    session.state = SessionState::Established;
                    session.last_activity = Instant::now();
                    info!(peer = %session.peer, session = id, slot, "Client connected");
                }
            }
            SessionEvent::Frame { id, token } => {
                let Some(slot) = self.slot_of(id) else {
                    return;
                };
                let ok = self.dispatcher.dispatch(&token, &mut self.lines).await;
                let Some(session) = self.slots.get_mut(slot) else {
                    return;
                };
                session.last_activity = Instant::now();
                let reply = Reply::from_success(ok);
                debug!(session = id, slot, command = %token, ?reply, "Command handled");
                if !session.send(reply.frame()) {
                    warn!(peer = %session.peer, session = id, "Session stalled, dropping");
                    finished.push(id);
                }
            }
            SessionEvent::Closed { id, result } => {
                let Some(slot) = self.slot_of(id) else {
                    return;
                };
                let Some(session) = self.slots.get_mut(slot) else {
                    return;
                };
                match result {
                    Ok(()) => {
                        session.state = SessionState::Closing;
                        debug!(peer = %session.peer, session = id, "Peer closed session");
                    }
                    Err(e) if e.is_handshake() => {
                        session.state = SessionState::Failed;
                        warn!(peer = %session.peer, session = id, error = %e, "Handshake rejected");
                    }
                    Err(e) => {
                        session.state = SessionState::Failed;
                        warn!(peer = %session.peer, session = id, error = %e, "Session failed");
                    }
                }
                finished.push(id);
            }
        }
    }

    fn slot_of(&self, id: SessionId) -> Option<usize> {
        self.slots.position(|s| s.id == id)
    }

    fn remove_sessions(&mut self, ids: &[SessionId]) {
        if ids.is_empty() {
            return;
        }
        for session in self.slots.remove_where(|s| ids.contains(&s.id)) {
            session.cancel.cancel();
            info!(
                peer = %session.peer,
                session = session.id,
                state = ?session.state,
                connected_for = ?session.connected_at.elapsed(),
                idle_for = ?session.last_activity.elapsed(),
                "Session removed"
            );
        }
    }

    async fn stop(mut self) -> Result<()> {
        info!(sessions = self.slots.len(), "Shutting down");
        self.sessions_cancel.cancel();
        for session in self.slots.drain() {
            if tokio::time::timeout(SESSION_STOP_GRACE, session.task)
                .await
                .is_err()
            {
                debug!(session = session.id, "Session task did not stop in time");
            }
        }
        self.lines.release()?;
        info!("All outputs released");
        Ok(())
    }
}

/// Tell an over-capacity peer why it is dropped, without a handshake.
async fn refuse(mut stream: TcpStream) {
    let notice = async {
        stream.write_all(CAPACITY_MESSAGE.as_bytes()).await?;
        stream.shutdown().await
    };
    if let Ok(Err(e)) = tokio::time::timeout(SESSION_STOP_GRACE, notice).await {
        debug!(error = %e, "Capacity notice not delivered");
    }
}
