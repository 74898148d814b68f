#![allow(clippy::unwrap_used, clippy::expect_used)] // Integration tests use unwrap for brevity

//! End-to-end tests of the server loop.
//!
//! A real listener on 127.0.0.1 with generated certificates, a
//! `tokio-rustls` client, and a `MockChip` standing in for the GPIO chip.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_util::sync::CancellationToken;

use schlagbaum_core::config::ServerConfig;
use schlagbaum_core::lines::mock::{LevelChange, MockChip};
use schlagbaum_core::lines::{EdgeDirection, RawEdge};
use schlagbaum_core::tls::certs::{DevCertFiles, generate_dev_bundle, write_dev_certs};
use schlagbaum_core::tls::client_config;
use schlagbaum_server::Multiplexer;
use schlagbaum_server::session::{CAPACITY_MESSAGE, HANDSHAKE_REJECTION};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    chip: MockChip,
    shutdown: CancellationToken,
    server: JoinHandle<schlagbaum_core::Result<()>>,
    connector: TlsConnector,
    certs: DevCertFiles,
    _dir: TempDir,
}

type Client = BufReader<TlsStream<TcpStream>>;

/// Start a server on an ephemeral port with `configure` applied.
async fn start(configure: impl FnOnce(&mut ServerConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let bundle = generate_dev_bundle(&["localhost", "127.0.0.1"]).unwrap();
    let certs = write_dev_certs(dir.path(), &bundle).unwrap();

    let mut config = ServerConfig {
        bind: "127.0.0.1".into(),
        port: 0,
        tls: certs.server.clone(),
        ..ServerConfig::default()
    };
    configure(&mut config);

    let chip = MockChip::new(&config.outputs.lines());
    let server = Multiplexer::bind(&config, chip.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server.run(shutdown.clone()));
    let connector = TlsConnector::from(client_config(&certs.client).unwrap());
    chip.reset_history();

    Harness {
        addr,
        chip,
        shutdown,
        server,
        connector,
        certs,
        _dir: dir,
    }
}

impl Harness {
    async fn connect(&self) -> Client {
        let tcp = TcpStream::connect(self.addr).await.unwrap();
        let tls = self
            .connector
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap();
        BufReader::new(tls)
    }

    async fn stop(self) -> MockChip {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        self.chip
    }
}

async fn send(client: &mut Client, frame: &str) {
    client.get_mut().write_all(frame.as_bytes()).await.unwrap();
    client.get_mut().flush().await.unwrap();
}

async fn read_line(client: &mut Client) -> String {
    let mut line = String::new();
    tokio::time::timeout(WAIT, client.read_line(&mut line))
        .await
        .expect("no line from server")
        .unwrap();
    line
}

/// `true` once the server has closed the stream (EOF or TLS error).
async fn closed_by_server(client: &mut Client) -> bool {
    let mut buf = [0u8; 64];
    matches!(
        tokio::time::timeout(WAIT, client.read(&mut buf)).await,
        Ok(Ok(0) | Err(_))
    )
}

// =========================================================================
// Command dispatch
// =========================================================================

#[tokio::test]
async fn open_clears_interlock_then_sets_gate_and_replies_ok() {
    let harness = start(|_| {}).await;
    let mut client = harness.connect().await;

    send(&mut client, "open\n").await;
    assert_eq!(read_line(&mut client).await, "OK\n");

    assert!(harness.chip.level(17));
    assert!(!harness.chip.level(27));
    assert_eq!(
        harness.chip.history(),
        vec![
            LevelChange { line: 17, high: false },
            LevelChange { line: 27, high: false },
            LevelChange { line: 17, high: true },
        ]
    );
    harness.stop().await;
}

#[tokio::test]
async fn unknown_or_foreign_command_replies_fail_without_side_effect() {
    let harness = start(|_| {}).await;
    let mut client = harness.connect().await;

    send(&mut client, "launch\n").await;
    assert_eq!(read_line(&mut client).await, "FAIL\n");
    send(&mut client, "led0\n").await;
    assert_eq!(read_line(&mut client).await, "FAIL\n");

    assert!(harness.chip.writes().is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn bundled_records_each_get_one_reply() {
    let harness = start(|_| {}).await;
    let mut client = harness.connect().await;

    send(&mut client, "siren\nbogus\nsi").await;
    assert_eq!(read_line(&mut client).await, "OK\n");
    assert_eq!(read_line(&mut client).await, "FAIL\n");

    send(&mut client, "ren\n").await;
    assert_eq!(read_line(&mut client).await, "OK\n");
    assert!(harness.chip.level(22));
    harness.stop().await;
}

#[tokio::test]
async fn oversized_record_disconnects_without_dispatch() {
    let harness = start(|_| {}).await;
    let mut client = harness.connect().await;

    let junk = "open".repeat(400);
    send(&mut client, &junk).await;

    assert!(closed_by_server(&mut client).await);
    assert!(harness.chip.writes().is_empty());
    harness.stop().await;
}

// =========================================================================
// Heartbeat, edges and safety sweep
// =========================================================================

#[tokio::test]
async fn heartbeat_reaches_established_sessions() {
    let harness = start(|c| c.heartbeat_secs = 1).await;
    let mut client = harness.connect().await;

    assert_eq!(read_line(&mut client).await, "ping\n");
    harness.stop().await;
}

#[tokio::test]
async fn bouncing_input_is_broadcast_once_to_every_session() {
    let harness = start(|_| {}).await;
    let mut first = harness.connect().await;
    let mut second = harness.connect().await;
    // Both sessions must be established before the edge is broadcast.
    send(&mut first, "siren\n").await;
    assert_eq!(read_line(&mut first).await, "OK\n");
    send(&mut second, "siren\n").await;
    assert_eq!(read_line(&mut second).await, "OK\n");

    for ms in [0, 10] {
        harness.chip.push_edge(RawEdge {
            line: 8,
            direction: EdgeDirection::Rising,
            timestamp: Duration::from_millis(ms),
        });
    }
    assert_eq!(read_line(&mut first).await, "up8\n");
    assert_eq!(read_line(&mut second).await, "up8\n");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.chip.pending_edges(), 0);
    send(&mut first, "close\n").await;
    assert_eq!(read_line(&mut first).await, "OK\n");
    harness.stop().await;
}

#[tokio::test]
async fn stuck_output_is_auto_cleared() {
    let harness = start(|c| c.timing.auto_clear_secs = 1).await;
    let mut client = harness.connect().await;

    send(&mut client, "siren\n").await;
    assert_eq!(read_line(&mut client).await, "OK\n");
    assert!(harness.chip.level(22));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!harness.chip.level(22));
    harness.stop().await;
}

// =========================================================================
// Capacity and authentication
// =========================================================================

#[tokio::test]
async fn connection_beyond_capacity_gets_notice_without_handshake() {
    let harness = start(|c| c.max_sessions = 2).await;
    let mut first = harness.connect().await;
    let _second = harness.connect().await;

    let mut raw = TcpStream::connect(harness.addr).await.unwrap();
    let mut notice = String::new();
    tokio::time::timeout(WAIT, raw.read_to_string(&mut notice))
        .await
        .expect("no capacity notice")
        .unwrap();
    assert_eq!(notice, CAPACITY_MESSAGE);

    // Existing sessions are unaffected.
    send(&mut first, "siren\n").await;
    assert_eq!(read_line(&mut first).await, "OK\n");
    harness.stop().await;
}

#[tokio::test]
async fn freed_slot_accepts_a_new_session() {
    let harness = start(|c| c.max_sessions = 1).await;
    let client = harness.connect().await;
    drop(client);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut next = harness.connect().await;
    send(&mut next, "siren\n").await;
    assert_eq!(read_line(&mut next).await, "OK\n");
    harness.stop().await;
}

#[tokio::test]
async fn silent_peer_is_rejected_after_handshake_timeout() {
    let harness = start(|c| {
        c.max_sessions = 1;
        c.timing.handshake_timeout_secs = 1;
    })
    .await;

    // Never speaks TLS, so it holds the only slot until the deadline.
    let mut silent = TcpStream::connect(harness.addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut refused = TcpStream::connect(harness.addr).await.unwrap();
    let mut notice = String::new();
    tokio::time::timeout(WAIT, refused.read_to_string(&mut notice))
        .await
        .expect("no capacity notice")
        .unwrap();
    assert_eq!(notice, CAPACITY_MESSAGE);

    let started = tokio::time::Instant::now();
    let mut rejection = String::new();
    tokio::time::timeout(WAIT, silent.read_to_string(&mut rejection))
        .await
        .expect("no handshake rejection")
        .unwrap();
    assert_eq!(rejection, HANDSHAKE_REJECTION);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The timed-out session gave its slot back.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut client = harness.connect().await;
    send(&mut client, "siren\n").await;
    assert_eq!(read_line(&mut client).await, "OK\n");
    harness.stop().await;
}

#[tokio::test]
async fn invalid_configuration_fails_before_binding() {
    let config = ServerConfig {
        bind: "127.0.0.1".into(),
        port: 0,
        max_sessions: 0,
        ..ServerConfig::default()
    };
    let result = Multiplexer::bind(&config, MockChip::new(&config.outputs.lines())).await;
    assert!(matches!(result, Err(schlagbaum_core::Error::Config(_))));
}

#[tokio::test]
async fn client_without_certificate_cannot_command() {
    let harness = start(|_| {}).await;

    let mut roots = rustls::RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(&harness.certs.client.ca).unwrap() {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect(harness.addr).await.unwrap();
    if let Ok(tls) = connector
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
    {
        let mut client = BufReader::new(tls);
        let _ = client.get_mut().write_all(b"open\n").await;
        let _ = client.get_mut().flush().await;
        assert!(closed_by_server(&mut client).await);
    }
    assert!(harness.chip.writes().is_empty());
    harness.stop().await;
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn shutdown_releases_every_output() {
    let harness = start(|_| {}).await;
    let mut client = harness.connect().await;
    send(&mut client, "siren\n").await;
    assert_eq!(read_line(&mut client).await, "OK\n");

    let chip = harness.stop().await;
    assert!(!chip.level(22));
    assert!(closed_by_server(&mut client).await);
}
