//! End-to-end tests: real control socket, real sessions, scripted backend.
//!
//! Each test stands up the daemon in-process on a socket in a temp
//! directory, drives it through [`ToolClient`], and inspects the backend
//! through the mock's handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uplink_proto::NackCode;

use uplink::backend::{Backend, MockBackend, MockHandle};
use uplink::daemon::{self, ControlListener, Registry, ToolClient};
use uplink::error::UplinkError;

struct Daemon {
    // Held so the socket directory outlives the test.
    _dir: TempDir,
    socket: PathBuf,
    backend: MockHandle,
    cancel: CancellationToken,
    server: JoinHandle<uplink::Result<()>>,
}

async fn start_daemon() -> Daemon {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("uplinkd.sock");

    let (mut backend, handle) = MockBackend::new();
    backend.establish().await.unwrap();

    let listener = ControlListener::bind(&socket).unwrap();
    let registry = Arc::new(Registry::new(Box::new(backend)));
    let cancel = CancellationToken::new();
    let server = tokio::spawn(daemon::serve(listener, registry, cancel.clone()));

    Daemon {
        _dir: dir,
        socket,
        backend: handle,
        cancel,
        server,
    }
}

async fn connect(daemon: &Daemon) -> ToolClient {
    timeout(Duration::from_secs(5), ToolClient::connect(&daemon.socket))
        .await
        .expect("connect timed out")
        .unwrap()
}

fn refused(err: UplinkError) -> NackCode {
    match err {
        UplinkError::Refused(code) => code,
        other => panic!("expected a nack, got {other}"),
    }
}

#[tokio::test]
async fn test_connection_ids_are_unique_across_sessions() {
    let daemon = start_daemon().await;

    let mut first = connect(&daemon).await;
    let mut second = connect(&daemon).await;

    assert_eq!(first.open().await.unwrap(), 0);
    assert_eq!(second.open().await.unwrap(), 1);

    // A close does not make the id reusable.
    first.close(0).await.unwrap();
    assert_eq!(first.open().await.unwrap(), 2);
}

#[tokio::test]
async fn test_outbound_connection_carries_traffic() {
    let daemon = start_daemon().await;
    let mut tool = connect(&daemon).await;

    let conn = tool.open().await.unwrap();
    let local_port = tool.connect_peer(conn, 7000).await.unwrap();
    assert_eq!(local_port, 49152);

    tool.send(conn, b"telemetry request").await.unwrap();
    assert_eq!(daemon.backend.sent(), b"telemetry request");

    daemon.backend.push_recv(b"telemetry frame");
    assert_eq!(tool.recv(conn, 1024).await.unwrap(), b"telemetry frame");

    // Nothing queued: an empty read, not an error.
    assert_eq!(tool.recv(conn, 1024).await.unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn test_listening_connection_establishes_on_wait_for_peer() {
    let daemon = start_daemon().await;
    let mut tool = connect(&daemon).await;

    let conn = tool.open().await.unwrap();
    tool.listen(conn, 4000).await.unwrap();
    assert_eq!(tool.wait_for_peer(conn).await.unwrap(), 4000);

    tool.send(conn, b"hello").await.unwrap();
    assert_eq!(daemon.backend.sent(), b"hello");
}

#[tokio::test]
async fn test_send_before_establishing_is_refused() {
    let daemon = start_daemon().await;
    let mut tool = connect(&daemon).await;

    let conn = tool.open().await.unwrap();
    let err = tool.send(conn, b"hi").await.unwrap_err();
    assert_eq!(refused(err), NackCode::InvalidState);

    // The connection is still usable afterwards.
    tool.connect_peer(conn, 7000).await.unwrap();
    tool.send(conn, b"hi").await.unwrap();
    assert_eq!(daemon.backend.sent(), b"hi");
}

#[tokio::test]
async fn test_sessions_cannot_touch_each_others_connections() {
    let daemon = start_daemon().await;

    let mut owner = connect(&daemon).await;
    let mut stranger = connect(&daemon).await;

    let conn = owner.open().await.unwrap();
    owner.connect_peer(conn, 7000).await.unwrap();

    let err = stranger.close(conn).await.unwrap_err();
    assert_eq!(refused(err), NackCode::UnknownConnection);
    let err = stranger.send(conn, b"hijack").await.unwrap_err();
    assert_eq!(refused(err), NackCode::UnknownConnection);

    // The owner is unaffected.
    owner.send(conn, b"legit").await.unwrap();
    assert_eq!(daemon.backend.sent(), b"legit");
}

#[tokio::test]
async fn test_offline_backend_refuses_link_operations() {
    let daemon = start_daemon().await;
    let mut tool = connect(&daemon).await;

    let conn = tool.open().await.unwrap();
    tool.connect_peer(conn, 7000).await.unwrap();

    daemon.backend.set_connected(false);
    let err = tool.send(conn, b"hi").await.unwrap_err();
    assert_eq!(refused(err), NackCode::BackendOffline);

    let second = tool.open().await.unwrap();
    let err = tool.connect_peer(second, 7000).await.unwrap_err();
    assert_eq!(refused(err), NackCode::BackendOffline);

    // Bookkeeping still works while the link is down.
    tool.close(second).await.unwrap();
}

#[tokio::test]
async fn test_disconnecting_tool_releases_its_connections() {
    let daemon = start_daemon().await;

    let mut first = connect(&daemon).await;
    let conn = first.open().await.unwrap();
    drop(first);

    // The id space keeps moving; the dropped session's connection is gone.
    let mut second = connect(&daemon).await;
    let fresh = second.open().await.unwrap();
    assert!(fresh > conn);
    let err = second.close(conn).await.unwrap_err();
    assert_eq!(refused(err), NackCode::UnknownConnection);
}

#[tokio::test]
async fn test_shutdown_unwinds_sessions_and_removes_the_socket() {
    let daemon = start_daemon().await;
    let mut tool = connect(&daemon).await;
    tool.open().await.unwrap();

    daemon.cancel.cancel();
    timeout(Duration::from_secs(5), daemon.server)
        .await
        .expect("serve did not stop")
        .unwrap()
        .unwrap();

    assert!(!daemon.socket.exists());
    assert!(
        ToolClient::connect(&daemon.socket).await.is_err(),
        "socket should be gone after shutdown"
    );
}
