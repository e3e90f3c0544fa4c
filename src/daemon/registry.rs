//! Daemon registry: sessions, logical connections, and the shared backend.
//!
//! The registry is the one place where cross-session state lives. It owns
//! the backend singleton, allocates session and connection identifiers, and
//! enforces the ownership invariant: a request may only touch connection
//! ids that exist and belong to the session making the request.
//!
//! Connection ids are monotonically increasing and never reused for the
//! daemon's lifetime, even across close/open cycles. Once the u16 id space
//! is spent, further allocations are refused with a nack code rather than
//! wrapping.
//!
//! Protocol-visible failures are reported as [`NackCode`] values so the
//! session layer can answer them without translating; nothing in here ever
//! panics on bad tool input.

use std::collections::{HashMap, HashSet};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uplink_proto::{ConnId, NackCode};

use crate::backend::Backend;

/// First local port handed out for outbound logical connections.
const EPHEMERAL_PORT_BASE: u16 = 49152;

/// Lifecycle state of a logical connection.
///
/// Closing removes the connection from the table entirely, so there is no
/// `Closed` variant: a closed id simply no longer exists. Connect moves
/// straight to `Established` because the peer handshake belongs to the
/// transport protocol below this daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Created,
    Listening { port: u16 },
    Established { local_port: u16, peer_port: u16 },
}

struct LogicalConnection {
    owner: u64,
    state: LinkState,
}

#[derive(Default)]
struct SessionEntry {
    connections: HashSet<ConnId>,
}

struct Tables {
    next_session: u64,
    /// One past the last allocated connection id. Kept wider than the wire
    /// type so exhaustion is detectable instead of wrapping.
    next_conn: u32,
    next_local_port: u16,
    sessions: HashMap<u64, SessionEntry>,
    connections: HashMap<ConnId, LogicalConnection>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            next_session: 0,
            next_conn: 0,
            next_local_port: EPHEMERAL_PORT_BASE,
            sessions: HashMap::new(),
            connections: HashMap::new(),
        }
    }
}

/// Shared daemon state consulted by every session.
///
/// Table mutation is linearized behind one `RwLock`; backend I/O is
/// serialized behind its own `Mutex` since simultaneous reads or writes on
/// the single physical link would interleave corruptly.
pub struct Registry {
    backend: Mutex<Box<dyn Backend>>,
    tables: RwLock<Tables>,
}

impl Registry {
    /// Wrap an already-established backend.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Register a new tool session and return its id.
    pub async fn register_session(&self) -> u64 {
        let mut tables = self.tables.write().await;
        let session = tables.next_session;
        tables.next_session += 1;
        tables.sessions.insert(session, SessionEntry::default());
        debug!(session, "session registered");
        session
    }

    /// Remove a session and release every logical connection it owned.
    pub async fn unregister_session(&self, session: u64) {
        let mut tables = self.tables.write().await;
        let Some(entry) = tables.sessions.remove(&session) else {
            return;
        };
        let released = entry.connections.len();
        for conn in entry.connections {
            tables.connections.remove(&conn);
        }
        info!(session, released, "session unregistered");
    }

    /// Allocate a fresh logical connection owned by `session`.
    pub async fn open_connection(&self, session: u64) -> Result<ConnId, NackCode> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&session) {
            return Err(NackCode::UnknownConnection);
        }
        if tables.next_conn > u32::from(u16::MAX) {
            warn!(session, "connection id space exhausted");
            return Err(NackCode::IdsExhausted);
        }
        let conn = tables.next_conn as ConnId;
        tables.next_conn += 1;
        tables.connections.insert(
            conn,
            LogicalConnection {
                owner: session,
                state: LinkState::Created,
            },
        );
        if let Some(entry) = tables.sessions.get_mut(&session) {
            entry.connections.insert(conn);
        }
        debug!(session, conn, "logical connection opened");
        Ok(conn)
    }

    /// Release a logical connection owned by `session`.
    pub async fn close_connection(&self, session: u64, conn: ConnId) -> Result<(), NackCode> {
        let mut tables = self.tables.write().await;
        owned_mut(&mut tables, session, conn)?;
        tables.connections.remove(&conn);
        if let Some(entry) = tables.sessions.get_mut(&session) {
            entry.connections.remove(&conn);
        }
        debug!(session, conn, "logical connection closed");
        Ok(())
    }

    /// Move a connection from `Created` to `Listening` on `port`.
    pub async fn listen(&self, session: u64, conn: ConnId, port: u16) -> Result<(), NackCode> {
        let mut tables = self.tables.write().await;
        let entry = owned_mut(&mut tables, session, conn)?;
        match entry.state {
            LinkState::Created => {
                entry.state = LinkState::Listening { port };
                Ok(())
            }
            _ => Err(NackCode::InvalidState),
        }
    }

    /// Complete a listening connection, returning the peer's port.
    ///
    /// The transport handshake that would carry the real peer port is out
    /// of this daemon's scope, so the advertised listening port doubles as
    /// the peer port.
    pub async fn wait_for_peer(&self, session: u64, conn: ConnId) -> Result<u16, NackCode> {
        if !self.backend_connected().await {
            return Err(NackCode::BackendOffline);
        }
        let mut tables = self.tables.write().await;
        let entry = owned_mut(&mut tables, session, conn)?;
        match entry.state {
            LinkState::Listening { port } => {
                entry.state = LinkState::Established {
                    local_port: port,
                    peer_port: port,
                };
                Ok(port)
            }
            _ => Err(NackCode::InvalidState),
        }
    }

    /// Establish an outbound connection to `port`, returning the local
    /// port assigned to it.
    pub async fn connect(&self, session: u64, conn: ConnId, port: u16) -> Result<u16, NackCode> {
        if !self.backend_connected().await {
            return Err(NackCode::BackendOffline);
        }
        let mut tables = self.tables.write().await;
        match owned_mut(&mut tables, session, conn)?.state {
            LinkState::Created => {}
            _ => return Err(NackCode::InvalidState),
        }
        let local_port = tables.next_local_port;
        tables.next_local_port = if local_port == u16::MAX {
            EPHEMERAL_PORT_BASE
        } else {
            local_port + 1
        };
        if let Ok(entry) = owned_mut(&mut tables, session, conn) {
            entry.state = LinkState::Established {
                local_port,
                peer_port: port,
            };
        }
        Ok(local_port)
    }

    /// Forward payload to the backend on behalf of a connection.
    ///
    /// Partial sends are retried until the whole payload is on the link.
    pub async fn send(&self, session: u64, conn: ConnId, data: &[u8]) -> Result<(), NackCode> {
        self.ensure_established(session, conn).await?;
        let mut backend = self.backend.lock().await;
        if !backend.is_connected() {
            return Err(NackCode::BackendOffline);
        }
        let mut offset = 0;
        while offset < data.len() {
            match backend.send(&data[offset..]).await {
                Ok(0) => {
                    warn!(session, conn, "backend accepted no bytes");
                    return Err(NackCode::SendFailed);
                }
                Ok(sent) => offset += sent,
                Err(error) => {
                    warn!(session, conn, %error, "backend send failed");
                    return Err(NackCode::SendFailed);
                }
            }
        }
        Ok(())
    }

    /// Receive up to `max_len` payload bytes on behalf of a connection.
    ///
    /// An empty result means the link reached end-of-stream; subsequent
    /// requests are governed by the backend's connectivity probe.
    pub async fn recv(
        &self,
        session: u64,
        conn: ConnId,
        max_len: u16,
    ) -> Result<Vec<u8>, NackCode> {
        self.ensure_established(session, conn).await?;
        let mut backend = self.backend.lock().await;
        if !backend.is_connected() {
            return Err(NackCode::BackendOffline);
        }
        match backend.recv(usize::from(max_len)).await {
            Ok(data) => Ok(data),
            Err(error) => {
                warn!(session, conn, %error, "backend recv failed");
                Err(NackCode::RecvFailed)
            }
        }
    }

    /// Look up the state of a connection owned by `session`.
    pub async fn lookup_connection(
        &self,
        session: u64,
        conn: ConnId,
    ) -> Result<LinkState, NackCode> {
        let tables = self.tables.read().await;
        match tables.connections.get(&conn) {
            Some(entry) if entry.owner == session => Ok(entry.state),
            _ => Err(NackCode::UnknownConnection),
        }
    }

    /// Non-blocking connectivity probe of the shared backend.
    pub async fn backend_connected(&self) -> bool {
        self.backend.lock().await.is_connected()
    }

    async fn ensure_established(&self, session: u64, conn: ConnId) -> Result<(), NackCode> {
        match self.lookup_connection(session, conn).await? {
            LinkState::Established { .. } => Ok(()),
            _ => Err(NackCode::InvalidState),
        }
    }

    #[cfg(test)]
    pub(crate) async fn force_next_conn(&self, next: u32) {
        self.tables.write().await.next_conn = next;
    }
}

fn owned_mut<'a>(
    tables: &'a mut Tables,
    session: u64,
    conn: ConnId,
) -> Result<&'a mut LogicalConnection, NackCode> {
    match tables.connections.get_mut(&conn) {
        Some(entry) if entry.owner == session => Ok(entry),
        _ => Err(NackCode::UnknownConnection),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    async fn registry() -> (Registry, crate::backend::MockHandle) {
        let (mut backend, handle) = MockBackend::new();
        backend.establish().await.unwrap();
        (Registry::new(Box::new(backend)), handle)
    }

    #[tokio::test]
    async fn test_connection_ids_increase_and_are_never_reused() {
        let (registry, _handle) = registry().await;
        let session = registry.register_session().await;

        let first = registry.open_connection(session).await.unwrap();
        assert_eq!(first, 0);
        registry.close_connection(session, first).await.unwrap();

        let second = registry.open_connection(session).await.unwrap();
        assert_eq!(second, 1);

        let other = registry.register_session().await;
        let third = registry.open_connection(other).await.unwrap();
        assert_eq!(third, 2);
    }

    #[tokio::test]
    async fn test_exhausted_id_space_is_refused() {
        let (registry, _handle) = registry().await;
        let session = registry.register_session().await;
        registry.force_next_conn(u32::from(u16::MAX) + 1).await;
        assert_eq!(
            registry.open_connection(session).await.unwrap_err(),
            NackCode::IdsExhausted
        );
    }

    #[tokio::test]
    async fn test_foreign_session_cannot_close_a_connection() {
        let (registry, _handle) = registry().await;
        let owner = registry.register_session().await;
        let stranger = registry.register_session().await;

        let conn = registry.open_connection(owner).await.unwrap();
        assert_eq!(
            registry.close_connection(stranger, conn).await.unwrap_err(),
            NackCode::UnknownConnection
        );
        // The owner's connection is untouched.
        assert_eq!(
            registry.lookup_connection(owner, conn).await.unwrap(),
            LinkState::Created
        );
    }

    #[tokio::test]
    async fn test_listen_wait_for_peer_establishes() {
        let (registry, _handle) = registry().await;
        let session = registry.register_session().await;
        let conn = registry.open_connection(session).await.unwrap();

        registry.listen(session, conn, 4000).await.unwrap();
        assert_eq!(
            registry.lookup_connection(session, conn).await.unwrap(),
            LinkState::Listening { port: 4000 }
        );

        let peer_port = registry.wait_for_peer(session, conn).await.unwrap();
        assert_eq!(peer_port, 4000);
        assert_eq!(
            registry.lookup_connection(session, conn).await.unwrap(),
            LinkState::Established {
                local_port: 4000,
                peer_port: 4000
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_transitions_nack_without_mutating() {
        let (registry, _handle) = registry().await;
        let session = registry.register_session().await;
        let conn = registry.open_connection(session).await.unwrap();

        // WaitForPeer before Listen.
        assert_eq!(
            registry.wait_for_peer(session, conn).await.unwrap_err(),
            NackCode::InvalidState
        );
        assert_eq!(
            registry.lookup_connection(session, conn).await.unwrap(),
            LinkState::Created
        );

        // Double Listen.
        registry.listen(session, conn, 4000).await.unwrap();
        assert_eq!(
            registry.listen(session, conn, 5000).await.unwrap_err(),
            NackCode::InvalidState
        );
        assert_eq!(
            registry.lookup_connection(session, conn).await.unwrap(),
            LinkState::Listening { port: 4000 }
        );

        // Connect on a listening connection.
        assert_eq!(
            registry.connect(session, conn, 6000).await.unwrap_err(),
            NackCode::InvalidState
        );
    }

    #[tokio::test]
    async fn test_connect_assigns_increasing_local_ports() {
        let (registry, _handle) = registry().await;
        let session = registry.register_session().await;

        let first = registry.open_connection(session).await.unwrap();
        let second = registry.open_connection(session).await.unwrap();

        assert_eq!(registry.connect(session, first, 9000).await.unwrap(), 49152);
        assert_eq!(
            registry.connect(session, second, 9000).await.unwrap(),
            49153
        );
        assert_eq!(
            registry.lookup_connection(session, first).await.unwrap(),
            LinkState::Established {
                local_port: 49152,
                peer_port: 9000
            }
        );
    }

    #[tokio::test]
    async fn test_send_requires_established_state() {
        let (registry, _handle) = registry().await;
        let session = registry.register_session().await;
        let conn = registry.open_connection(session).await.unwrap();
        assert_eq!(
            registry.send(session, conn, b"hi").await.unwrap_err(),
            NackCode::InvalidState
        );
    }

    #[tokio::test]
    async fn test_send_retries_partial_sends() {
        let (registry, handle) = registry().await;
        let session = registry.register_session().await;
        let conn = registry.open_connection(session).await.unwrap();
        registry.connect(session, conn, 9000).await.unwrap();

        handle.set_send_limit(Some(1));
        registry.send(session, conn, b"satellite").await.unwrap();
        assert_eq!(handle.sent(), b"satellite");
    }

    #[tokio::test]
    async fn test_offline_backend_refuses_io_and_transitions() {
        let (registry, handle) = registry().await;
        let session = registry.register_session().await;
        let conn = registry.open_connection(session).await.unwrap();
        registry.connect(session, conn, 9000).await.unwrap();

        handle.set_connected(false);
        assert_eq!(
            registry.send(session, conn, b"hi").await.unwrap_err(),
            NackCode::BackendOffline
        );
        assert_eq!(
            registry.recv(session, conn, 16).await.unwrap_err(),
            NackCode::BackendOffline
        );

        let fresh = registry.open_connection(session).await.unwrap();
        assert_eq!(
            registry.connect(session, fresh, 9000).await.unwrap_err(),
            NackCode::BackendOffline
        );
    }

    #[tokio::test]
    async fn test_recv_returns_queued_data_then_empty() {
        let (registry, handle) = registry().await;
        let session = registry.register_session().await;
        let conn = registry.open_connection(session).await.unwrap();
        registry.connect(session, conn, 9000).await.unwrap();

        handle.push_recv(b"pong");
        assert_eq!(registry.recv(session, conn, 16).await.unwrap(), b"pong");
        assert_eq!(
            registry.recv(session, conn, 16).await.unwrap(),
            Vec::<u8>::new()
        );
    }

    #[tokio::test]
    async fn test_backend_failures_map_to_nack_codes() {
        let (registry, handle) = registry().await;
        let session = registry.register_session().await;
        let conn = registry.open_connection(session).await.unwrap();
        registry.connect(session, conn, 9000).await.unwrap();

        handle.fail_sends(true);
        assert_eq!(
            registry.send(session, conn, b"hi").await.unwrap_err(),
            NackCode::SendFailed
        );

        handle.fail_recvs(true);
        assert_eq!(
            registry.recv(session, conn, 16).await.unwrap_err(),
            NackCode::RecvFailed
        );
    }

    #[tokio::test]
    async fn test_unregister_releases_owned_connections() {
        let (registry, _handle) = registry().await;
        let session = registry.register_session().await;
        let first = registry.open_connection(session).await.unwrap();
        let second = registry.open_connection(session).await.unwrap();

        registry.unregister_session(session).await;
        assert_eq!(
            registry.lookup_connection(session, first).await.unwrap_err(),
            NackCode::UnknownConnection
        );
        assert_eq!(
            registry.lookup_connection(session, second).await.unwrap_err(),
            NackCode::UnknownConnection
        );

        // Ids still move forward after the release.
        let other = registry.register_session().await;
        assert_eq!(registry.open_connection(other).await.unwrap(), 2);
    }
}
