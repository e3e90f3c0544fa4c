//! Per-tool session: frame extraction, dispatch, and reply writing.
//!
//! Each accepted control connection gets one [`Session`] running as two
//! tasks. A reader task pulls bytes off the stream, extracts frames, and
//! forwards them over a channel; a dispatch task executes requests against
//! the registry and writes replies back. Splitting the two means a slow
//! registry operation never stops bytes from draining off the socket.
//!
//! Every reply echoes the event id of the request it answers, so tools can
//! correlate replies even though the daemon processes a session's requests
//! strictly in arrival order.
//!
//! Failure handling is two-tier. A frame with an unknown opcode is
//! answered with a generic malformed nack and the read buffer is flushed,
//! because the length-implicit framing cannot resync past an opcode it
//! does not know; the session itself survives. Buffer overflow or a
//! framing-level decode error means the stream can no longer be trusted,
//! and the session is torn down without a reply.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uplink_proto::{EventId, FrameBuffer, Message, NackCode, WireError};

use super::registry::Registry;

const READ_CHUNK: usize = 4096;
const INBOUND_QUEUE: usize = 64;

enum Inbound {
    Frame { event: EventId, msg: Message },
    /// A frame we could not decode but can still answer: carries the event
    /// id recovered from its header.
    Malformed { event: EventId },
}

pub struct Session;

impl Session {
    /// Run a session over `stream` until the tool disconnects, the stream
    /// turns hostile, or `cancel` fires.
    ///
    /// The returned handle resolves once the session has fully unwound and
    /// unregistered itself.
    pub fn spawn<S>(
        id: u64,
        stream: S,
        registry: Arc<Registry>,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(stream);
            let (tx, rx) = mpsc::channel(INBOUND_QUEUE);

            let read_cancel = cancel.clone();
            let reader_task =
                tokio::spawn(async move { read_loop(id, reader, tx, read_cancel).await });

            dispatch_loop(id, writer, rx, Arc::clone(&registry), cancel.clone()).await;

            // The dispatcher exits when the channel closes or on a fatal
            // write error; either way the reader must stop too.
            cancel.cancel();
            let _ = reader_task.await;
            registry.unregister_session(id).await;
            debug!(session = id, "session finished");
        })
    }
}

async fn read_loop<R>(
    id: u64,
    mut reader: R,
    tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => break,
            result = reader.read(&mut chunk) => match result {
                Ok(0) => {
                    debug!(session = id, "tool disconnected");
                    break;
                }
                Ok(n) => n,
                Err(error) => {
                    debug!(session = id, %error, "control read failed");
                    break;
                }
            },
        };

        if let Err(error) = frames.extend(&chunk[..received]) {
            // The backlog cap is fatal: framing is gone.
            warn!(session = id, %error, "dropping session");
            cancel.cancel();
            break;
        }

        loop {
            match frames.next_frame() {
                Ok(None) => break,
                Ok(Some((msg, event))) => {
                    if tx.send(Inbound::Frame { event, msg }).await.is_err() {
                        return;
                    }
                }
                Err(WireError::UnknownOpcode { opcode, event }) => {
                    // Length-implicit framing cannot skip an unknown frame,
                    // so discard the backlog and answer generically.
                    warn!(session = id, opcode, event, "unknown opcode, flushing buffer");
                    frames.clear();
                    if tx.send(Inbound::Malformed { event }).await.is_err() {
                        return;
                    }
                    break;
                }
                Err(error) => {
                    warn!(session = id, %error, "undecodable frame, dropping session");
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

async fn dispatch_loop<W>(
    id: u64,
    mut writer: W,
    mut rx: mpsc::Receiver<Inbound>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let inbound = tokio::select! {
            () = cancel.cancelled() => break,
            inbound = rx.recv() => match inbound {
                Some(inbound) => inbound,
                None => break,
            },
        };

        let (event, reply) = match inbound {
            Inbound::Frame { event, msg } => {
                let reply = handle_request(id, msg, &registry).await;
                (event, reply)
            }
            Inbound::Malformed { event } => (
                event,
                Message::NewConnectionNack {
                    code: NackCode::Malformed,
                },
            ),
        };

        let frame = match reply.frame(event) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(session = id, %error, "unencodable reply");
                continue;
            }
        };
        if let Err(error) = writer.write_all(&frame).await {
            debug!(session = id, %error, "control write failed");
            break;
        }
    }
}

/// Execute one request and produce its reply.
///
/// Acks and nacks arriving from the tool side are themselves protocol
/// violations and draw a malformed nack of the same family.
async fn handle_request(session: u64, msg: Message, registry: &Registry) -> Message {
    match msg {
        Message::NewConnectionRequest => match registry.open_connection(session).await {
            Ok(conn) => Message::NewConnectionAck { conn },
            Err(code) => Message::NewConnectionNack { code },
        },
        Message::CloseConnectionRequest { conn } => {
            match registry.close_connection(session, conn).await {
                Ok(()) => Message::CloseConnectionAck,
                Err(code) => Message::CloseConnectionNack { code },
            }
        }
        Message::ListenRequest { conn, port } => {
            match registry.listen(session, conn, port).await {
                Ok(()) => Message::ListenAck,
                Err(code) => Message::ListenNack { code },
            }
        }
        Message::WaitForPeerRequest { conn } => {
            match registry.wait_for_peer(session, conn).await {
                Ok(peer_port) => Message::WaitForPeerAck { peer_port },
                Err(code) => Message::WaitForPeerNack { code },
            }
        }
        Message::ConnectRequest { conn, port } => {
            match registry.connect(session, conn, port).await {
                Ok(local_port) => Message::ConnectAck { local_port },
                Err(code) => Message::ConnectNack { code },
            }
        }
        Message::SendRequest { conn, data } => {
            match registry.send(session, conn, &data).await {
                Ok(()) => Message::SendAck,
                Err(code) => Message::SendNack { code },
            }
        }
        Message::RecvRequest { conn, max_len } => {
            match registry.recv(session, conn, max_len).await {
                Ok(data) => Message::RecvAck { data },
                Err(code) => Message::RecvNack { code },
            }
        }
        other => {
            warn!(
                session,
                opcode = other.opcode(),
                "non-request message from tool"
            );
            other.family_nack(NackCode::Malformed)
        }
    }
}
