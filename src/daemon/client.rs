//! Tool-side client for the control protocol.
//!
//! [`ToolClient`] is what a tool links against to talk to `uplinkd`: it
//! dials the control socket, frames requests, and decodes replies into
//! typed results. The daemon answers a session's requests in order and the
//! client sends one request at a time, so each reply is matched against
//! the event id of the outstanding request; a mismatch means the peer is
//! not a well-behaved daemon and is reported as such.
//!
//! Nacks become [`UplinkError::Refused`] carrying the daemon's code, so
//! callers can tell "the daemon said no" apart from transport failures.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;
use uplink_proto::{ConnId, EventId, FrameBuffer, Message};

use crate::error::{Result, UplinkError};

pub struct ToolClient {
    stream: UnixStream,
    frames: FrameBuffer,
    next_event: EventId,
}

impl ToolClient {
    /// Connect to the daemon's control socket.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.map_err(|error| {
            UplinkError::DaemonConnection(format!(
                "cannot reach uplinkd at {}: {error}",
                socket_path.display()
            ))
        })?;
        debug!(path = %socket_path.display(), "connected to uplinkd");
        Ok(Self {
            stream,
            frames: FrameBuffer::new(),
            next_event: 1,
        })
    }

    /// Open a logical connection.
    pub async fn open(&mut self) -> Result<ConnId> {
        match self.request(Message::NewConnectionRequest).await? {
            Message::NewConnectionAck { conn } => Ok(conn),
            Message::NewConnectionNack { code } => Err(UplinkError::Refused(code)),
            _ => Err(UplinkError::UnexpectedReply("new connection")),
        }
    }

    /// Close a logical connection.
    pub async fn close(&mut self, conn: ConnId) -> Result<()> {
        match self.request(Message::CloseConnectionRequest { conn }).await? {
            Message::CloseConnectionAck => Ok(()),
            Message::CloseConnectionNack { code } => Err(UplinkError::Refused(code)),
            _ => Err(UplinkError::UnexpectedReply("close connection")),
        }
    }

    /// Mark a connection as listening on `port`.
    pub async fn listen(&mut self, conn: ConnId, port: u16) -> Result<()> {
        match self.request(Message::ListenRequest { conn, port }).await? {
            Message::ListenAck => Ok(()),
            Message::ListenNack { code } => Err(UplinkError::Refused(code)),
            _ => Err(UplinkError::UnexpectedReply("listen")),
        }
    }

    /// Complete a listening connection; returns the peer's port.
    pub async fn wait_for_peer(&mut self, conn: ConnId) -> Result<u16> {
        match self.request(Message::WaitForPeerRequest { conn }).await? {
            Message::WaitForPeerAck { peer_port } => Ok(peer_port),
            Message::WaitForPeerNack { code } => Err(UplinkError::Refused(code)),
            _ => Err(UplinkError::UnexpectedReply("wait for peer")),
        }
    }

    /// Establish an outbound connection to `port`; returns the local port
    /// the daemon assigned.
    pub async fn connect_peer(&mut self, conn: ConnId, port: u16) -> Result<u16> {
        match self.request(Message::ConnectRequest { conn, port }).await? {
            Message::ConnectAck { local_port } => Ok(local_port),
            Message::ConnectNack { code } => Err(UplinkError::Refused(code)),
            _ => Err(UplinkError::UnexpectedReply("connect")),
        }
    }

    /// Send payload on an established connection.
    pub async fn send(&mut self, conn: ConnId, data: &[u8]) -> Result<()> {
        let msg = Message::SendRequest {
            conn,
            data: data.to_vec(),
        };
        match self.request(msg).await? {
            Message::SendAck => Ok(()),
            Message::SendNack { code } => Err(UplinkError::Refused(code)),
            _ => Err(UplinkError::UnexpectedReply("send")),
        }
    }

    /// Receive up to `max_len` payload bytes from an established
    /// connection. An empty result means no data was available.
    pub async fn recv(&mut self, conn: ConnId, max_len: u16) -> Result<Vec<u8>> {
        match self.request(Message::RecvRequest { conn, max_len }).await? {
            Message::RecvAck { data } => Ok(data),
            Message::RecvNack { code } => Err(UplinkError::Refused(code)),
            _ => Err(UplinkError::UnexpectedReply("recv")),
        }
    }

    async fn request(&mut self, msg: Message) -> Result<Message> {
        let event = self.next_event;
        self.next_event += 1;

        self.stream.write_all(&msg.frame(event)?).await?;

        let mut chunk = [0u8; 4096];
        loop {
            if let Some((reply, reply_event)) = self.frames.next_frame()? {
                if reply_event != event {
                    return Err(UplinkError::UnexpectedReply("out-of-order"));
                }
                return Ok(reply);
            }
            let received = self.stream.read(&mut chunk).await?;
            if received == 0 {
                return Err(UplinkError::Disconnected);
            }
            self.frames.extend(&chunk[..received])?;
        }
    }
}
