//! TCP backend: a socket stand-in for the real radio link.
//!
//! Useful for ground testing and for deployments where the link hardware is
//! reached through a TCP gateway. In server mode the backend binds the
//! configured address and waits for exactly one peer; in client mode it
//! dials out. Either way there is a single stream for the daemon's
//! lifetime — if it drops, the backend reports itself disconnected.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use super::{Backend, BackendError};
use crate::config::{TcpConfig, TcpMode};

pub struct TcpBackend {
    config: TcpConfig,
    stream: Option<TcpStream>,
}

impl TcpBackend {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }
}

#[async_trait]
impl Backend for TcpBackend {
    async fn establish(&mut self) -> Result<(), BackendError> {
        let addr = (self.config.host.as_str(), self.config.port);
        let stream = match self.config.mode {
            TcpMode::Server => {
                let listener = TcpListener::bind(addr).await?;
                info!(
                    host = %self.config.host,
                    port = self.config.port,
                    "tcp backend waiting for peer"
                );
                let (stream, peer) = listener.accept().await?;
                info!(peer = %peer, "tcp backend peer connected");
                stream
            }
            TcpMode::Client => {
                info!(
                    host = %self.config.host,
                    port = self.config.port,
                    "tcp backend connecting"
                );
                let stream = TcpStream::connect(addr).await?;
                info!("tcp backend connected");
                stream
            }
        };
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, BackendError> {
        let stream = self.stream.as_mut().ok_or(BackendError::NotEstablished)?;
        let sent = stream.write(data).await?;
        Ok(sent)
    }

    async fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, BackendError> {
        if max_len == 0 {
            return Ok(Vec::new());
        }
        let stream = self.stream.as_mut().ok_or(BackendError::NotEstablished)?;
        let mut buf = vec![0u8; max_len];
        let received = stream.read(&mut buf).await?;
        buf.truncate(received);
        if received == 0 {
            // Peer closed the link.
            self.stream = None;
        }
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_config(port: u16) -> TcpConfig {
        TcpConfig {
            mode: TcpMode::Client,
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn test_not_established_until_establish() {
        let mut backend = TcpBackend::new(client_config(1));
        assert!(!backend.is_connected());
        let err = backend.send(b"nope").await.unwrap_err();
        assert!(matches!(err, BackendError::NotEstablished));
        let err = backend.recv(16).await.unwrap_err();
        assert!(matches!(err, BackendError::NotEstablished));
    }

    #[tokio::test]
    async fn test_client_roundtrip_against_local_listener() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            stream.write_all(b"world").await.unwrap();
        });

        let mut backend = TcpBackend::new(client_config(port));
        backend.establish().await.unwrap();
        assert!(backend.is_connected());

        let mut remaining: &[u8] = b"hello";
        while !remaining.is_empty() {
            let sent = backend.send(remaining).await.unwrap();
            remaining = &remaining[sent..];
        }

        let mut received = Vec::new();
        while received.len() < 5 {
            let chunk = backend.recv(5 - received.len()).await.unwrap();
            assert!(!chunk.is_empty());
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"world");

        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut backend = TcpBackend::new(client_config(port));
        backend.establish().await.unwrap();
        peer.await.unwrap();

        let data = backend.recv(16).await.unwrap();
        assert!(data.is_empty());
        assert!(!backend.is_connected());
    }
}
