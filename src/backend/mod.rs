//! Backend capability: the shared transport link behind the daemon.
//!
//! The daemon owns exactly one backend. All logical connections share it;
//! multiplexing happens in the message-processing layer, never down here.
//! Backends only move bytes — retransmission, windowing, and congestion
//! handling belong to the transport protocol running over the link and are
//! not this daemon's business.
//!
//! Concrete transports are selected by configuration at startup via
//! [`from_config`], not by inheritance: anything implementing [`Backend`]
//! can carry the link.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{BackendKind, Config};
use crate::error::{Result, UplinkError};

pub mod mock;
pub mod tcp;

pub use mock::{MockBackend, MockHandle};
pub use tcp::TcpBackend;

/// Errors a backend transport can produce.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend transport not established")]
    NotEstablished,

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract every backend transport must satisfy.
///
/// `establish` runs once at daemon startup, before any session may use the
/// backend. `send` and `recv` are never called concurrently: the daemon
/// serializes all backend I/O behind one lock, since interleaved writes on
/// a single physical link would corrupt the byte stream.
#[async_trait]
pub trait Backend: Send {
    /// Bring the link up: connect, or listen and accept the peer,
    /// depending on the transport's configuration.
    async fn establish(&mut self) -> std::result::Result<(), BackendError>;

    /// Send bytes over the link, returning how many were accepted.
    ///
    /// Partial sends are allowed; the caller retries the remainder.
    async fn send(&mut self, data: &[u8]) -> std::result::Result<usize, BackendError>;

    /// Receive up to `max_len` bytes from the link.
    ///
    /// An empty result signals end-of-stream, not an error.
    async fn recv(&mut self, max_len: usize) -> std::result::Result<Vec<u8>, BackendError>;

    /// Non-blocking probe: can the link move data right now?
    fn is_connected(&self) -> bool;
}

/// Build the backend named by the configuration.
///
/// # Errors
///
/// Returns `MissingBackendConfig` if the selected backend's section is
/// absent (also caught at config load; rechecked here so this function is
/// safe on any `Config` value).
pub fn from_config(config: &Config) -> Result<Box<dyn Backend>> {
    match config.daemon.backend {
        BackendKind::Tcp => {
            let tcp = config
                .tcp
                .as_ref()
                .ok_or(UplinkError::MissingBackendConfig("tcp"))?;
            Ok(Box::new(TcpBackend::new(tcp.clone())))
        }
    }
}
