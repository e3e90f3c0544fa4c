//! The uplinkd daemon: control socket, sessions, and shared state.
//!
//! One [`ControlListener`] accepts tool connections; each becomes a
//! [`Session`] with its own tasks; all sessions share one [`Registry`]
//! that owns the connection tables and the backend link. [`ToolClient`]
//! is the matching tool-side API.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod client;
pub mod listener;
pub mod registry;
pub mod session;

pub use client::ToolClient;
pub use listener::{ControlConnection, ControlListener};
pub use registry::{LinkState, Registry};
pub use session::Session;

use crate::error::Result;

/// How long each session gets to unwind after shutdown is requested.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Accept tool connections until `cancel` fires, then wait for every
/// session to unwind.
///
/// Consumes the listener so the socket file is removed when serving ends.
pub async fn serve(
    listener: ControlListener,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut sessions = Vec::new();

    loop {
        let conn = tokio::select! {
            () = cancel.cancelled() => break,
            conn = listener.accept() => conn,
        };

        match conn {
            Ok(conn) => {
                let session = registry.register_session().await;
                info!(session, "tool connected");
                sessions.push(Session::spawn(
                    session,
                    conn.into_stream(),
                    Arc::clone(&registry),
                    cancel.child_token(),
                ));
            }
            Err(error) => {
                warn!(%error, "accept failed");
            }
        }

        sessions.retain(|handle| !handle.is_finished());
    }

    info!(active = sessions.len(), "shutting down, waiting for sessions");
    for handle in sessions {
        if tokio::time::timeout(SETTLE_TIMEOUT, handle).await.is_err() {
            warn!("session did not unwind in time");
        }
    }
    Ok(())
}
