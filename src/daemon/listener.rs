//! Unix control socket: where tools reach the daemon.
//!
//! The listener owns the socket file for the daemon's lifetime. Binding
//! creates the parent directory if needed, replaces any stale socket left
//! by an earlier run, and restricts permissions before the first accept so
//! there is no window where an unintended user could connect. Dropping the
//! listener removes the socket file.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::error::{Result, UplinkError};

/// Permissions applied at bind time, before any group/mode overrides.
const DEFAULT_SOCKET_MODE: u32 = 0o600;

pub struct ControlListener {
    listener: UnixListener,
    socket_path: PathBuf,
}

/// One accepted tool connection.
pub struct ControlConnection {
    stream: UnixStream,
}

impl ControlConnection {
    pub fn into_stream(self) -> UnixStream {
        self.stream
    }
}

impl ControlListener {
    /// Bind the control socket at `path`.
    pub fn bind(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        if path.exists() {
            // Left over from an unclean shutdown; a live daemon would still
            // hold the bind.
            warn!(path = %path.display(), "removing stale control socket");
            fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(DEFAULT_SOCKET_MODE))?;
        info!(path = %path.display(), "control socket bound");

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
        })
    }

    /// Override the socket's permission bits.
    pub fn set_permissions(&self, mode: u32) -> Result<()> {
        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(mode))?;
        debug!(path = %self.socket_path.display(), mode = format_args!("{mode:o}"), "socket mode set");
        Ok(())
    }

    /// Hand group ownership of the socket to `group`.
    pub fn set_group(&self, group: &str) -> Result<()> {
        let resolved = nix::unistd::Group::from_name(group)
            .map_err(|_| UplinkError::UnknownGroup(group.to_string()))?
            .ok_or_else(|| UplinkError::UnknownGroup(group.to_string()))?;
        std::os::unix::fs::chown(&self.socket_path, None, Some(resolved.gid.as_raw()))?;
        debug!(path = %self.socket_path.display(), group, "socket group set");
        Ok(())
    }

    /// Wait for the next tool to connect.
    pub async fn accept(&self) -> Result<ControlConnection> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(ControlConnection { stream })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.socket_path) {
            warn!(path = %self.socket_path.display(), %error, "failed to remove control socket");
        }
    }
}
