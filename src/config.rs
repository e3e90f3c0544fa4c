//! Daemon configuration loading and validation.
//!
//! `uplinkd` reads one TOML file (default `/etc/uplink/uplinkd.toml`) at
//! startup. The `[daemon]` section picks the control socket and the backend
//! kind; each backend kind has its own section with transport parameters.
//!
//! ```toml
//! [daemon]
//! control_socket = "/run/uplink/uplinkd.sock"
//! socket_group = "uplink"      # optional
//! socket_mode = "660"          # optional, octal
//! backend = "tcp"
//!
//! [tcp]
//! mode = "client"              # or "server"
//! host = "groundstation.local"
//! port = 4242
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, UplinkError};

/// Top-level configuration file contents.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub daemon: DaemonConfig,
    /// Required when `daemon.backend = "tcp"`.
    pub tcp: Option<TcpConfig>,
}

/// The `[daemon]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Path of the Unix control socket tools connect to.
    pub control_socket: PathBuf,
    /// Group to own the control socket. Only works if the daemon's user is
    /// a member of that group.
    pub socket_group: Option<String>,
    /// Permission bits for the control socket, as an octal string.
    pub socket_mode: Option<String>,
    /// Which backend transport carries the shared link.
    pub backend: BackendKind,
}

/// Supported backend transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Tcp,
}

/// The `[tcp]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    pub mode: TcpMode,
    pub host: String,
    pub port: u16,
}

/// Whether the TCP backend dials out or waits for the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    Server,
    Client,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigNotFound` if the file does not exist, a TOML error if
    /// it does not parse, and validation errors for an invalid socket mode
    /// or a missing backend section.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(UplinkError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.verify()?;
        Ok(config)
    }

    /// Parse a configuration from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.verify()?;
        Ok(config)
    }

    /// The configured socket permission bits, if any.
    pub fn socket_mode_bits(&self) -> Result<Option<u32>> {
        match &self.daemon.socket_mode {
            None => Ok(None),
            Some(mode) => u32::from_str_radix(mode, 8)
                .map(Some)
                .map_err(|_| UplinkError::InvalidSocketMode(mode.clone())),
        }
    }

    fn verify(&self) -> Result<()> {
        self.socket_mode_bits()?;
        match self.daemon.backend {
            BackendKind::Tcp if self.tcp.is_none() => {
                Err(UplinkError::MissingBackendConfig("tcp"))
            }
            _ => Ok(()),
        }
    }
}
