use thiserror::Error;
use uplink_proto::{NackCode, WireError};

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("config file {0} does not exist")]
    ConfigNotFound(String),

    #[error("config is missing the [{0}] section required by the selected backend")]
    MissingBackendConfig(&'static str),

    #[error("socket mode must be an octal number: {0}")]
    InvalidSocketMode(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("request refused by the daemon: {0}")]
    Refused(NackCode),

    #[error("failed to connect to the daemon: {0}")]
    DaemonConnection(String),

    #[error("connection closed by the daemon")]
    Disconnected,

    #[error("unexpected {0} reply from the daemon")]
    UnexpectedReply(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, UplinkError>;
