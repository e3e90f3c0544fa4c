//! Numeric error codes carried by nack replies.

use std::fmt;

/// Reason code carried by every nack message.
///
/// Codes are stable wire values; values this crate does not assign round-trip
/// through [`NackCode::Other`] so a newer daemon can introduce codes without
/// breaking older tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackCode {
    /// The request was structurally invalid or its opcode is not a request.
    Malformed,
    /// The referenced connection id does not exist or belongs to another
    /// session.
    UnknownConnection,
    /// The connection is not in a state that permits the request.
    InvalidState,
    /// The daemon has exhausted its connection id space.
    IdsExhausted,
    /// The backend failed while sending payload.
    SendFailed,
    /// The backend failed while receiving payload.
    RecvFailed,
    /// The backend link is not currently connected.
    BackendOffline,
    /// A code this crate does not assign.
    Other(u16),
}

impl NackCode {
    /// Wire value of this code.
    pub fn to_wire(self) -> u16 {
        match self {
            NackCode::Malformed => 1,
            NackCode::UnknownConnection => 2,
            NackCode::InvalidState => 3,
            NackCode::IdsExhausted => 4,
            NackCode::SendFailed => 5,
            NackCode::RecvFailed => 6,
            NackCode::BackendOffline => 7,
            NackCode::Other(code) => code,
        }
    }

    /// Decode a wire value into a code.
    pub fn from_wire(code: u16) -> Self {
        match code {
            1 => NackCode::Malformed,
            2 => NackCode::UnknownConnection,
            3 => NackCode::InvalidState,
            4 => NackCode::IdsExhausted,
            5 => NackCode::SendFailed,
            6 => NackCode::RecvFailed,
            7 => NackCode::BackendOffline,
            other => NackCode::Other(other),
        }
    }
}

impl fmt::Display for NackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackCode::Malformed => write!(f, "malformed request"),
            NackCode::UnknownConnection => write!(f, "unknown connection id"),
            NackCode::InvalidState => write!(f, "invalid connection state"),
            NackCode::IdsExhausted => write!(f, "connection ids exhausted"),
            NackCode::SendFailed => write!(f, "backend send failed"),
            NackCode::RecvFailed => write!(f, "backend receive failed"),
            NackCode::BackendOffline => write!(f, "backend link offline"),
            NackCode::Other(code) => write!(f, "error code {}", code),
        }
    }
}
