//! Wire-level error types.

use thiserror::Error;

use crate::message::EventId;

/// Errors produced while framing, encoding, or decoding protocol messages.
///
/// `UnknownOpcode` carries the event id from the offending frame's header so
/// the daemon can still answer it with a malformed-request nack. All other
/// variants describe frames that cannot be trusted at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown opcode {opcode}")]
    UnknownOpcode { opcode: u16, event: EventId },

    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("trailing bytes after frame: frame is {frame_len} bytes, buffer has {have}")]
    TrailingBytes { frame_len: usize, have: usize },

    #[error("payload too large for a u16 length prefix: {len} bytes")]
    PayloadTooLarge { len: usize },

    #[error("receive buffer overflow: {size} bytes exceeds the {cap} byte cap")]
    BufferOverflow { size: usize, cap: usize },
}
