//! Wire protocol shared by the uplink daemon and tools.
//!
//! These types define the binary request/acknowledge protocol spoken on the
//! daemon's control socket. Any tool that wants to talk to `uplinkd` directly
//! can link this crate and use [`Message`] plus [`FrameBuffer`] without
//! pulling in the daemon itself.
//!
//! # Frame Format
//!
//! Every frame starts with a fixed 6-byte big-endian header:
//!
//! - 2 bytes: opcode
//! - 4 bytes: event id (split into two u16 halves on the wire)
//!
//! followed by an opcode-specific payload. The event id correlates replies
//! with requests: the daemon echoes the event id of the request a reply
//! answers.

pub mod codes;
pub mod error;
pub mod frame;
pub mod message;

pub use codes::*;
pub use error::*;
pub use frame::*;
pub use message::*;
