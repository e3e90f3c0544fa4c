//! Incremental frame extraction from a byte stream.

use bytes::BytesMut;

use crate::error::WireError;
use crate::message::{EventId, Message};

/// Cap on buffered, not-yet-framed bytes (8 MiB).
///
/// Bounds the memory a single hostile or buggy tool can pin in the daemon:
/// a stream that accumulates this much data without completing a frame is
/// not speaking the protocol and gets cut off.
pub const MAX_BUFFER: usize = 8 * 1024 * 1024;

/// Accumulates raw bytes and splits them into complete frames.
///
/// Bytes arrive in whatever chunks the transport delivers them; a frame may
/// span several reads or share a read with its neighbors. `extend` buffers
/// a chunk, `next_frame` repeatedly yields complete messages and leaves any
/// incomplete trailing data buffered for the next read.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a chunk of received bytes.
    ///
    /// # Errors
    ///
    /// Returns `BufferOverflow` if buffering the chunk would push the
    /// not-yet-framed backlog past [`MAX_BUFFER`]. This is fatal to the
    /// stream: framing can no longer be trusted.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), WireError> {
        let size = self.buf.len() + data.len();
        if size > MAX_BUFFER {
            return Err(WireError::BufferOverflow {
                size,
                cap: MAX_BUFFER,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Extract the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when the buffered data does not yet form a
    /// complete frame.
    ///
    /// # Errors
    ///
    /// Propagates decode errors; `UnknownOpcode` leaves the buffer intact
    /// so the caller can decide whether to flush and continue or close.
    pub fn next_frame(&mut self) -> Result<Option<(Message, EventId)>, WireError> {
        match Message::frame_len(&self.buf)? {
            None => Ok(None),
            // The header declares a length the payload has not caught up
            // with yet.
            Some(total) if total > self.buf.len() => Ok(None),
            Some(total) => {
                let frame = self.buf.split_to(total);
                let decoded = Message::decode(&frame)?;
                Ok(Some(decoded))
            }
        }
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered, not-yet-framed bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
