//! Wire frame types.
//!
//! This module defines the opcode taxonomy and the outbound [`Frame`]
//! envelope queued in connection mailboxes. Wire-level framing itself
//! (headers, masking, fragmentation) follows the standard WebSocket frame
//! grammar implemented by tungstenite; nothing here redefines it.
//!
//! # Frame Flow
//!
//! | Direction | Path |
//! |-----------|------|
//! | Outbound data | `write_text`/`write_binary` → mailbox → write pump |
//! | Outbound control | read pump / watchdog → control lane → write pump |
//! | Inbound | read pump decodes [`Message`] directly, no `Frame` involved |

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Opcode
// ============================================================================

/// Opcode of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// UTF-8 text payload.
    Text,
    /// Arbitrary binary payload.
    Binary,
    /// Keepalive probe.
    Ping,
    /// Keepalive answer.
    Pong,
    /// Close handshake.
    Close,
}

impl Opcode {
    /// Returns `true` for ping/pong/close frames.
    ///
    /// Control frames are handled inline by the read pump and never reach
    /// the message handler.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Ping | Self::Pong | Self::Close)
    }

    /// Returns `true` for text/binary frames.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One outbound frame: an opcode plus its payload.
///
/// Callers' buffers are copied into the frame at write time, so the caller
/// may reuse its own buffer immediately after the write call returns.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame opcode.
    pub opcode: Opcode,
    /// Frame payload (empty for close frames).
    pub payload: Bytes,
}

impl Frame {
    /// Creates a text frame.
    ///
    /// The payload must already be validated as UTF-8; [`into_message`]
    /// re-checks and skips the frame otherwise.
    ///
    /// [`into_message`]: Frame::into_message
    #[inline]
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Text,
            payload: payload.into(),
        }
    }

    /// Creates a binary frame.
    #[inline]
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Binary,
            payload: payload.into(),
        }
    }

    /// Creates a ping frame.
    #[inline]
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Ping,
            payload: payload.into(),
        }
    }

    /// Creates a pong frame echoing the ping payload.
    #[inline]
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Pong,
            payload: payload.into(),
        }
    }

    /// Creates a close frame.
    #[inline]
    #[must_use]
    pub fn close() -> Self {
        Self {
            opcode: Opcode::Close,
            payload: Bytes::new(),
        }
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Converts the frame into a wire message.
    ///
    /// Returns `None` for frames the write pump must skip: text frames whose
    /// payload is not valid UTF-8.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        match self.opcode {
            Opcode::Text => {
                let text = String::from_utf8(self.payload.to_vec()).ok()?;
                Some(Message::Text(text.into()))
            }
            Opcode::Binary => Some(Message::Binary(self.payload)),
            Opcode::Ping => Some(Message::Ping(self.payload)),
            Opcode::Pong => Some(Message::Pong(self.payload)),
            Opcode::Close => Some(Message::Close(None)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_classes() {
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Pong.is_control());
        assert!(Opcode::Close.is_control());
        assert!(Opcode::Text.is_data());
        assert!(Opcode::Binary.is_data());
        assert!(!Opcode::Text.is_control());
    }

    #[test]
    fn test_text_frame_into_message() {
        let frame = Frame::text(&b"hello"[..]);
        assert_eq!(frame.opcode, Opcode::Text);
        assert!(matches!(frame.into_message(), Some(Message::Text(t)) if t.as_str() == "hello"));
    }

    #[test]
    fn test_invalid_utf8_text_is_skipped() {
        let frame = Frame::text(vec![0xff, 0xfe]);
        assert!(frame.into_message().is_none());
    }

    #[test]
    fn test_binary_frame_into_message() {
        let frame = Frame::binary(vec![1, 2, 3]);
        assert!(
            matches!(frame.into_message(), Some(Message::Binary(b)) if b.as_ref() == b"\x01\x02\x03")
        );
    }

    #[test]
    fn test_close_frame() {
        let frame = Frame::close();
        assert!(frame.is_empty());
        assert!(matches!(frame.into_message(), Some(Message::Close(None))));
    }
}
