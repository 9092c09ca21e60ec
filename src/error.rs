//! Error types for the connection engine.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use framegate::{Connection, Result};
//!
//! async fn example(conn: &Connection) -> Result<()> {
//!     conn.write_text(b"hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::OriginRejected`] |
//! | Backpressure | [`Error::MailboxFull`] |
//! | Protocol | [`Error::MessageTooLarge`], [`Error::Protocol`] |
//! | Liveness | [`Error::Timeout`], [`Error::LivenessTimeout`] |
//! | External | [`Error::Io`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when engine configuration or call arguments are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Dial target URL is invalid.
    ///
    /// Returned when the URL cannot be parsed or uses an unsupported scheme.
    #[error("Invalid URL: {message}")]
    InvalidUrl {
        /// Description of what is wrong with the URL.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection establishment failed.
    ///
    /// Returned when a dial or upgrade handshake cannot be completed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection is closed.
    ///
    /// Returned when an operation targets a connection that has already been
    /// torn down, or that closes while the operation is in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Upgrade request rejected by the origin predicate.
    ///
    /// Returned from the upgrade boundary; no connection is created.
    #[error("Origin rejected: {origin}")]
    OriginRejected {
        /// The rejected Origin header value.
        origin: String,
    },

    // ========================================================================
    // Backpressure Errors
    // ========================================================================
    /// Outbound mailbox is full under the Kick policy.
    ///
    /// The connection is closed as a side effect of this error.
    #[error("Outbound mailbox full (capacity {capacity})")]
    MailboxFull {
        /// Configured mailbox capacity.
        capacity: usize,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Inbound message exceeds the configured maximum size.
    ///
    /// Terminal for the connection.
    #[error("Message too large: {size} bytes (limit {limit})")]
    MessageTooLarge {
        /// Observed payload size in bytes.
        size: usize,
        /// Configured maximum message size in bytes.
        limit: usize,
    },

    /// Protocol violation.
    ///
    /// Returned when wire traffic or payload content is malformed.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Liveness Errors
    // ========================================================================
    /// Operation timeout.
    ///
    /// Returned when a read or write exceeds its configured timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Peer missed the pong deadline.
    ///
    /// A single liveness class: no distinction is made between a slow peer
    /// and a dead one.
    #[error("Liveness timeout after {timeout_ms}ms without pong")]
    LivenessTimeout {
        /// Milliseconds since the last pong.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an origin rejection error.
    #[inline]
    pub fn origin_rejected(origin: impl Into<String>) -> Self {
        Self::OriginRejected {
            origin: origin.into(),
        }
    }

    /// Creates a mailbox full error.
    #[inline]
    pub fn mailbox_full(capacity: usize) -> Self {
        Self::MailboxFull { capacity }
    }

    /// Creates a message too large error.
    #[inline]
    pub fn message_too_large(size: usize, limit: usize) -> Self {
        Self::MessageTooLarge { size, limit }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a liveness timeout error.
    #[inline]
    pub fn liveness_timeout(timeout_ms: u64) -> Self {
        Self::LivenessTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::LivenessTimeout { .. })
    }

    /// Returns `true` if this is a backpressure error.
    #[inline]
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::MailboxFull { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is terminal for the affected connection.
    ///
    /// Non-terminal errors are returned to the caller without tearing the
    /// connection down.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Config { .. } | Self::InvalidUrl { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("handshake refused");
        assert_eq!(err.to_string(), "Connection failed: handshake refused");
    }

    #[test]
    fn test_mailbox_full_display() {
        let err = Error::mailbox_full(256);
        assert_eq!(err.to_string(), "Outbound mailbox full (capacity 256)");
    }

    #[test]
    fn test_message_too_large_display() {
        let err = Error::message_too_large(70_000, 65_536);
        assert_eq!(
            err.to_string(),
            "Message too large: 70000 bytes (limit 65536)"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::timeout("read", 5000);
        let liveness_err = Error::liveness_timeout(25_000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(liveness_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_backpressure() {
        assert!(Error::mailbox_full(1).is_backpressure());
        assert!(!Error::ConnectionClosed.is_backpressure());
    }

    #[test]
    fn test_is_connection_error() {
        let conn_err = Error::connection("test");
        let closed_err = Error::ConnectionClosed;
        let other_err = Error::config("test");

        assert!(conn_err.is_connection_error());
        assert!(closed_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_is_terminal() {
        assert!(Error::mailbox_full(1).is_terminal());
        assert!(Error::liveness_timeout(25_000).is_terminal());
        assert!(!Error::config("bad option").is_terminal());
        assert!(!Error::invalid_url("no scheme").is_terminal());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionReset, "reset by peer");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
