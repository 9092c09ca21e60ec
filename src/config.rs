//! Engine configuration and lifecycle hooks.
//!
//! A [`Config`] is built once at startup and shared by reference across
//! every connection spawned from one engine instance; it is never mutated
//! after construction. Lifecycle hooks are plain function values stored in
//! the configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use framegate::{BackpressurePolicy, Config};
//!
//! let config = Config::new()
//!     .with_mailbox_capacity(512)
//!     .with_max_message_size(128 * 1024)
//!     .with_backpressure(BackpressurePolicy::Drop)
//!     .with_ping_interval(Duration::from_secs(30))
//!     .on_message(|conn, _opcode, payload| {
//!         println!("{}: {} bytes", conn.id(), payload.len());
//!     });
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::client::backoff::Backoff;
use crate::connection::Connection;
use crate::error::Error;
use crate::protocol::Opcode;

// ============================================================================
// Constants
// ============================================================================

/// Default outbound mailbox capacity.
const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default maximum accepted message size (64 KiB).
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default keepalive ping interval.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Default pong deadline on top of the ping interval.
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Default initial reconnect backoff.
const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_secs(1);

/// Default reconnect backoff ceiling.
const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

// ============================================================================
// Handler Aliases
// ============================================================================

/// Called when a connection is established.
pub type ConnectHandler = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Called exactly once when a connection is torn down.
///
/// The error is `None` for a clean peer-initiated or local close.
pub type DisconnectHandler = Arc<dyn Fn(&Arc<Connection>, Option<&Error>) + Send + Sync>;

/// Called for each decoded data frame.
///
/// The payload borrows a pooled buffer and is only valid for the duration
/// of the call. Handlers must not block indefinitely or they stall the
/// connection's read pump.
pub type MessageHandler = Arc<dyn Fn(&Arc<Connection>, Opcode, &[u8]) + Send + Sync>;

/// Called when a connection-scoped or dial error occurs.
///
/// The connection is `None` for client redial failures, where no
/// connection exists.
pub type ErrorHandler = Arc<dyn Fn(Option<&Arc<Connection>>, &Error) + Send + Sync>;

/// Predicate over the `Origin` header of an upgrade request.
pub type OriginPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

// ============================================================================
// BackpressurePolicy
// ============================================================================

/// Rule applied when a connection's outbound mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Close the connection and return a backpressure error.
    ///
    /// A saturated mailbox usually means a slow or abusive peer; a gateway
    /// sheds such peers rather than accumulate unbounded latency.
    #[default]
    Kick,
    /// Discard the message silently and report success.
    ///
    /// For rate-insensitive broadcast traffic where freshness matters more
    /// than completeness.
    Drop,
    /// Block the caller until space frees up or the connection closes.
    ///
    /// For low-fan-out paths where backpressure should propagate to the
    /// producer.
    Block,
}

// ============================================================================
// Config
// ============================================================================

/// Immutable engine configuration.
///
/// Shared as `Arc<Config>` by every connection of one engine instance.
pub struct Config {
    /// Outbound mailbox capacity per connection.
    pub mailbox_capacity: usize,

    /// Maximum accepted inbound message size in bytes.
    pub max_message_size: usize,

    /// Read timeout; `None` disables it.
    pub read_timeout: Option<Duration>,

    /// Write timeout; `None` disables it.
    pub write_timeout: Option<Duration>,

    /// Policy applied when the outbound mailbox is full.
    pub backpressure: BackpressurePolicy,

    /// Keepalive ping interval (server write pump, client watchdog).
    pub ping_interval: Duration,

    /// Extra grace on top of the ping interval before a client declares
    /// the peer dead.
    pub ping_timeout: Duration,

    /// Client reconnect backoff; a zero initial delay disables
    /// reconnection.
    pub reconnect: Backoff,

    /// Origin predicate; `None` accepts all origins.
    pub(crate) check_origin: Option<OriginPredicate>,

    /// Hook: connection established.
    pub(crate) on_connect: Option<ConnectHandler>,

    /// Hook: connection torn down.
    pub(crate) on_disconnect: Option<DisconnectHandler>,

    /// Hook: data frame decoded.
    pub(crate) on_message: Option<MessageHandler>,

    /// Hook: connection-scoped or dial error.
    pub(crate) on_error: Option<ErrorHandler>,
}

// ============================================================================
// Constructors
// ============================================================================

impl Config {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: None,
            write_timeout: None,
            backpressure: BackpressurePolicy::Kick,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            reconnect: Backoff::new(DEFAULT_RECONNECT_INITIAL, DEFAULT_RECONNECT_MAX),
            check_origin: None,
            on_connect: None,
            on_disconnect: None,
            on_message: None,
            on_error: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Config {
    /// Sets the outbound mailbox capacity (minimum 1).
    #[inline]
    #[must_use]
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Sets the maximum accepted inbound message size in bytes.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the read timeout; a zero duration disables it.
    #[inline]
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Sets the write timeout; a zero duration disables it.
    #[inline]
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Sets the backpressure policy.
    #[inline]
    #[must_use]
    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    /// Sets the keepalive ping interval; a zero duration disables pings.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the pong grace period on top of the ping interval.
    #[inline]
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Sets the client reconnect backoff.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, backoff: Backoff) -> Self {
        self.reconnect = backoff;
        self
    }

    /// Sets the origin predicate applied during the upgrade handshake.
    #[inline]
    #[must_use]
    pub fn with_check_origin<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.check_origin = Some(Arc::new(predicate));
        self
    }

    /// Sets the connect hook.
    #[inline]
    #[must_use]
    pub fn on_connect<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(handler));
        self
    }

    /// Sets the disconnect hook.
    #[inline]
    #[must_use]
    pub fn on_disconnect<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Connection>, Option<&Error>) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(handler));
        self
    }

    /// Sets the message hook.
    #[inline]
    #[must_use]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Connection>, Opcode, &[u8]) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }

    /// Sets the error hook.
    #[inline]
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(Option<&Arc<Connection>>, &Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

// ============================================================================
// Hook Dispatch
// ============================================================================

impl Config {
    /// Invokes the connect hook if set.
    pub(crate) fn emit_connect(&self, conn: &Arc<Connection>) {
        if let Some(handler) = &self.on_connect {
            handler(conn);
        }
    }

    /// Invokes the disconnect hook if set.
    pub(crate) fn emit_disconnect(&self, conn: &Arc<Connection>, err: Option<&Error>) {
        if let Some(handler) = &self.on_disconnect {
            handler(conn, err);
        }
    }

    /// Invokes the message hook if set.
    pub(crate) fn emit_message(&self, conn: &Arc<Connection>, opcode: Opcode, payload: &[u8]) {
        if let Some(handler) = &self.on_message {
            handler(conn, opcode, payload);
        }
    }

    /// Invokes the error hook if set.
    pub(crate) fn emit_error(&self, conn: Option<&Arc<Connection>>, err: &Error) {
        if let Some(handler) = &self.on_error {
            handler(conn, err);
        }
    }

    /// Applies the origin predicate; absent predicate accepts all.
    pub(crate) fn origin_allowed(&self, origin: &str) -> bool {
        match &self.check_origin {
            Some(predicate) => predicate(origin),
            None => true,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("max_message_size", &self.max_message_size)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("backpressure", &self.backpressure)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.mailbox_capacity, 256);
        assert_eq!(config.max_message_size, 64 * 1024);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.write_timeout, None);
        assert_eq!(config.backpressure, BackpressurePolicy::Kick);
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.ping_timeout, Duration::from_secs(10));
        assert!(config.reconnect.is_enabled());
    }

    #[test]
    fn test_builder_chain() {
        let config = Config::new()
            .with_mailbox_capacity(8)
            .with_max_message_size(1024)
            .with_read_timeout(Duration::from_secs(5))
            .with_backpressure(BackpressurePolicy::Block);

        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.backpressure, BackpressurePolicy::Block);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = Config::new()
            .with_read_timeout(Duration::ZERO)
            .with_write_timeout(Duration::ZERO);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.write_timeout, None);
    }

    #[test]
    fn test_mailbox_capacity_floor() {
        let config = Config::new().with_mailbox_capacity(0);
        assert_eq!(config.mailbox_capacity, 1);
    }

    #[test]
    fn test_origin_predicate() {
        let config = Config::new();
        assert!(config.origin_allowed("https://anywhere.example"));

        let config = Config::new().with_check_origin(|origin| origin.ends_with(".example.com"));
        assert!(config.origin_allowed("https://app.example.com"));
        assert!(!config.origin_allowed("https://evil.invalid"));
    }
}
