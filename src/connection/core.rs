//! Connection state and outbound write path.
//!
//! A [`Connection`] owns one upgraded transport, served by two spawned
//! workers (three for client connections): the read pump, the write pump,
//! and the client liveness watchdog. The workers share only the outbound
//! mailbox, the control lane, and the one-shot close signal.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::buffer::BufferPool;
use crate::config::{BackpressurePolicy, Config};
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::identifiers::ConnectionId;
use crate::protocol::Frame;

use super::{read_pump, watchdog, write_pump};

// ============================================================================
// Types
// ============================================================================

/// Per-connection session attachment map.
type SessionMap = FxHashMap<String, Arc<dyn Any + Send + Sync>>;

/// Which side of the wire this connection serves.
///
/// The server is the ping initiator; client connections additionally run a
/// pong-liveness watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    /// Accepted by a [`Server`](crate::Server), tracked in a hub.
    Server,
    /// Dialed by a [`Client`](crate::Client), single instance at a time.
    Client,
}

// ============================================================================
// Connection
// ============================================================================

/// One live connection.
///
/// Cheap to share as `Arc<Connection>`; all operations are safe to call
/// from any task. Dropping the last reference does not close the wire,
/// since the pump workers hold their own references until teardown.
pub struct Connection {
    /// Engine-assigned identity.
    id: ConnectionId,

    /// Server or client flavor.
    flavor: Flavor,

    /// Shared engine configuration.
    config: Arc<Config>,

    /// Peer address, when the transport exposes one.
    remote_addr: Option<SocketAddr>,

    /// Bounded outbound mailbox, drained by the write pump.
    mailbox: mpsc::Sender<Frame>,

    /// Unbounded control lane (pongs, pings); never subject to
    /// backpressure policy.
    control: mpsc::UnboundedSender<Frame>,

    /// Guards the shutdown sequence so it runs exactly once.
    closed: AtomicBool,

    /// One-shot close signal every worker selects on.
    close_tx: watch::Sender<bool>,

    /// Unix millis of the last accumulated inbound data frame.
    last_seen_ms: AtomicU64,

    /// Unix millis of the last received pong (client flavor).
    last_pong_ms: AtomicU64,

    /// Opaque attachment point for upper layers.
    session: RwLock<SessionMap>,
}

// ============================================================================
// Construction
// ============================================================================

impl Connection {
    /// Creates the connection and spawns its pump workers.
    ///
    /// Server connections are registered in the hub immediately before the
    /// pumps start; the read pump unregisters on exit.
    pub(crate) fn spawn<S>(
        ws: WebSocketStream<S>,
        id: ConnectionId,
        flavor: Flavor,
        config: Arc<Config>,
        remote_addr: Option<SocketAddr>,
        hub: Option<Arc<Hub>>,
        pool: Arc<BufferPool>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (close_tx, _) = watch::channel(false);
        let now = unix_millis();

        let conn = Arc::new(Self {
            id,
            flavor,
            config,
            remote_addr,
            mailbox: mailbox_tx,
            control: control_tx,
            closed: AtomicBool::new(false),
            close_tx,
            last_seen_ms: AtomicU64::new(now),
            last_pong_ms: AtomicU64::new(now),
            session: RwLock::new(SessionMap::default()),
        });

        if let Some(hub) = &hub {
            hub.register(Arc::clone(&conn));
        }

        let (sink, stream) = ws.split();
        tokio::spawn(write_pump::run(Arc::clone(&conn), sink, control_rx, mailbox_rx));
        tokio::spawn(read_pump::run(Arc::clone(&conn), stream, hub, pool));

        if flavor == Flavor::Client && !conn.config.ping_interval.is_zero() {
            tokio::spawn(watchdog::run(Arc::clone(&conn)));
        }

        debug!(id = %conn.id, ?remote_addr, "connection spawned");
        conn
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Connection {
    /// Returns the connection's identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the peer address, when the transport exposes one.
    #[inline]
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns `true` once the shutdown sequence has started.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the time of the last accumulated inbound data frame.
    #[must_use]
    pub fn last_seen(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed))
    }

    /// Returns the engine configuration.
    #[inline]
    pub(crate) fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Returns the connection flavor.
    #[inline]
    pub(crate) fn flavor(&self) -> Flavor {
        self.flavor
    }
}

// ============================================================================
// Outbound Writes
// ============================================================================

impl Connection {
    /// Enqueues a text frame for the write pump.
    ///
    /// The payload is copied; the caller may reuse its buffer immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the payload is not valid UTF-8
    /// - [`Error::MailboxFull`] if the mailbox is full under Kick (the
    ///   connection is closed as a side effect)
    /// - [`Error::ConnectionClosed`] if the connection is or becomes closed
    pub async fn write_text(&self, payload: &[u8]) -> Result<()> {
        if std::str::from_utf8(payload).is_err() {
            return Err(Error::protocol("text payload is not valid UTF-8"));
        }
        self.write_frame(Frame::text(Bytes::copy_from_slice(payload)))
            .await
    }

    /// Enqueues a binary frame for the write pump.
    ///
    /// The payload is copied; the caller may reuse its buffer immediately.
    ///
    /// # Errors
    ///
    /// Same as [`write_text`](Connection::write_text) minus the UTF-8 check.
    pub async fn write_binary(&self, payload: &[u8]) -> Result<()> {
        self.write_frame(Frame::binary(Bytes::copy_from_slice(payload)))
            .await
    }

    /// Applies the configured backpressure policy to one outbound frame.
    async fn write_frame(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        match self.config.backpressure {
            BackpressurePolicy::Kick => match self.mailbox.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    let err = Error::mailbox_full(self.config.mailbox_capacity);
                    warn!(id = %self.id, "mailbox full, kicking connection");
                    self.shutdown(Some(&err));
                    Err(err)
                }
                Err(TrySendError::Closed(_)) => Err(Error::ConnectionClosed),
            },
            BackpressurePolicy::Drop => match self.mailbox.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    trace!(id = %self.id, "mailbox full, dropping frame");
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(Error::ConnectionClosed),
            },
            BackpressurePolicy::Block => {
                let mut closed = self.close_tx.subscribe();
                tokio::select! {
                    res = self.mailbox.send(frame) => {
                        res.map_err(|_| Error::ConnectionClosed)
                    }
                    _ = closed.wait_for(|c| *c) => Err(Error::ConnectionClosed),
                }
            }
        }
    }

    /// Enqueues a frame on the control lane, bypassing backpressure.
    pub(crate) fn send_control(&self, frame: Frame) {
        let _ = self.control.send(frame);
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl Connection {
    /// Closes the connection.
    ///
    /// Idempotent: the second and later calls are no-ops. The write pump
    /// answers the close signal by sending a close frame and tearing the
    /// transport down.
    pub fn close(&self) {
        self.shutdown(None);
    }

    /// Waits until the shutdown sequence has started.
    pub async fn wait_closed(&self) {
        let mut rx = self.close_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Starts the shutdown sequence exactly once.
    ///
    /// Returns `true` for the call that actually closed the connection.
    pub(crate) fn shutdown(&self, err: Option<&Error>) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match err {
            Some(e) => debug!(id = %self.id, error = %e, "connection closing"),
            None => debug!(id = %self.id, "connection closing"),
        }
        let _ = self.close_tx.send_replace(true);
        true
    }

    /// Subscribes to the one-shot close signal.
    pub(crate) fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }
}

// ============================================================================
// Activity Timestamps
// ============================================================================

impl Connection {
    /// Records inbound data-frame activity.
    pub(crate) fn touch(&self) {
        self.last_seen_ms.store(unix_millis(), Ordering::Relaxed);
    }

    /// Records a received pong.
    pub(crate) fn touch_pong(&self) {
        self.last_pong_ms.store(unix_millis(), Ordering::Relaxed);
    }

    /// Returns milliseconds since the last received pong.
    pub(crate) fn millis_since_pong(&self) -> u64 {
        unix_millis().saturating_sub(self.last_pong_ms.load(Ordering::Relaxed))
    }
}

// ============================================================================
// Session Attachment
// ============================================================================

impl Connection {
    /// Attaches an opaque value to the connection.
    ///
    /// Upper layers use this to hang session or user state off a
    /// connection; the engine never inspects it.
    pub fn set<V>(&self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.session.write().insert(key.into(), Arc::new(value));
    }

    /// Retrieves a typed attachment.
    ///
    /// Returns `None` if the key is absent or holds a different type.
    #[must_use]
    pub fn get<V>(&self, key: &str) -> Option<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        let value = self.session.read().get(key)?.clone();
        value.downcast::<V>().ok()
    }

    /// Removes an attachment, returning whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.session.write().remove(key).is_some()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("flavor", &self.flavor)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Current wall clock as unix milliseconds.
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Test Support
// ============================================================================

#[cfg(test)]
impl Connection {
    /// Builds a connection with no pumps attached.
    ///
    /// The returned receivers keep the mailbox undrained, which makes
    /// backpressure behavior deterministic to test.
    pub(crate) fn detached(
        config: Arc<Config>,
        id: ConnectionId,
    ) -> (
        Arc<Self>,
        mpsc::Receiver<Frame>,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (close_tx, _) = watch::channel(false);
        let now = unix_millis();

        let conn = Arc::new(Self {
            id,
            flavor: Flavor::Server,
            config,
            remote_addr: None,
            mailbox: mailbox_tx,
            control: control_tx,
            closed: AtomicBool::new(false),
            close_tx,
            last_seen_ms: AtomicU64::new(now),
            last_pong_ms: AtomicU64::new(now),
            session: RwLock::new(SessionMap::default()),
        });

        (conn, mailbox_rx, control_rx)
    }
}

// ============================================================================
// Tests
// ============================================================================
