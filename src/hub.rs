//! Server-side connection registry and broadcast fan-out.
//!
//! The hub tracks the set of live server connections for broadcast and
//! bulk shutdown; it owns no connection lifetime. A connection is present
//! in the hub exactly while its read pump is running: it is inserted
//! immediately before the pumps start and removed immediately after the
//! read pump returns.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::identifiers::ConnectionId;

// ============================================================================
// Hub
// ============================================================================

/// Registry of live server-side connections.
///
/// Every engine instance owns its own hub; there is no process-wide
/// singleton. The live-set lock is held only for map mutation and
/// snapshot copying, never across I/O.
pub struct Hub {
    /// Live connections by ID.
    connections: RwLock<FxHashMap<ConnectionId, Arc<Connection>>>,

    /// Monotonic ID generator.
    next_id: AtomicU64,

    /// Open flag; flipped exactly once by [`close`](Hub::close).
    open: AtomicBool,
}

impl Hub {
    /// Creates an empty, open hub.
    #[must_use]
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
            open: AtomicBool::new(true),
        })
    }

    /// Assigns the next connection ID.
    pub(crate) fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Inserts a connection into the live-set.
    ///
    /// A connection arriving after [`close`](Hub::close) is not inserted;
    /// it is closed instead so late finishers are never re-added.
    pub(crate) fn register(&self, conn: Arc<Connection>) {
        let mut map = self.connections.write();
        if !self.open.load(Ordering::SeqCst) {
            drop(map);
            debug!(id = %conn.id(), "hub closed, refusing registration");
            conn.close();
            return;
        }
        map.insert(conn.id(), conn);
    }

    /// Removes a connection from the live-set.
    pub(crate) fn unregister(&self, id: ConnectionId) {
        if self.connections.write().remove(&id).is_some() {
            debug!(id = %id, "connection unregistered");
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

impl Hub {
    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no connections are live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Returns `true` until [`close`](Hub::close) is called.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Looks up a live connection by ID.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Copies the current live-set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }
}

// ============================================================================
// Broadcast
// ============================================================================

impl Hub {
    /// Broadcasts a text frame to every live connection.
    pub async fn broadcast_text(&self, payload: &[u8]) {
        self.broadcast_text_filtered(payload, |_| true).await;
    }

    /// Broadcasts a binary frame to every live connection.
    pub async fn broadcast_binary(&self, payload: &[u8]) {
        self.broadcast_binary_filtered(payload, |_| true).await;
    }

    /// Broadcasts a text frame to connections matching the filter.
    ///
    /// Best-effort: a write failure for one peer never aborts the fan-out
    /// to the others.
    pub async fn broadcast_text_filtered<F>(&self, payload: &[u8], filter: F)
    where
        F: Fn(&Arc<Connection>) -> bool,
    {
        for conn in self.snapshot() {
            if !filter(&conn) {
                continue;
            }
            if let Err(e) = conn.write_text(payload).await {
                debug!(id = %conn.id(), error = %e, "broadcast write failed");
            }
        }
    }

    /// Broadcasts a binary frame to connections matching the filter.
    ///
    /// Best-effort, like
    /// [`broadcast_text_filtered`](Hub::broadcast_text_filtered).
    pub async fn broadcast_binary_filtered<F>(&self, payload: &[u8], filter: F)
    where
        F: Fn(&Arc<Connection>) -> bool,
    {
        for conn in self.snapshot() {
            if !filter(&conn) {
                continue;
            }
            if let Err(e) = conn.write_binary(payload).await {
                debug!(id = %conn.id(), error = %e, "broadcast write failed");
            }
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl Hub {
    /// Closes the hub and every tracked connection.
    ///
    /// Idempotent: only the first call drains the live-set.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<_> = {
            let mut map = self.connections.write();
            map.drain().map(|(_, conn)| conn).collect()
        };

        info!(count = drained.len(), "hub closing");
        for conn in drained {
            conn.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::Config;

    fn detached(id: u64) -> (
        Arc<Connection>,
        tokio::sync::mpsc::Receiver<crate::protocol::Frame>,
        tokio::sync::mpsc::UnboundedReceiver<crate::protocol::Frame>,
    ) {
        Connection::detached(Arc::new(Config::new()), ConnectionId::new(id))
    }

    #[tokio::test]
    async fn test_id_generator_is_monotonic() {
        let hub = Hub::new();
        let first = hub.next_id();
        let second = hub.next_id();
        assert!(second > first);
        assert_eq!(first.as_u64(), 1);
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = Hub::new();
        let (conn, _mrx, _crx) = detached(1);

        hub.register(Arc::clone(&conn));
        assert_eq!(hub.len(), 1);
        assert!(hub.get(conn.id()).is_some());

        hub.unregister(conn.id());
        assert!(hub.is_empty());
        assert!(hub.get(conn.id()).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_filtered_delivers_to_subset() {
        let hub = Hub::new();
        let (even, mut even_rx, _ecrx) = detached(2);
        let (odd, mut odd_rx, _ocrx) = detached(3);
        hub.register(Arc::clone(&even));
        hub.register(Arc::clone(&odd));

        hub.broadcast_text_filtered(b"tick", |c| c.id().as_u64() % 2 == 0)
            .await;

        let frame = even_rx.try_recv().expect("even connection receives");
        assert_eq!(frame.payload.as_ref(), b"tick");
        assert!(odd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_survives_closed_peer() {
        let hub = Hub::new();
        let (dead, _drx, _dcrx) = detached(1);
        let (live, mut live_rx, _lcrx) = detached(2);
        hub.register(Arc::clone(&dead));
        hub.register(Arc::clone(&live));
        dead.close();

        hub.broadcast_binary(b"\x01").await;

        let frame = live_rx.try_recv().expect("live connection receives");
        assert_eq!(frame.payload.as_ref(), b"\x01");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_drains() {
        let hub = Hub::new();
        let (conn, _mrx, _crx) = detached(1);
        hub.register(Arc::clone(&conn));

        hub.close();
        assert!(!hub.is_open());
        assert!(hub.is_empty());
        assert!(conn.is_closed());

        // Second close is a no-op.
        hub.close();
    }

    #[tokio::test]
    async fn test_register_after_close_refused() {
        let hub = Hub::new();
        hub.close();

        let (conn, _mrx, _crx) = detached(1);
        hub.register(Arc::clone(&conn));
        assert!(hub.is_empty());
        assert!(conn.is_closed());
    }
}
