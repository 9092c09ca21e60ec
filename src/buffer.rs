//! Reusable buffer pool for inbound payload staging.
//!
//! One pool is shared by every connection of an engine instance. Read pumps
//! check a buffer out, stage the decoded payload for the message handler,
//! and restore it afterwards. Restored buffers that grew past the retention
//! cap are not kept, so one oversized message cannot permanently inflate
//! the memory held by the pool.

// ============================================================================
// Imports
// ============================================================================

use bytes::BytesMut;
use parking_lot::Mutex;

// ============================================================================
// Constants
// ============================================================================

/// Initial capacity of freshly allocated pool buffers.
const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Buffers grown past this capacity are dropped on restore.
const DEFAULT_RETENTION_CAP: usize = 64 * 1024;

/// Maximum number of idle buffers kept on the shelf.
const DEFAULT_MAX_IDLE: usize = 64;

// ============================================================================
// BufferPool
// ============================================================================

/// Freelist of growable byte buffers.
///
/// Lock hold time is bounded to a `Vec` push/pop; buffers are owned by the
/// checker-outer until explicitly restored.
pub struct BufferPool {
    /// Idle buffers ready for checkout.
    shelf: Mutex<Vec<BytesMut>>,
    /// Capacity of newly allocated buffers.
    buffer_capacity: usize,
    /// Capacity above which a restored buffer is dropped instead of kept.
    retention_cap: usize,
    /// Maximum idle buffers retained.
    max_idle: usize,
}

impl BufferPool {
    /// Creates a pool with default sizing.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_sizes(
            DEFAULT_BUFFER_CAPACITY,
            DEFAULT_RETENTION_CAP,
            DEFAULT_MAX_IDLE,
        )
    }

    /// Creates a pool with explicit sizing.
    ///
    /// # Arguments
    ///
    /// * `buffer_capacity` - Initial capacity of fresh buffers
    /// * `retention_cap` - Capacity above which buffers are not re-shelved
    /// * `max_idle` - Maximum idle buffers kept
    #[must_use]
    pub fn with_sizes(buffer_capacity: usize, retention_cap: usize, max_idle: usize) -> Self {
        Self {
            shelf: Mutex::new(Vec::new()),
            buffer_capacity,
            retention_cap: retention_cap.max(buffer_capacity),
            max_idle,
        }
    }

    /// Checks a buffer out of the pool.
    ///
    /// Returns a shelved buffer if one is idle, otherwise allocates fresh.
    /// The buffer is always empty.
    #[must_use]
    pub fn checkout(&self) -> BytesMut {
        if let Some(buf) = self.shelf.lock().pop() {
            return buf;
        }
        BytesMut::with_capacity(self.buffer_capacity)
    }

    /// Restores a buffer to the pool.
    ///
    /// Buffers grown past the retention cap are dropped; so are buffers
    /// arriving while the shelf is full.
    pub fn restore(&self, mut buf: BytesMut) {
        if buf.capacity() > self.retention_cap {
            return;
        }
        buf.clear();

        let mut shelf = self.shelf.lock();
        if shelf.len() < self.max_idle {
            shelf.push(buf);
        }
    }

    /// Returns the number of idle buffers currently shelved.
    #[inline]
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.shelf.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_fresh_buffer() {
        let pool = BufferPool::new();
        let buf = pool.checkout();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), DEFAULT_BUFFER_CAPACITY);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_restore_and_reuse() {
        let pool = BufferPool::new();
        let mut buf = pool.checkout();
        buf.extend_from_slice(b"payload");
        pool.restore(buf);
        assert_eq!(pool.idle_count(), 1);

        let buf = pool.checkout();
        assert!(buf.is_empty());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_oversized_buffer_not_retained() {
        let pool = BufferPool::with_sizes(1024, 2048, 8);
        let mut buf = pool.checkout();
        buf.extend_from_slice(&vec![0u8; 4096]);
        assert!(buf.capacity() > 2048);

        pool.restore(buf);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_idle_cap() {
        let pool = BufferPool::with_sizes(64, 1024, 2);
        for _ in 0..4 {
            pool.restore(BytesMut::with_capacity(64));
        }
        assert_eq!(pool.idle_count(), 2);
    }
}
