//! Client liveness watchdog.
//!
//! Third worker of a client connection: sends periodic pings over the
//! control lane and fails the connection when the peer misses the pong
//! deadline. The deadline is one ping interval plus the configured grace
//! period since the last received pong.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace};

use crate::error::Error;
use crate::protocol::Frame;

use super::Connection;

// ============================================================================
// Watchdog
// ============================================================================

/// Runs the liveness watchdog until the connection dies.
pub(crate) async fn run(conn: Arc<Connection>) {
    let config = Arc::clone(conn.config());
    let deadline = config.ping_interval + config.ping_timeout;
    let deadline_ms = deadline.as_millis() as u64;

    let mut ticker = interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut closed = conn.subscribe_close();

    loop {
        tokio::select! {
            biased;

            _ = closed.wait_for(|c| *c) => break,

            _ = ticker.tick() => {
                let silent_ms = conn.millis_since_pong();
                if silent_ms > deadline_ms {
                    let err = Error::liveness_timeout(silent_ms);
                    config.emit_error(Some(&conn), &err);
                    conn.shutdown(Some(&err));
                    break;
                }

                trace!(id = %conn.id(), silent_ms, "liveness ping");
                conn.send_control(Frame::ping(Vec::new()));
            }
        }
    }

    debug!(id = %conn.id(), "watchdog terminated");
}
