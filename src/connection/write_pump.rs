//! Outbound pump: single writer per connection.
//!
//! All outbound traffic for one connection funnels through this task, so
//! frame boundaries and ordering are never interleaved. The pump drains
//! the control lane ahead of the mailbox and, for server connections,
//! injects keepalive pings on a timer.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{Frame, Opcode};

use super::Connection;
use super::core::Flavor;

// ============================================================================
// Constants
// ============================================================================

/// Ticker period used when keepalive pings are disabled; the guarded
/// select arm never fires.
const IDLE_TICK: Duration = Duration::from_secs(3600);

// ============================================================================
// Pump
// ============================================================================

/// Runs the write pump until the connection dies.
pub(crate) async fn run<S>(
    conn: Arc<Connection>,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut control_rx: mpsc::UnboundedReceiver<Frame>,
    mut mailbox_rx: mpsc::Receiver<Frame>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = Arc::clone(conn.config());
    let ping_enabled = conn.flavor() == Flavor::Server && !config.ping_interval.is_zero();
    let period = if ping_enabled {
        config.ping_interval
    } else {
        IDLE_TICK
    };
    let mut ping_timer = interval_at(Instant::now() + period, period);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut closed = conn.subscribe_close();

    let exit_err: Option<Error> = loop {
        tokio::select! {
            biased;

            _ = async { let _ = closed.wait_for(|c| *c).await; } => {
                let _ = sink.send(Message::Close(None)).await;
                break None;
            }

            maybe = control_rx.recv() => match maybe {
                Some(frame) => {
                    if let Err(e) = send_frame(&mut sink, frame, config.write_timeout).await {
                        break Some(e);
                    }
                }
                None => break None,
            },

            maybe = mailbox_rx.recv() => match maybe {
                Some(frame) => {
                    let is_close = frame.opcode == Opcode::Close;
                    if let Err(e) = send_frame(&mut sink, frame, config.write_timeout).await {
                        break Some(e);
                    }
                    if is_close {
                        break None;
                    }
                }
                None => break None,
            },

            _ = ping_timer.tick(), if ping_enabled => {
                if let Err(e) = send_frame(&mut sink, Frame::ping(Bytes::new()), config.write_timeout).await {
                    break Some(e);
                }
            }
        }
    };

    if let Some(err) = &exit_err {
        config.emit_error(Some(&conn), err);
    }
    conn.shutdown(exit_err.as_ref());
    let _ = sink.close().await;

    debug!(id = %conn.id(), "write pump terminated");
}

// ============================================================================
// Helpers
// ============================================================================

/// Writes and flushes one frame, honoring the write timeout when
/// configured.
///
/// Frames that cannot be converted to a wire message are skipped.
async fn send_frame<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    frame: Frame,
    write_timeout: Option<Duration>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let opcode = frame.opcode;
    let Some(message) = frame.into_message() else {
        warn!(?opcode, "unwritable frame skipped");
        return Ok(());
    };

    match write_timeout {
        Some(limit) => match timeout(limit, sink.send(message)).await {
            Ok(res) => res.map_err(Error::from),
            Err(_) => Err(Error::timeout("write", limit.as_millis() as u64)),
        },
        None => sink.send(message).await.map_err(Error::from),
    }
}

// ============================================================================
// Tests
// ============================================================================
