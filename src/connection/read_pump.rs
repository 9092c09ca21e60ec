//! Inbound pump: raw stream to frames and liveness events.
//!
//! One task per connection. Control frames are handled inline; data frames
//! are staged through the shared [`BufferPool`] and dispatched to the
//! message hook synchronously. Pump exit always runs the teardown
//! sequence: close signal, hub unregistration, disconnect hook.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::buffer::BufferPool;
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::protocol::{Frame, Opcode};

use super::Connection;

// ============================================================================
// Pump
// ============================================================================

/// Runs the read pump until the connection dies.
pub(crate) async fn run<S>(
    conn: Arc<Connection>,
    mut stream: SplitStream<WebSocketStream<S>>,
    hub: Option<Arc<Hub>>,
    pool: Arc<BufferPool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = Arc::clone(conn.config());
    let mut closed = conn.subscribe_close();

    let exit_err: Option<Error> = loop {
        let msg = tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => break None,
            msg = next_message(&mut stream, config.read_timeout) => msg,
        };

        match msg {
            Ok(Some(Message::Text(text))) => {
                if let Err(e) = deliver(&conn, &pool, Opcode::Text, text.as_bytes()) {
                    break Some(e);
                }
            }
            Ok(Some(Message::Binary(data))) => {
                if let Err(e) = deliver(&conn, &pool, Opcode::Binary, &data) {
                    break Some(e);
                }
            }
            Ok(Some(Message::Ping(payload))) => {
                trace!(id = %conn.id(), "ping received");
                conn.send_control(Frame::pong(payload));
            }
            Ok(Some(Message::Pong(_))) => {
                trace!(id = %conn.id(), "pong received");
                conn.touch_pong();
            }
            Ok(Some(Message::Close(_))) => {
                debug!(id = %conn.id(), "close frame from peer");
                break None;
            }
            // Raw frames are not surfaced by message-level reads; discard
            // without buffering.
            Ok(Some(_)) => {
                trace!(id = %conn.id(), "unexpected frame discarded");
            }
            Ok(None) => {
                debug!(id = %conn.id(), "stream ended");
                break None;
            }
            Err(e) => break Some(e),
        }
    };

    if let Some(err) = &exit_err {
        config.emit_error(Some(&conn), err);
    }

    conn.shutdown(exit_err.as_ref());
    if let Some(hub) = &hub {
        hub.unregister(conn.id());
    }
    config.emit_disconnect(&conn, exit_err.as_ref());

    debug!(id = %conn.id(), "read pump terminated");
}

// ============================================================================
// Helpers
// ============================================================================

/// Reads the next message, honoring the read timeout when configured.
async fn next_message<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    read_timeout: Option<Duration>,
) -> Result<Option<Message>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match read_timeout {
        Some(limit) => match timeout(limit, stream.next()).await {
            Ok(item) => item.transpose().map_err(Error::from),
            Err(_) => Err(Error::timeout("read", limit.as_millis() as u64)),
        },
        None => stream.next().await.transpose().map_err(Error::from),
    }
}

/// Stages one data payload through the pool and dispatches it.
///
/// Fails fast with an oversized-message error before touching the pool.
fn deliver(conn: &Arc<Connection>, pool: &BufferPool, opcode: Opcode, payload: &[u8]) -> Result<()> {
    let limit = conn.config().max_message_size;
    if payload.len() > limit {
        return Err(Error::message_too_large(payload.len(), limit));
    }

    let mut buf = pool.checkout();
    buf.extend_from_slice(payload);

    conn.touch();
    conn.config().emit_message(conn, opcode, &buf);

    pool.restore(buf);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
