//! Client front door and reconnect supervisor.
//!
//! A [`Client`] owns at most one active connection at a time, plus the
//! dial/backoff/retry loop around it. The first dial runs inline and
//! returns its error synchronously; after a successful handshake, a
//! supervisor task restarts the connection on failure until the client is
//! closed or reconnection is disabled.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::buffer::BufferPool;
use crate::config::Config;
use crate::connection::{Connection, Flavor};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

// ============================================================================
// Client
// ============================================================================

/// WebSocket client with automatic reconnection.
///
/// Cheap to clone; all clones share the same connection and supervisor.
///
/// # Example
///
/// ```ignore
/// use framegate::{Client, Config};
///
/// let client = Client::new(Config::new().on_message(|_conn, _opcode, payload| {
///     println!("received {} bytes", payload.len());
/// }));
/// client.dial("ws://127.0.0.1:9001", &[]).await?;
/// client.write_text(b"hello").await?;
/// ```
pub struct Client {
    /// Shared client state.
    inner: Arc<ClientInner>,
}

impl Clone for Client {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// State shared between the client handle and its supervisor task.
struct ClientInner {
    /// Shared engine configuration.
    config: Arc<Config>,

    /// Buffer pool shared by every connection this client dials.
    pool: Arc<BufferPool>,

    /// Currently active connection; `None` between attempts.
    active: Mutex<Option<Arc<Connection>>>,

    /// Cancellation token for the whole client lifetime.
    cancel_tx: watch::Sender<bool>,

    /// Terminal flag, set once by [`Client::close`].
    closed: AtomicBool,

    /// Guards against concurrent reconnect supervisors.
    running: AtomicBool,

    /// Dial attempt counter; doubles as the connection ID source.
    attempts: AtomicU64,
}

// ============================================================================
// Construction
// ============================================================================

impl Client {
    /// Creates a client from a configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                config: Arc::new(config),
                pool: Arc::new(BufferPool::new()),
                active: Mutex::new(None),
                cancel_tx,
                closed: AtomicBool::new(false),
                running: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
            }),
        }
    }
}

// ============================================================================
// Dialing
// ============================================================================

impl Client {
    /// Dials the target URL and starts the reconnect supervisor.
    ///
    /// The first handshake runs inline: on failure the error is returned
    /// synchronously and no supervisor is started. Extra headers are added
    /// to the upgrade request verbatim.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if the URL is malformed or not `ws`/`wss`
    /// - [`Error::ConnectionClosed`] if the client was closed
    /// - [`Error::Config`] if a dial is already in progress
    /// - [`Error::Connection`] if the handshake fails
    pub async fn dial(&self, url: &str, headers: &[(&str, &str)]) -> Result<()> {
        let inner = &self.inner;

        if inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let parsed = Url::parse(url).map_err(|e| Error::invalid_url(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(Error::invalid_url(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        if inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::config("client is already dialing or connected"));
        }

        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();

        match inner.connect(url, &headers).await {
            Ok(conn) => {
                *inner.active.lock() = Some(Arc::clone(&conn));
                inner.config.emit_connect(&conn);

                let supervisor = Arc::clone(inner);
                let url = url.to_string();
                tokio::spawn(async move { supervisor.supervise(url, headers).await });
                Ok(())
            }
            Err(e) => {
                inner.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

impl ClientInner {
    /// Performs one handshake and spawns the connection workers.
    async fn connect(&self, url: &str, headers: &[(String, String)]) -> Result<Arc<Connection>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::connection(format!("invalid upgrade request: {e}")))?;

        for (name, value) in headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| Error::config(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| Error::config(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| Error::connection(format!("dial failed: {e}")))?;

        let remote_addr = match ws.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
            _ => None,
        };

        let id = ConnectionId::new(self.attempts.fetch_add(1, Ordering::Relaxed) + 1);
        info!(id = %id, url, "handshake completed");

        Ok(Connection::spawn(
            ws,
            id,
            Flavor::Client,
            Arc::clone(&self.config),
            remote_addr,
            None,
            Arc::clone(&self.pool),
        ))
    }

    /// Supervises the active connection and redials on failure.
    async fn supervise(self: Arc<Self>, url: String, headers: Vec<(String, String)>) {
        let backoff = self.config.reconnect;
        let mut previous = Duration::ZERO;
        let mut cancel = self.cancel_tx.subscribe();

        loop {
            // Wait out the active connection, if any.
            let active = self.active.lock().clone();
            if let Some(conn) = active {
                tokio::select! {
                    _ = conn.wait_closed() => {}
                    _ = cancel.wait_for(|c| *c) => {
                        conn.close();
                        break;
                    }
                }
                *self.active.lock() = None;
            }

            if self.closed.load(Ordering::SeqCst) || !backoff.is_enabled() {
                break;
            }

            let delay = backoff.next(previous);
            previous = delay;
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");

            tokio::select! {
                _ = sleep(delay) => {}
                _ = cancel.wait_for(|c| *c) => break,
            }

            match self.connect(&url, &headers).await {
                Ok(conn) => {
                    previous = Duration::ZERO;
                    *self.active.lock() = Some(Arc::clone(&conn));
                    if self.closed.load(Ordering::SeqCst) {
                        // close() raced the successful redial
                        conn.close();
                        break;
                    }
                    self.config.emit_connect(&conn);
                }
                Err(e) => {
                    warn!(error = %e, url, "redial failed");
                    self.config.emit_error(None, &e);
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!("reconnect supervisor terminated");
    }
}

// ============================================================================
// Connection Access
// ============================================================================

impl Client {
    /// Returns the active connection, if any.
    #[must_use]
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner.active.lock().clone()
    }

    /// Returns `true` while a live connection is active.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|conn| !conn.is_closed())
    }

    /// Writes a text frame through the active connection.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] when no connection is active, plus the
    /// active connection's write errors.
    pub async fn write_text(&self, payload: &[u8]) -> Result<()> {
        let conn = self.connection().ok_or(Error::ConnectionClosed)?;
        conn.write_text(payload).await
    }

    /// Writes a binary frame through the active connection.
    ///
    /// # Errors
    ///
    /// Same as [`write_text`](Client::write_text).
    pub async fn write_binary(&self, payload: &[u8]) -> Result<()> {
        let conn = self.connection().ok_or(Error::ConnectionClosed)?;
        conn.write_binary(payload).await
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl Client {
    /// Closes the client for good.
    ///
    /// Idempotent. Cancels any in-progress backoff wait, prevents further
    /// dial attempts, and closes the active connection if one exists.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("client closing");
        let _ = inner.cancel_tx.send_replace(true);
        if let Some(conn) = inner.active.lock().clone() {
            conn.close();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.is_connected())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .field("attempts", &self.inner.attempts.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener as StdTcpListener;
    use std::sync::atomic::AtomicUsize;

    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use crate::client::backoff::Backoff;

    /// Port that was just free; nothing is listening on it.
    fn free_port() -> u16 {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind probe");
        let port = listener.local_addr().expect("probe addr").port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_dial_rejects_bad_scheme() {
        let client = Client::new(Config::new());
        let err = client
            .dial("http://127.0.0.1:80", &[])
            .await
            .expect_err("not a ws scheme");
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_dial_failure_returns_synchronously() {
        let client = Client::new(Config::new());
        let url = format!("ws://127.0.0.1:{}", free_port());

        let err = client.dial(&url, &[]).await.expect_err("nothing listening");
        assert!(matches!(err, Error::Connection { .. }));
        assert!(!client.is_connected());

        // The failed dial released the supervisor guard.
        let err = client.dial(&url, &[]).await.expect_err("still nothing");
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_dial() {
        let client = Client::new(Config::new());
        client.close();
        client.close();

        let err = client
            .dial("ws://127.0.0.1:1", &[])
            .await
            .expect_err("client closed");
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_write_without_connection_fails() {
        let client = Client::new(Config::new());
        let err = client.write_text(b"hi").await.expect_err("no connection");
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_watchdog_fails_mute_peer() {
        // A server that completes the upgrade and then goes silent: it
        // never polls the socket, so pings are never answered.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("addr"));
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("upgrade");
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(ws);
        });

        let liveness_errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&liveness_errors);
        let config = Config::new()
            .with_ping_interval(Duration::from_millis(40))
            .with_ping_timeout(Duration::from_millis(40))
            .with_reconnect(Backoff::disabled())
            .on_error(move |_conn, err| {
                if matches!(err, Error::LivenessTimeout { .. }) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });

        let client = Client::new(config);
        client.dial(&url, &[]).await.expect("handshake succeeds");
        let conn = client.connection().expect("active connection");

        timeout(Duration::from_secs(3), conn.wait_closed())
            .await
            .expect("liveness deadline trips");
        assert!(liveness_errors.load(Ordering::SeqCst) >= 1);

        client.close();
    }
}
