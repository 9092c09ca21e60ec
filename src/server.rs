//! Server front door: accept, upgrade, broadcast, shutdown.
//!
//! The server binds a listener, upgrades incoming streams, and wires each
//! accepted connection into its [`Hub`]. Callers with their own listener
//! (or a non-TCP transport) can feed streams through
//! [`handle_stream`](Server::handle_stream) directly.
//!
//! # Connection Flow
//!
//! 1. `Server::bind` - Bind the listener and spawn the accept loop
//! 2. Peer connects; the upgrade handshake runs the origin predicate
//! 3. The hub assigns an ID and the connection pumps start
//! 4. `broadcast_*` fan out to the live-set; `shutdown` closes everything

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::buffer::BufferPool;
use crate::config::Config;
use crate::connection::{Connection, Flavor};
use crate::error::{Error, Result};
use crate::hub::Hub;

// ============================================================================
// Constants
// ============================================================================

/// Accept poll period; bounds how long shutdown can lag.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Server
// ============================================================================

/// WebSocket server engine.
///
/// Owns its [`Hub`] and [`BufferPool`]; there is no process-wide state.
///
/// # Example
///
/// ```ignore
/// use framegate::{Config, Server};
///
/// let server = Server::bind(
///     Config::new().on_message(|conn, _opcode, payload| {
///         println!("{}: {} bytes", conn.id(), payload.len());
///     }),
///     "127.0.0.1:9001",
/// )
/// .await?;
/// println!("listening on {}", server.ws_url());
/// ```
pub struct Server {
    /// Shared engine configuration.
    config: Arc<Config>,

    /// Live-connection registry.
    hub: Arc<Hub>,

    /// Buffer pool shared by every accepted connection.
    pool: Arc<BufferPool>,

    /// Bound listener address.
    local_addr: SocketAddr,

    /// Shutdown flag polled by the accept loop.
    shutdown: AtomicBool,
}

// ============================================================================
// Construction
// ============================================================================

impl Server {
    /// Binds the server and spawns its accept loop.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(config: Config, addr: impl ToSocketAddrs) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(Self {
            config: Arc::new(config),
            hub: Hub::new(),
            pool: Arc::new(BufferPool::new()),
            local_addr,
            shutdown: AtomicBool::new(false),
        });

        let accept = Arc::clone(&server);
        tokio::spawn(async move {
            accept.accept_loop(listener).await;
        });

        info!(addr = %local_addr, "server started");
        Ok(server)
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Server {
    /// Returns the bound listener address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the WebSocket URL of this server.
    ///
    /// Format: `ws://{addr}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub.len()
    }

    /// Returns the connection registry.
    #[inline]
    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

impl Server {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking the shutdown flag.
            match timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_stream(stream, Some(addr)).await {
                            warn!(error = %e, ?addr, "connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("accept loop terminated");
    }

    /// Upgrades one byte stream into a tracked connection.
    ///
    /// Any transport with stream read/write/close semantics is accepted;
    /// the accept loop feeds TCP streams through here.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the server is shut down or the upgrade
    ///   handshake fails
    /// - [`Error::OriginRejected`] if the origin predicate refuses the
    ///   request (the peer sees HTTP 403)
    pub async fn handle_stream<S>(
        &self,
        stream: S,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::connection("server is shut down"));
        }

        let rejected: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let config = Arc::clone(&self.config);
        let callback = {
            let rejected = Arc::clone(&rejected);
            move |req: &Request, response: Response| {
                let origin = req
                    .headers()
                    .get("origin")
                    .and_then(|value| value.to_str().ok());

                if let Some(origin) = origin
                    && !config.origin_allowed(origin)
                {
                    *rejected.lock() = Some(origin.to_string());
                    let mut refusal = ErrorResponse::new(Some("origin not allowed".into()));
                    *refusal.status_mut() = StatusCode::FORBIDDEN;
                    return Err(refusal);
                }

                Ok(response)
            }
        };

        let ws = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                if let Some(origin) = rejected.lock().take() {
                    warn!(origin, "upgrade rejected by origin predicate");
                    return Err(Error::origin_rejected(origin));
                }
                return Err(Error::connection(format!("upgrade failed: {e}")));
            }
        };

        let id = self.hub.next_id();
        let conn = Connection::spawn(
            ws,
            id,
            Flavor::Server,
            Arc::clone(&self.config),
            remote_addr,
            Some(Arc::clone(&self.hub)),
            Arc::clone(&self.pool),
        );

        info!(id = %id, ?remote_addr, "connection established");
        self.config.emit_connect(&conn);
        Ok(conn)
    }
}

// ============================================================================
// Broadcast
// ============================================================================

impl Server {
    /// Broadcasts a text frame to every live connection.
    pub async fn broadcast_text(&self, payload: &[u8]) {
        self.hub.broadcast_text(payload).await;
    }

    /// Broadcasts a binary frame to every live connection.
    pub async fn broadcast_binary(&self, payload: &[u8]) {
        self.hub.broadcast_binary(payload).await;
    }

    /// Broadcasts a text frame to connections matching the filter.
    pub async fn broadcast_text_filtered<F>(&self, payload: &[u8], filter: F)
    where
        F: Fn(&Arc<Connection>) -> bool,
    {
        self.hub.broadcast_text_filtered(payload, filter).await;
    }

    /// Broadcasts a binary frame to connections matching the filter.
    pub async fn broadcast_binary_filtered<F>(&self, payload: &[u8], filter: F)
    where
        F: Fn(&Arc<Connection>) -> bool,
    {
        self.hub.broadcast_binary_filtered(payload, filter).await;
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl Server {
    /// Shuts the server down: stops accepting and closes every connection.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("server shutting down");
        self.hub.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc;
    use tokio::time::sleep;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    use crate::client::{Backoff, Client};
    use crate::protocol::Opcode;

    async fn wait_until<F>(deadline: Duration, mut check: F)
    where
        F: FnMut() -> bool,
    {
        timeout(deadline, async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition within deadline");
    }

    #[tokio::test]
    async fn test_bind_random_port() {
        let server = Server::bind(Config::new(), "127.0.0.1:0")
            .await
            .expect("bind should succeed");

        assert!(server.port() > 0);
        assert!(server.ws_url().starts_with("ws://127.0.0.1:"));
        assert_eq!(server.connection_count(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_echo_end_to_end() {
        let server = Server::bind(
            Config::new().on_message(|conn, opcode, payload| {
                assert_eq!(opcode, Opcode::Text);
                if payload == b"hello" {
                    let conn = Arc::clone(conn);
                    tokio::spawn(async move {
                        let _ = conn.write_text(b"world").await;
                    });
                }
            }),
            "127.0.0.1:0",
        )
        .await
        .expect("server bind");

        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let client = Client::new(Config::new().on_message(move |_conn, _opcode, payload| {
            let _ = reply_tx.send(payload.to_vec());
        }));

        client.dial(&server.ws_url(), &[]).await.expect("dial");
        client.write_text(b"hello").await.expect("send");

        let reply = timeout(Duration::from_secs(2), reply_rx.recv())
            .await
            .expect("reply within deadline")
            .expect("channel open");
        assert_eq!(reply, b"world");

        client.close();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_auto_reconnect_reopens() {
        // The server drops every accepted connection shortly after the
        // handshake, forcing the client through its redial loop.
        let server = Server::bind(
            Config::new().on_connect(|conn| {
                let conn = Arc::clone(conn);
                tokio::spawn(async move {
                    sleep(Duration::from_millis(30)).await;
                    conn.close();
                });
            }),
            "127.0.0.1:0",
        )
        .await
        .expect("server bind");

        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let client = Client::new(
            Config::new()
                .with_reconnect(Backoff::new(
                    Duration::from_millis(50),
                    Duration::from_millis(100),
                ))
                .on_connect(move |_conn| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        );

        client.dial(&server.ws_url(), &[]).await.expect("dial");

        let opens_check = Arc::clone(&opens);
        wait_until(Duration::from_secs(5), move || {
            opens_check.load(Ordering::SeqCst) >= 2
        })
        .await;

        client.close();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_broadcast_filter_delivers_to_subset() {
        let server = Server::bind(
            Config::new().on_message(|conn, _opcode, payload| {
                // First message from each peer announces its name.
                let name = String::from_utf8_lossy(payload).into_owned();
                conn.set("name", name);
            }),
            "127.0.0.1:0",
        )
        .await
        .expect("server bind");

        let mut clients = Vec::new();
        let mut inboxes = Vec::new();
        for name in ["a", "b", "c"] {
            let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
            let client = Client::new(Config::new().on_message(move |_conn, _opcode, payload| {
                let _ = tx.send(payload.to_vec());
            }));
            client.dial(&server.ws_url(), &[]).await.expect("dial");
            client.write_text(name.as_bytes()).await.expect("announce");
            clients.push(client);
            inboxes.push(rx);
        }

        // Every peer announced itself and is tagged in the hub.
        let hub = Arc::clone(server.hub());
        wait_until(Duration::from_secs(2), move || {
            hub.len() == 3 && hub.snapshot().iter().all(|c| c.get::<String>("name").is_some())
        })
        .await;

        server
            .broadcast_text_filtered(b"tick", |conn| {
                conn.get::<String>("name").is_some_and(|name| *name != "b")
            })
            .await;

        for (index, expected) in [(0, true), (1, false), (2, true)] {
            let inbox = &mut inboxes[index];
            if expected {
                let payload = timeout(Duration::from_secs(2), inbox.recv())
                    .await
                    .expect("delivery within deadline")
                    .expect("channel open");
                assert_eq!(payload, b"tick");
            }
        }

        // The filtered-out peer stays silent.
        sleep(Duration::from_millis(100)).await;
        assert!(inboxes[1].try_recv().is_err());

        for client in &clients {
            client.close();
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_origin_predicate_rejects_upgrade() {
        let server = Server::bind(
            Config::new().with_check_origin(|origin| origin == "https://allowed.example"),
            "127.0.0.1:0",
        )
        .await
        .expect("server bind");

        let mut request = server
            .ws_url()
            .into_client_request()
            .expect("request builds");
        request
            .headers_mut()
            .insert("Origin", "https://evil.invalid".parse().expect("header"));

        let result = connect_async(request).await;
        assert!(result.is_err());
        assert_eq!(server.connection_count(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_origin_predicate_accepts_allowed() {
        let server = Server::bind(
            Config::new().with_check_origin(|origin| origin == "https://allowed.example"),
            "127.0.0.1:0",
        )
        .await
        .expect("server bind");

        let client = Client::new(Config::new().with_reconnect(Backoff::disabled()));
        client
            .dial(
                &server.ws_url(),
                &[("Origin", "https://allowed.example")],
            )
            .await
            .expect("allowed origin dials");

        client.close();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_live_connections() {
        let server = Server::bind(Config::new(), "127.0.0.1:0")
            .await
            .expect("server bind");

        let client = Client::new(Config::new().with_reconnect(Backoff::disabled()));
        client.dial(&server.ws_url(), &[]).await.expect("dial");

        let hub = Arc::clone(server.hub());
        wait_until(Duration::from_secs(2), move || hub.len() == 1).await;

        server.shutdown();

        let conn = client.connection().expect("active connection");
        timeout(Duration::from_secs(2), conn.wait_closed())
            .await
            .expect("client side closes");

        assert_eq!(server.connection_count(), 0);
        client.close();
    }
}
