//! framegate - Persistent-connection WebSocket engine.
//!
//! This library manages the full lifecycle of framed, message-oriented
//! connections: read pump, write pump, keepalive, backpressure, and
//! shutdown, independently for tens of thousands of concurrent peers.
//!
//! # Architecture
//!
//! Both engine front doors share the same connection machinery:
//!
//! - **Server**: accepts upgraded streams, tracks them in a [`Hub`] for
//!   broadcast and bulk shutdown, initiates keepalive pings
//! - **Client**: dials one connection at a time, supervised by a
//!   reconnect loop with exponential backoff and a pong-liveness watchdog
//!
//! Key design principles:
//!
//! - Each connection owns: a bounded outbound mailbox + one writer task
//! - Backpressure is policy, chosen once: Kick, Drop, or Block
//! - Lifecycle hooks are plain function values in an immutable [`Config`]
//! - Inbound payloads stage through a shared, shrink-bounded [`BufferPool`]
//!
//! # Quick Start
//!
//! ```no_run
//! use framegate::{Client, Config, Result, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Echo server on a random port
//!     let server = Server::bind(
//!         Config::new().on_message(|conn, _opcode, payload| {
//!             let conn = std::sync::Arc::clone(conn);
//!             let payload = payload.to_vec();
//!             tokio::spawn(async move {
//!                 let _ = conn.write_binary(&payload).await;
//!             });
//!         }),
//!         "127.0.0.1:0",
//!     )
//!     .await?;
//!
//!     // Auto-reconnecting client
//!     let client = Client::new(Config::new().on_message(|_conn, _opcode, payload| {
//!         println!("echoed {} bytes", payload.len());
//!     }));
//!     client.dial(&server.ws_url(), &[]).await?;
//!     client.write_text(b"hello").await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`buffer`] | Pooled payload staging buffers |
//! | [`client`] | Client front door and reconnect supervisor |
//! | [`config`] | Engine configuration and lifecycle hooks |
//! | [`connection`] | Connection pumps, mailbox, close lifecycle |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`hub`] | Server-side registry and broadcast |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Opcodes and outbound frame envelope |
//! | [`server`] | Server front door and accept loop |

// ============================================================================
// Modules
// ============================================================================

/// Pooled payload staging buffers.
///
/// Shared across all connections of one engine instance; bounded so one
/// oversized message cannot permanently inflate retained memory.
pub mod buffer;

/// Client front door and reconnect supervisor.
pub mod client;

/// Engine configuration and lifecycle hooks.
///
/// Built once at startup via [`Config::new()`] and `with_*` methods.
pub mod config;

/// Connection pumps, mailbox, close lifecycle.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Server-side connection registry and broadcast fan-out.
pub mod hub;

/// Type-safe identifiers for engine entities.
pub mod identifiers;

/// Opcodes and the outbound frame envelope.
pub mod protocol;

/// Server front door and accept loop.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

// Engine types
pub use buffer::BufferPool;
pub use client::{Backoff, Client};
pub use connection::Connection;
pub use hub::Hub;
pub use server::Server;

// Configuration types
pub use config::{
    BackpressurePolicy, Config, ConnectHandler, DisconnectHandler, ErrorHandler, MessageHandler,
    OriginPredicate,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Protocol types
pub use protocol::{Frame, Opcode};
