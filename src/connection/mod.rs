//! Connection engine: pumps, mailbox, close signal.
//!
//! Each connection is served by two concurrently scheduled workers (three
//! for client connections), sharing only the outbound mailbox, the
//! control lane, and the one-shot close signal:
//!
//! ```text
//! inbound bytes ──► read pump ──► control frames handled inline
//!                        │
//!                        └──► data frames ──► BufferPool ──► on_message
//!
//! write_text/broadcast ──► mailbox ──► write pump ──► wire
//! read pump / watchdog ──► control lane ──┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Connection state, write path, close lifecycle |
//! | `read_pump` | Inbound frame decoding and dispatch |
//! | `write_pump` | Single-writer outbound drain and keepalive |
//! | `watchdog` | Client pong-liveness timer |

// ============================================================================
// Submodules
// ============================================================================

/// Connection state, write path, close lifecycle.
mod core;

/// Inbound frame decoding and dispatch.
mod read_pump;

/// Client pong-liveness timer.
mod watchdog;

/// Single-writer outbound drain and keepalive.
mod write_pump;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Connection;

pub(crate) use self::core::Flavor;
