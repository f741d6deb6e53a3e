//! Transport layer for Broadside.
//!
//! Accepting a connection is split in two so the server can refuse it
//! before the WebSocket handshake completes:
//!
//! 1. [`Transport::accept`] yields a pending connection: a raw TCP stream
//!    that has not been upgraded yet.
//! 2. The server inspects the upgrade head ([`UpgradeRequest`]) and either
//!    rejects with a plain HTTP status or upgrades to a WebSocket whose
//!    halves ([`WebSocketSender`], [`WebSocketReceiver`]) are driven by
//!    separate tasks.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
mod upgrade;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use upgrade::{HeadLimits, UpgradeRequest, status_reason};
#[cfg(feature = "websocket")]
pub use websocket::{
    PendingConnection, WebSocketReceiver, WebSocketSender, WebSocketTransport,
};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one accepted transport connection.
///
/// A reconnecting participant gets a fresh `ConnectionId`, which is how the
/// session tells a stale disconnect from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// An accepted connection that has not been upgraded yet.
    type Pending: Send + 'static;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;

    /// Returns the address the transport is bound to.
    fn local_addr(&self) -> Result<std::net::SocketAddr, Self::Error>;
}
