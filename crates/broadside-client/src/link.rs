//! The outbound half of a participant's connection.
//!
//! The session never awaits a socket. It pushes [`Outbound`] items into an
//! unbounded channel, and the connection's writer task drains them to the
//! WebSocket. A link is tagged with the [`ConnectionId`] it was created
//! for, so a reconnect replaces it with a link to the new connection.

use broadside_protocol::ServerEvent;
use broadside_transport::ConnectionId;
use tokio::sync::mpsc;

/// One item for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encode and send as a text frame.
    Event(ServerEvent),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

/// Sending side of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ClientLink {
    conn_id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientLink {
    /// Creates a link for `conn_id` and the receiver its writer drains.
    pub fn channel(
        conn_id: ConnectionId,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { conn_id, tx }, rx)
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queues an event. Returns `false` if the writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    /// Queues a close frame. Returns `false` if the writer is gone.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
