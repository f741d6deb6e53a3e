/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The upgrade request head could not be read or parsed.
    #[error("bad upgrade request: {0}")]
    BadRequest(String),

    /// The peer did not send a complete upgrade head in time.
    #[error("upgrade request timed out")]
    HeadTimeout,

    /// The WebSocket handshake failed after the head was accepted.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// Nothing, not even a pong, arrived within the idle limit.
    #[error("no frame received for {0:?}")]
    IdleTimeout(std::time::Duration),
}
