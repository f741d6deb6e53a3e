//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::{
    ConnectionId, HeadLimits, Transport, TransportError, UpgradeRequest,
    status_reason,
};

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Pause between peeks while the upgrade head is still arriving.
const PEEK_RETRY: Duration = Duration::from_millis(5);

/// How long a rejected socket waits for the peer to hang up.
const REJECT_LINGER: Duration = Duration::from_secs(1);

fn io_error(kind: std::io::ErrorKind, e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> std::io::Error {
    std::io::Error::new(kind, e)
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A TCP listener whose connections upgrade to WebSocket on demand.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }
}

impl Transport for WebSocketTransport {
    type Pending = PendingConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Pending, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let id = ConnectionId::next();
        tracing::debug!(conn_id = %id, %peer, "accepted TCP connection");

        Ok(PendingConnection {
            id,
            peer,
            stream,
            head_len: None,
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}

// ---------------------------------------------------------------------------
// Pending connection
// ---------------------------------------------------------------------------

/// An accepted TCP stream awaiting a verdict.
///
/// The upgrade head is only *peeked*, never consumed, so the socket can
/// still be handed to the WebSocket handshake unchanged.
pub struct PendingConnection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    head_len: Option<usize>,
}

impl PendingConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Waits for the complete upgrade head and parses it.
    ///
    /// # Errors
    /// [`TransportError::HeadTimeout`] when the head is not complete within
    /// `limits.timeout`, [`TransportError::BadRequest`] when it is malformed
    /// or larger than `limits.max_bytes`.
    pub async fn read_request(
        &mut self,
        limits: HeadLimits,
    ) -> Result<UpgradeRequest, TransportError> {
        let request = tokio::time::timeout(limits.timeout, self.peek_head(limits.max_bytes))
            .await
            .map_err(|_| TransportError::HeadTimeout)??;
        self.head_len = Some(request.head_len());
        Ok(request)
    }

    async fn peek_head(&self, max_bytes: usize) -> Result<UpgradeRequest, TransportError> {
        let mut buf = vec![0u8; max_bytes];
        loop {
            let n = self
                .stream
                .peek(&mut buf)
                .await
                .map_err(TransportError::ReceiveFailed)?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed(
                    "peer closed before sending an upgrade head".into(),
                ));
            }
            if let Some(request) = UpgradeRequest::parse(&buf[..n])? {
                return Ok(request);
            }
            if n == max_bytes {
                return Err(TransportError::BadRequest(format!(
                    "upgrade head exceeds {max_bytes} bytes"
                )));
            }
            tokio::time::sleep(PEEK_RETRY).await;
        }
    }

    /// Answers with a bare HTTP status and closes the socket.
    ///
    /// The head is consumed first so the close is a clean FIN rather than a
    /// reset, which would discard the status line on the peer's side.
    pub async fn reject(mut self, status: u16) -> Result<(), TransportError> {
        let head_len = match self.head_len {
            Some(len) => Some(len),
            None => {
                let limits = HeadLimits {
                    timeout: REJECT_LINGER,
                    ..HeadLimits::default()
                };
                self.read_request(limits).await.ok().map(|r| r.head_len())
            }
        };
        if let Some(len) = head_len {
            let mut discard = vec![0u8; len];
            self.stream
                .read_exact(&mut discard)
                .await
                .map_err(TransportError::ReceiveFailed)?;
        }

        let response = format!(
            "HTTP/1.1 {status} {}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
            status_reason(status)
        );
        self.stream
            .write_all(response.as_bytes())
            .await
            .map_err(TransportError::SendFailed)?;
        self.stream
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)?;

        // Let the peer read the status and hang up first.
        let mut sink = [0u8; 512];
        let _ = tokio::time::timeout(REJECT_LINGER, async {
            while let Ok(n) = self.stream.read(&mut sink).await {
                if n == 0 {
                    break;
                }
            }
        })
        .await;

        tracing::debug!(conn_id = %self.id, peer = %self.peer, status, "connection rejected");
        Ok(())
    }

    /// Completes the WebSocket handshake and splits the stream.
    pub async fn upgrade(
        self,
    ) -> Result<(WebSocketSender, WebSocketReceiver), TransportError> {
        let ws = tokio_tungstenite::accept_async(self.stream)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        tracing::debug!(conn_id = %self.id, peer = %self.peer, "WebSocket upgraded");

        let (sink, stream) = ws.split();
        Ok((
            WebSocketSender { id: self.id, sink },
            WebSocketReceiver {
                id: self.id,
                stream,
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// Halves
// ---------------------------------------------------------------------------

/// The write half of an upgraded connection.
pub struct WebSocketSender {
    id: ConnectionId,
    sink: SplitSink<WsStream, Message>,
}

impl WebSocketSender {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sends one text frame.
    pub async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)))
    }

    /// Sends an empty ping frame. The peer's pong counts as activity for
    /// [`WebSocketReceiver::recv_idle`].
    pub async fn ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(Default::default()))
            .await
            .map_err(|e| TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)))
    }

    /// Sends a close frame carrying `code` and `reason`.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)))
    }
}

/// The read half of an upgraded connection.
pub struct WebSocketReceiver {
    id: ConnectionId,
    stream: SplitStream<WsStream>,
}

impl WebSocketReceiver {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Receives the next data frame.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match inbound(self.stream.next().await)? {
                Inbound::Data(data) => return Ok(Some(data)),
                Inbound::Closed => return Ok(None),
                Inbound::Control => continue,
            }
        }
    }

    /// Like [`recv`](Self::recv), but fails with
    /// [`TransportError::IdleTimeout`] when no frame of any kind arrives
    /// within `idle`. Control frames restart the countdown.
    pub async fn recv_idle(&mut self, idle: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let next = tokio::time::timeout(idle, self.stream.next())
                .await
                .map_err(|_| TransportError::IdleTimeout(idle))?;
            match inbound(next)? {
                Inbound::Data(data) => return Ok(Some(data)),
                Inbound::Closed => return Ok(None),
                Inbound::Control => continue,
            }
        }
    }
}

enum Inbound {
    Data(Vec<u8>),
    Closed,
    /// Ping, pong, or a raw frame.
    Control,
}

fn inbound(
    next: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> Result<Inbound, TransportError> {
    match next {
        Some(Ok(Message::Text(text))) => Ok(Inbound::Data(text.as_bytes().to_vec())),
        Some(Ok(Message::Binary(data))) => Ok(Inbound::Data(data.to_vec())),
        Some(Ok(Message::Close(_))) | None => Ok(Inbound::Closed),
        Some(Ok(_)) => Ok(Inbound::Control),
        Some(Err(e)) => Err(TransportError::ReceiveFailed(io_error(
            std::io::ErrorKind::ConnectionReset,
            e,
        ))),
    }
}
