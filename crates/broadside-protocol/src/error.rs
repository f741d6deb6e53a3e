//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the *peer* broke the protocol (or we
//! failed to serialize an event). It is fatal to the connection: the
//! server closes the socket with [`ProtocolError::close_code`] and never
//! retries. Legal requests that are merely inapplicable right now (wrong
//! turn, wrong phase) are not protocol errors; the session ignores them.

use crate::RequestKind;

/// Normal closure (RFC 6455 §7.4.1), used when a session is torn down.
pub const CLOSE_NORMAL: u16 = 1000;

/// The frame was not valid JSON.
pub const CLOSE_MALFORMED: u16 = 4000;

/// The frame was JSON but its `request` tag was missing or unrecognized.
pub const CLOSE_UNKNOWN_REQUEST: u16 = 4001;

/// The request kind was recognized but its fields failed validation.
pub const CLOSE_INVALID_REQUEST: u16 = 4002;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing an outbound event failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserializing a value through a [`Codec`](crate::Codec) failed.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The inbound frame is not parseable JSON.
    #[error("malformed frame: {0}")]
    Malformed(serde_json::Error),

    /// The frame is JSON but not a request envelope (not an object, or no
    /// string `request` tag).
    #[error("invalid request envelope: {0}")]
    InvalidEnvelope(String),

    /// The `request` tag names no known request kind.
    #[error("unknown request kind {0:?}")]
    UnknownRequest(String),

    /// The request kind is known but a required field is missing or has
    /// the wrong type.
    #[error("invalid {kind} request: {source}")]
    InvalidRequest {
        kind: RequestKind,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// The WebSocket close code the server sends for this error.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Malformed(_) | Self::Decode(_) => CLOSE_MALFORMED,
            Self::InvalidEnvelope(_) | Self::UnknownRequest(_) => {
                CLOSE_UNKNOWN_REQUEST
            }
            Self::InvalidRequest { .. } => CLOSE_INVALID_REQUEST,
            // Our own serialization failure; the peer did nothing wrong but
            // the connection cannot continue.
            Self::Encode(_) => 1011,
        }
    }
}
