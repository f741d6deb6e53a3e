//! Codec trait and the JSON implementation.
//!
//! The session layer never touches bytes directly: connection writers hand
//! a [`ServerEvent`](crate::ServerEvent) to a [`Codec`] and send whatever
//! comes out. Inbound requests do not go through the codec because they
//! need the staged validation in [`decode_request`](crate::decode_request).

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes Rust values to frame bytes and decodes them back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into frame bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes frame bytes into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes don't match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that speaks JSON via `serde_json`.
///
/// Browser clients read these frames directly, so JSON is the only codec
/// the server ships with.
///
/// ```rust
/// use broadside_protocol::{Codec, Identity, JsonCodec, ServerEvent};
///
/// let codec = JsonCodec;
/// let event = ServerEvent::PlayerTimedOut {
///     identity: Identity::from_username("alice"),
/// };
///
/// let bytes = codec.encode(&event).unwrap();
/// let decoded: ServerEvent = codec.decode(&bytes).unwrap();
/// assert_eq!(event, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
