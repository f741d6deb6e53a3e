//! Wire protocol for Broadside.
//!
//! This crate defines the "language" that game clients and the session
//! server speak:
//!
//! - **Identifiers** ([`Identity`], [`SessionCode`], [`TeamId`], [`ShipId`])
//!   and the session [`Phase`].
//! - **Events** ([`ServerEvent`]): everything the server pushes to a
//!   client, discriminated by an `event` tag.
//! - **Requests** ([`ClientRequest`]): the five in-session actions a
//!   client may send, discriminated by a `request` tag, decoded and
//!   validated by [`decode_request`].
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how events become bytes.
//! - **Errors** ([`ProtocolError`]): malformed or illegal frames, each
//!   mapped to a WebSocket close code.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the session
//! layer (clients and game state). It knows nothing about sockets or
//! sessions, only how to turn frames into typed values and back.
//!
//! ```text
//! Transport (frames) → Protocol (ClientRequest / ServerEvent) → Session
//! ```

mod codec;
mod error;
mod event;
mod request;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::{
    CLOSE_INVALID_REQUEST, CLOSE_MALFORMED, CLOSE_NORMAL, CLOSE_UNKNOWN_REQUEST,
    ProtocolError,
};
pub use event::{
    EnterSetupFailure, PlayerSummary, Recipient, ScenarioDescriptor,
    ServerEvent, SetupShared, ShipInfo, TeamInfo,
};
pub use request::{
    ClientRequest, REQUEST_TAG, RequestKind, ShipPlacement, decode_request,
};
pub use types::{
    Coordinate, Heading, Identity, Phase, Position, SessionCode, ShipId,
    TeamId,
};
