//! Client-to-server requests and their staged decoding.
//!
//! A frame is accepted only after three checks, each with its own error and
//! close code:
//!
//! 1. The bytes parse as JSON ([`ProtocolError::Malformed`]).
//! 2. The value is an object whose `request` field names a known
//!    [`RequestKind`] ([`ProtocolError::InvalidEnvelope`],
//!    [`ProtocolError::UnknownRequest`]).
//! 3. The fields match that kind's schema ([`ProtocolError::InvalidRequest`]).
//!
//! Past [`decode_request`] a request is a [`ClientRequest`] and every match
//! over it is exhaustive. There is no "unknown" case downstream.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Coordinate, Position, ProtocolError, ShipId, TeamId};

/// Name of the envelope field that carries the request kind.
pub const REQUEST_TAG: &str = "request";

/// One ship's requested placement during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipPlacement {
    pub ship: ShipId,
    pub position: Position,
}

/// Every in-session action a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case", deny_unknown_fields)]
pub enum ClientRequest {
    /// Pick a team while in the lobby.
    JoinTeam { team: TeamId },

    /// Mark (or unmark) the client ready to leave the lobby.
    Ready { ready: bool },

    /// Place every ship the client controls.
    ShipPlacement { ships: Vec<ShipPlacement> },

    /// Hand the turn to the next team.
    EndTurn {},

    /// Use a ship's ability, optionally aimed at a cell.
    UseAbility {
        ship: ShipId,
        ability: usize,
        #[serde(default)]
        target: Option<Coordinate>,
    },
}

impl ClientRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::JoinTeam { .. } => RequestKind::JoinTeam,
            Self::Ready { .. } => RequestKind::Ready,
            Self::ShipPlacement { .. } => RequestKind::ShipPlacement,
            Self::EndTurn {} => RequestKind::EndTurn,
            Self::UseAbility { .. } => RequestKind::UseAbility,
        }
    }
}

/// The recognized values of the `request` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    JoinTeam,
    Ready,
    ShipPlacement,
    EndTurn,
    UseAbility,
}

impl RequestKind {
    pub const ALL: [Self; 5] = [
        Self::JoinTeam,
        Self::Ready,
        Self::ShipPlacement,
        Self::EndTurn,
        Self::UseAbility,
    ];

    /// Looks up the kind named by a `request` tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// The wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinTeam => "join_team",
            Self::Ready => "ready",
            Self::ShipPlacement => "ship_placement",
            Self::EndTurn => "end_turn",
            Self::UseAbility => "use_ability",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decodes and validates one inbound frame.
///
/// # Errors
/// Returns the [`ProtocolError`] of the first stage that fails. Every
/// variant is fatal to the connection; see [`ProtocolError::close_code`].
pub fn decode_request(data: &[u8]) -> Result<ClientRequest, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_slice(data).map_err(ProtocolError::Malformed)?;

    let kind = {
        let Some(object) = value.as_object() else {
            return Err(ProtocolError::InvalidEnvelope(
                "frame is not a JSON object".into(),
            ));
        };
        let Some(tag) = object.get(REQUEST_TAG) else {
            return Err(ProtocolError::InvalidEnvelope(format!(
                "missing `{REQUEST_TAG}` field"
            )));
        };
        let Some(tag) = tag.as_str() else {
            return Err(ProtocolError::InvalidEnvelope(format!(
                "`{REQUEST_TAG}` must be a string"
            )));
        };
        RequestKind::from_tag(tag)
            .ok_or_else(|| ProtocolError::UnknownRequest(tag.to_string()))?
    };

    serde_json::from_value(value)
        .map_err(|source| ProtocolError::InvalidRequest { kind, source })
}
