//! Identifier newtypes, the session phase, and board coordinates.
//!
//! Every identifier is a newtype around a primitive so that a
//! `SessionCode` can never be passed where an `Identity` is expected, even
//! though both are strings underneath. `#[serde(transparent)]` keeps the
//! JSON representation a plain string or number.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A stable participant identity, unique within one session's roster.
///
/// Derived deterministically from the authenticated principal, so the same
/// user always maps to the same identity across reconnects:
/// `alice` → `user:alice`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Prefix applied to usernames coming from the authenticator.
    pub const USER_PREFIX: &'static str = "user:";

    /// Builds the identity for an authenticated username.
    pub fn from_username(username: &str) -> Self {
        Self(format!("{}{username}", Self::USER_PREFIX))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionCode
// ---------------------------------------------------------------------------

/// The public, opaque identifier of a running session.
///
/// This is what appears in the connection URL (`/session/K7QX2M9A`).
/// Uniqueness is enforced by the session registry at generation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Wraps a raw code string.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TeamId / ShipId
// ---------------------------------------------------------------------------

/// Identifier of a team defined by the scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub String);

impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a ship defined by the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipId(pub u32);

impl fmt::Display for ShipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ship-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Board coordinates
// ---------------------------------------------------------------------------

/// A cell on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

/// Which way a ship's bow points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heading {
    North,
    East,
    South,
    West,
}

/// A ship's placement: bow cell plus heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub heading: Heading,
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a session.
///
/// ```text
/// Lobby → EnteringSetup → Setup → InProgress → Finished
///   │           │           │          │           │
///   └───────────┴───────────┴──────────┴───────────┴──→ Killed
/// ```
///
/// - **Lobby**: accepting new participants; clients pick teams and ready up.
/// - **EnteringSetup**: everyone is ready; a countdown runs before setup.
/// - **Setup**: teams are final; clients place their ships.
/// - **InProgress**: turns are being played.
/// - **Finished**: the game is over and results are being recorded.
/// - **Killed**: torn down. Roster empty, timers disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    EnteringSetup,
    Setup,
    InProgress,
    Finished,
    Killed,
}

impl Phase {
    /// `true` for `Finished` and `Killed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Killed)
    }

    /// New participants may join only in the lobby.
    pub fn accepts_joins(self) -> bool {
        matches!(self, Self::Lobby)
    }

    /// Disconnected participants may come back once the lobby is over and
    /// until the session reaches a terminal phase.
    pub fn accepts_reconnections(self) -> bool {
        matches!(self, Self::EnteringSetup | Self::Setup | Self::InProgress)
    }

    /// Returns `true` if `self → target` is an edge of the state machine.
    pub fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::Lobby, Self::EnteringSetup)
            | (Self::EnteringSetup, Self::Setup)
            | (Self::Setup, Self::InProgress)
            | (Self::InProgress, Self::Finished) => true,
            (Self::Killed, _) => false,
            (_, Self::Killed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lobby => "Lobby",
            Self::EnteringSetup => "EnteringSetup",
            Self::Setup => "Setup",
            Self::InProgress => "InProgress",
            Self::Finished => "Finished",
            Self::Killed => "Killed",
        };
        f.write_str(name)
    }
}
