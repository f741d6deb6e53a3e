//! Server-to-client events.
//!
//! Every frame the server pushes is one [`ServerEvent`], serialized as a
//! JSON object whose `event` field names the variant:
//!
//! ```json
//! {"event":"player_join","identity":"user:alice","reconnection":false}
//! ```
//!
//! Scenario hooks produce events together with a [`Recipient`], and the
//! session delivers each one to the matching roster members.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Identity, Phase, Position, SessionCode, ShipId, TeamId};

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who should receive an event.
///
/// Scenario hooks return `Vec<(Recipient, ServerEvent)>`; the session maps
/// each recipient onto its current roster at delivery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Every roster member.
    All,
    /// One client.
    Client(Identity),
    /// Everyone except one client.
    AllExcept(Identity),
    /// Every roster member assigned to a team.
    Team(TeamId),
}

// ---------------------------------------------------------------------------
// Snapshot payloads
// ---------------------------------------------------------------------------

/// The scenario's public description, shown in the lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    pub name: String,
    pub description: String,
    pub board_width: u32,
    pub board_height: u32,
}

/// One team a client can join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub id: TeamId,
    pub name: String,
    pub max_players: usize,
}

/// What other participants see about one roster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub identity: Identity,
    pub team: Option<TeamId>,
    pub ready: bool,
    pub connected: bool,
}

/// Setup data identical for every participant.
///
/// `board` is opaque to the session layer; the scenario decides its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupShared {
    pub board: serde_json::Value,
    pub team_attributes: BTreeMap<TeamId, serde_json::Value>,
    pub turn_order: Vec<TeamId>,
}

/// One ship as a particular participant is allowed to see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipInfo {
    pub id: ShipId,
    pub team: TeamId,
    pub kind: String,
    /// `None` once redacted for an opponent, or before placement.
    pub position: Option<Position>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ShipInfo {
    /// The same ship with its position hidden, as sent to opponents.
    pub fn redacted(&self) -> Self {
        Self {
            position: None,
            ..self.clone()
        }
    }
}

/// Why the lobby could not move on to setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnterSetupFailure {
    /// A team has no ready participant.
    TeamEmpty,
    /// A team has more ready participants than it allows.
    TeamOverCapacity,
}

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// Everything the server can push to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First frame on every admitted connection, fresh or reconnected.
    ConnectionInfo {
        identity: Identity,
        session: SessionCode,
        reconnect_timeout_ms: u64,
    },

    /// Full session snapshot sent to a joiner or a reconnecting client.
    GameInfo {
        session: SessionCode,
        phase: Phase,
        scenario: ScenarioDescriptor,
        teams: Vec<TeamInfo>,
        players: Vec<PlayerSummary>,
    },

    /// Setup snapshot, tailored per recipient.
    SetupInfo {
        shared: SetupShared,
        ships: Vec<ShipInfo>,
    },

    PlayerJoin {
        identity: Identity,
        reconnection: bool,
    },

    PlayerLeave {
        identity: Identity,
        temporary: bool,
    },

    /// A disconnected participant missed the reconnection deadline.
    PlayerTimedOut {
        identity: Identity,
    },

    TeamAssign {
        identity: Identity,
        team: TeamId,
    },

    PlayerReady {
        identity: Identity,
        ready: bool,
    },

    /// Everyone is ready; setup starts after `wait_ms`.
    EnteringSetup {
        wait_ms: u64,
    },

    EnterSetupFailure {
        reason: EnterSetupFailure,
        team: TeamId,
    },

    GameStart {
        turn_order: Vec<TeamId>,
        current_team: Option<TeamId>,
    },

    /// An enemy ship became visible to the recipient's team.
    ShipAppear {
        ship: ShipInfo,
    },

    GameOver {
        winner: Option<TeamId>,
        message: String,
    },

    TurnStart {
        team: TeamId,
        turn: u32,
    },

    /// A scenario-level attribute changed on a team or ship.
    AttributeUpdate {
        team: Option<TeamId>,
        ship: Option<ShipId>,
        attributes: BTreeMap<String, serde_json::Value>,
    },
}
