//! The `Scenario` trait: the game rules a session hosts.
//!
//! The session layer decides *when* things happen (phases, timers,
//! admission); the scenario decides *what* they mean (board, ships, turn
//! order, abilities, who wins). Every hook that changes the game returns
//! the events to deliver, each paired with a [`Recipient`].

use std::collections::BTreeMap;

use broadside_protocol::{
    Coordinate, Identity, Recipient, ScenarioDescriptor, ServerEvent,
    SetupShared, ShipId, ShipInfo, ShipPlacement, TeamId, TeamInfo,
};

/// Events produced by a scenario hook.
pub type Events = Vec<(Recipient, ServerEvent)>;

/// What an ability use produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbilityOutcome {
    pub events: Events,
    /// Set when this action decided the game.
    pub winner: Option<TeamId>,
}

/// Game rules and state for one session.
///
/// Owned by the session actor, so `&mut self` hooks never race each other.
/// Hooks that validate a client action return `Err(reason)` for moves that
/// are legal on the wire but illegal in the game; the session logs the
/// reason and ignores the request.
pub trait Scenario: Send + 'static {
    /// Public description shown in the lobby.
    fn descriptor(&self) -> ScenarioDescriptor;

    /// The teams participants can join.
    fn teams(&self) -> Vec<TeamInfo>;

    /// Maximum ready participants on `team`. Zero for unknown teams.
    fn team_max_players(&self, team: &TeamId) -> usize {
        self.teams()
            .into_iter()
            .find(|t| &t.id == team)
            .map_or(0, |t| t.max_players)
    }

    /// Receives the final rosters when setup starts.
    fn finalize_teams(&mut self, rosters: BTreeMap<TeamId, Vec<Identity>>);

    /// Decides the order teams move in. Called once, after
    /// [`finalize_teams`](Self::finalize_teams).
    fn compute_turn_order(&mut self) -> Vec<TeamId>;

    /// The turn order computed earlier.
    fn turn_order(&self) -> Vec<TeamId>;

    /// The team whose turn it is, once the game has started.
    fn current_team(&self) -> Option<TeamId>;

    /// Board, team attributes, and turn order, identical for everyone.
    fn setup_shared(&self) -> SetupShared;

    /// Every ship with full detail. The session redacts opponents' ships.
    fn ships(&self) -> Vec<ShipInfo>;

    /// Enemy ships `team` has legitimately spotted.
    fn discovered_ships(&self, team: &TeamId) -> Vec<ShipInfo>;

    /// Validates and applies `team`'s ship placement.
    fn place_ships(
        &mut self,
        team: &TeamId,
        placements: &[ShipPlacement],
    ) -> Result<Events, String>;

    /// Called once when every participant has placed ships.
    fn start_game(&mut self) -> Events;

    /// Passes the turn on from `team`.
    fn end_turn(&mut self, team: &TeamId) -> Events;

    /// Applies one ability of one of `team`'s ships.
    fn use_ability(
        &mut self,
        team: &TeamId,
        ship: ShipId,
        ability: usize,
        target: Option<Coordinate>,
    ) -> Result<AbilityOutcome, String>;

    /// Consequence of a participant missing the reconnection deadline,
    /// such as forfeiting the current turn.
    fn player_inactive(
        &mut self,
        identity: &Identity,
        team: Option<&TeamId>,
    ) -> Events;

    /// Snapshot written to the store on creation and at game over.
    fn export(&self) -> serde_json::Value;

    /// Releases scenario resources when the session is killed.
    fn teardown(&mut self) {}
}
