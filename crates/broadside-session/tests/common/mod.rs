//! Shared fixtures: a two-team mock scenario and a directly driven session.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broadside_client::{ClientLink, Outbound};
use broadside_protocol::{
    Coordinate, Heading, Identity, Position, Recipient, ScenarioDescriptor,
    ServerEvent, SessionCode, SetupShared, ShipId, ShipInfo, ShipPlacement,
    TeamId, TeamInfo,
};
use broadside_session::{
    AbilityOutcome, Admission, Events, MemoryStore, Scenario, Session,
    SessionCommand, SessionConfig, SessionError,
};
use broadside_transport::ConnectionId;
use serde_json::json;
use tokio::sync::mpsc;

/// Ability index that sinks the enemy fleet and decides the game.
pub const WINNING_ABILITY: usize = 99;

// =========================================================================
// Mock scenario
// =========================================================================

/// Calls observed on a [`MockScenario`] after it moved into a session.
#[derive(Debug, Default)]
pub struct MockLog {
    pub finalized: Option<BTreeMap<TeamId, Vec<Identity>>>,
    pub inactive: Vec<Identity>,
    pub placements: Vec<TeamId>,
    pub game_started: usize,
    pub teardowns: usize,
}

/// Two teams, `red` and `blue`, one ship each. Red always moves first.
pub struct MockScenario {
    max_players: usize,
    turn_order: Vec<TeamId>,
    current: Option<usize>,
    turn: u32,
    log: Arc<Mutex<MockLog>>,
}

impl MockScenario {
    pub fn new(max_players: usize) -> (Self, Arc<Mutex<MockLog>>) {
        let log = Arc::new(Mutex::new(MockLog::default()));
        let scenario = Self {
            max_players,
            turn_order: Vec::new(),
            current: None,
            turn: 0,
            log: Arc::clone(&log),
        };
        (scenario, log)
    }

    fn advance(&mut self) -> Events {
        let Some(current) = self.current else {
            return Vec::new();
        };
        let next = (current + 1) % self.turn_order.len();
        self.current = Some(next);
        self.turn += 1;
        vec![(
            Recipient::All,
            ServerEvent::TurnStart {
                team: self.turn_order[next].clone(),
                turn: self.turn,
            },
        )]
    }
}

pub fn red() -> TeamId {
    TeamId::new("red")
}

pub fn blue() -> TeamId {
    TeamId::new("blue")
}

fn ship(id: u32, team: TeamId, x: i32) -> ShipInfo {
    ShipInfo {
        id: ShipId(id),
        team,
        kind: "frigate".into(),
        position: Some(Position {
            x,
            y: 0,
            heading: Heading::North,
        }),
        attributes: BTreeMap::new(),
    }
}

impl Scenario for MockScenario {
    fn descriptor(&self) -> ScenarioDescriptor {
        ScenarioDescriptor {
            name: "mock".into(),
            description: "two frigates".into(),
            board_width: 8,
            board_height: 8,
        }
    }

    fn teams(&self) -> Vec<TeamInfo> {
        vec![
            TeamInfo {
                id: red(),
                name: "Red".into(),
                max_players: self.max_players,
            },
            TeamInfo {
                id: blue(),
                name: "Blue".into(),
                max_players: self.max_players,
            },
        ]
    }

    fn finalize_teams(&mut self, rosters: BTreeMap<TeamId, Vec<Identity>>) {
        self.log.lock().unwrap().finalized = Some(rosters);
    }

    fn compute_turn_order(&mut self) -> Vec<TeamId> {
        self.turn_order = vec![red(), blue()];
        self.turn_order.clone()
    }

    fn turn_order(&self) -> Vec<TeamId> {
        self.turn_order.clone()
    }

    fn current_team(&self) -> Option<TeamId> {
        self.current.map(|i| self.turn_order[i].clone())
    }

    fn setup_shared(&self) -> SetupShared {
        SetupShared {
            board: json!({ "width": 8, "height": 8 }),
            team_attributes: BTreeMap::new(),
            turn_order: self.turn_order.clone(),
        }
    }

    fn ships(&self) -> Vec<ShipInfo> {
        vec![ship(1, red(), 1), ship(2, blue(), 6)]
    }

    fn discovered_ships(&self, team: &TeamId) -> Vec<ShipInfo> {
        self.ships().into_iter().filter(|s| &s.team != team).collect()
    }

    fn place_ships(
        &mut self,
        team: &TeamId,
        placements: &[ShipPlacement],
    ) -> Result<Events, String> {
        if placements.is_empty() {
            return Err("no ships placed".into());
        }
        self.log.lock().unwrap().placements.push(team.clone());
        Ok(Vec::new())
    }

    fn start_game(&mut self) -> Events {
        self.current = Some(0);
        self.turn = 1;
        self.log.lock().unwrap().game_started += 1;
        vec![(
            Recipient::All,
            ServerEvent::TurnStart {
                team: self.turn_order[0].clone(),
                turn: 1,
            },
        )]
    }

    fn end_turn(&mut self, _team: &TeamId) -> Events {
        self.advance()
    }

    fn use_ability(
        &mut self,
        team: &TeamId,
        _ship: ShipId,
        ability: usize,
        _target: Option<Coordinate>,
    ) -> Result<AbilityOutcome, String> {
        match ability {
            0 => Ok(AbilityOutcome::default()),
            WINNING_ABILITY => Ok(AbilityOutcome {
                events: Vec::new(),
                winner: Some(team.clone()),
            }),
            other => Err(format!("no ability {other}")),
        }
    }

    fn player_inactive(&mut self, identity: &Identity, team: Option<&TeamId>) -> Events {
        self.log.lock().unwrap().inactive.push(identity.clone());
        if team.is_some() && team.cloned() == self.current_team() {
            self.advance()
        } else {
            Vec::new()
        }
    }

    fn export(&self) -> serde_json::Value {
        json!({ "turn": self.turn })
    }

    fn teardown(&mut self) {
        self.log.lock().unwrap().teardowns += 1;
    }
}

// =========================================================================
// Directly driven session
// =========================================================================

/// A session driven by hand: commands its timers post are applied by
/// [`Harness::pump`] instead of an actor task.
pub struct Harness {
    pub session: Session<MockScenario>,
    pub commands: mpsc::UnboundedReceiver<SessionCommand>,
    pub log: Arc<Mutex<MockLog>>,
    pub store: Arc<MemoryStore>,
    pub config: SessionConfig,
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        join_timeout: Duration::from_secs(30),
        start_setup_delay: Duration::from_secs(5),
        reconnect_timeout: Duration::from_secs(10),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_max_players(1)
    }

    pub fn with_max_players(max_players: usize) -> Self {
        let (scenario, log) = MockScenario::new(max_players);
        let store = Arc::new(MemoryStore::new());
        let (sender, commands) = mpsc::unbounded_channel();
        let config = test_config();
        let mut session = Session::new(
            SessionCode::new("TESTCODE"),
            "match-1",
            scenario,
            config.clone(),
            store.clone(),
            sender,
        );
        session.arm_join_timeout();
        Self {
            session,
            commands,
            log,
            store,
            config,
        }
    }

    /// Applies every command queued so far. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            self.session.handle_command(command);
            applied += 1;
        }
        applied
    }

    /// Lets virtual time run for `duration`, then applies what fired.
    pub async fn advance(&mut self, duration: Duration) -> usize {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
        self.pump()
    }

    pub fn connect(&mut self, name: &str) -> Result<Peer, SessionError> {
        let identity = Identity::from_username(name);
        let (link, rx) = ClientLink::channel(ConnectionId::next());
        let conn_id = link.conn_id();
        let admission = self.session.admit(identity.clone(), link)?;
        Ok(Peer {
            identity,
            conn_id,
            rx,
            admission,
        })
    }

    /// Connects `name`, joins `team`, and marks it ready.
    pub fn seat(&mut self, name: &str, team: TeamId) -> Peer {
        let peer = self.connect(name).unwrap();
        self.session.handle_request(
            &peer.identity,
            peer.conn_id,
            broadside_protocol::ClientRequest::JoinTeam { team },
        );
        self.session.handle_request(
            &peer.identity,
            peer.conn_id,
            broadside_protocol::ClientRequest::Ready { ready: true },
        );
        peer
    }

    /// Seats alice (red) and bob (blue) and runs the setup countdown.
    pub async fn into_setup(&mut self) -> (Peer, Peer) {
        let mut alice = self.seat("alice", red());
        let mut bob = self.seat("bob", blue());
        let countdown = self.config.start_setup_delay + Duration::from_millis(1);
        self.advance(countdown).await;
        alice.drain();
        bob.drain();
        (alice, bob)
    }

    /// Like [`into_setup`](Self::into_setup), then both place their ships.
    pub async fn into_game(&mut self) -> (Peer, Peer) {
        let (mut alice, mut bob) = self.into_setup().await;
        for peer in [&alice, &bob] {
            self.session.handle_request(
                &peer.identity,
                peer.conn_id,
                broadside_protocol::ClientRequest::ShipPlacement {
                    ships: vec![placement(1)],
                },
            );
        }
        alice.drain();
        bob.drain();
        (alice, bob)
    }
}

pub fn placement(ship: u32) -> ShipPlacement {
    ShipPlacement {
        ship: ShipId(ship),
        position: Position {
            x: 2,
            y: 2,
            heading: Heading::East,
        },
    }
}

// =========================================================================
// Peer
// =========================================================================

/// The far end of one admitted connection.
pub struct Peer {
    pub identity: Identity,
    pub conn_id: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<Outbound>,
    pub admission: Admission,
}

impl Peer {
    /// Everything queued for this connection so far.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            out.push(item);
        }
        out
    }

    /// Only the events, in order.
    pub fn events(&mut self) -> Vec<ServerEvent> {
        self.drain()
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Event(event) => Some(event),
                Outbound::Close { .. } => None,
            })
            .collect()
    }
}

/// The `event` tag of `event`, for order assertions.
pub fn tag(event: &ServerEvent) -> String {
    serde_json::to_value(event).unwrap()["event"]
        .as_str()
        .unwrap()
        .to_string()
}

pub fn tags(events: &[ServerEvent]) -> Vec<String> {
    events.iter().map(tag).collect()
}
