//! The session state machine: phases, roster, and broadcast.
//!
//! A [`Session`] is plain synchronous state. It is driven by exactly one
//! actor task (see [`SessionHandle`](crate::SessionHandle)), so every
//! method here runs to completion before the next command is looked at.
//! Anything that has to happen later (timer expiry, a finished store
//! write) comes back as a [`SessionCommand`] on the same queue and is
//! re-validated against the phase and roster at that point.
//!
//! ```text
//! Lobby ──attempt_enter_setup──→ EnteringSetup ──start_setup──→ Setup
//!                                                                 │
//!          Killed ←──kill── Finished ←──end── InProgress ←──attempt_start
//! ```
//!
//! Every non-terminal phase can also be killed directly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use broadside_client::{Client, ClientLink};
use broadside_protocol::{
    CLOSE_NORMAL, EnterSetupFailure, Identity, Phase, Recipient, ServerEvent,
    SessionCode, TeamId,
};
use broadside_timer::TimerRegistry;
use broadside_transport::ConnectionId;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    Admission, Events, INSERT_RESULT, Scenario, SessionCommand, SessionConfig,
    SessionError, SessionInfo, SessionTimer, Store, StoreError,
};

/// Session timer: kills a session whose lobby stays empty.
pub const JOIN_TIMEOUT_TIMER: &str = "join_timeout";

/// Session timer: the countdown from `EnteringSetup` to `Setup`.
pub const START_SETUP_TIMER: &str = "start_setup";

/// Invoked exactly once when a session is killed, with its code and the
/// kill reason.
pub type TeardownCallback = Box<dyn FnOnce(&SessionCode, &str) + Send + 'static>;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// One running match: phase, roster, timers, and the hosted scenario.
pub struct Session<S: Scenario> {
    code: SessionCode,
    persistence_key: String,
    phase: Phase,
    /// Join order. At most one client per identity.
    roster: Vec<Client>,
    scenario: S,
    config: SessionConfig,
    timers: TimerRegistry,
    store: Arc<dyn Store>,
    /// This session's own command queue, for timers and store writes.
    commands: mpsc::UnboundedSender<SessionCommand>,
    on_teardown: Option<TeardownCallback>,
}

impl<S: Scenario> Session<S> {
    pub fn new(
        code: SessionCode,
        persistence_key: impl Into<String>,
        scenario: S,
        config: SessionConfig,
        store: Arc<dyn Store>,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        let timers = TimerRegistry::new(code.to_string());
        Self {
            code,
            persistence_key: persistence_key.into(),
            phase: Phase::Lobby,
            roster: Vec::new(),
            scenario,
            config,
            timers,
            store,
            commands,
            on_teardown: None,
        }
    }

    /// Registers the callback run when the session is killed.
    pub fn on_teardown<F>(&mut self, callback: F)
    where
        F: FnOnce(&SessionCode, &str) + Send + 'static,
    {
        self.on_teardown = Some(Box::new(callback));
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    pub fn persistence_key(&self) -> &str {
        &self.persistence_key
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn roster(&self) -> &[Client] {
        &self.roster
    }

    pub fn client(&self, identity: &Identity) -> Option<&Client> {
        self.roster.iter().find(|c| c.identity() == identity)
    }

    pub(crate) fn client_mut(&mut self, identity: &Identity) -> Option<&mut Client> {
        self.roster.iter_mut().find(|c| c.identity() == identity)
    }

    fn position(&self, identity: &Identity) -> Option<usize> {
        self.roster.iter().position(|c| c.identity() == identity)
    }

    pub fn scenario(&self) -> &S {
        &self.scenario
    }

    pub(crate) fn scenario_mut(&mut self) -> &mut S {
        &mut self.scenario
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// The session's timer table, for scenario-level timers such as a
    /// turn clock. Disabled together with the built-in slots on kill.
    pub fn timers_mut(&mut self) -> &mut TimerRegistry {
        &mut self.timers
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            code: self.code.clone(),
            phase: self.phase,
            players: self.roster.len(),
            connected: self.roster.iter().filter(|c| c.connected).count(),
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// A timer callback that posts `timer` back onto this session's queue.
    fn post_on_fire(&self, timer: SessionTimer) -> impl Fn() + Send + Sync + 'static {
        let commands = self.commands.clone();
        move || {
            let _ = commands.send(SessionCommand::Timer(timer.clone()));
        }
    }

    /// Defines and starts the join timeout.
    pub fn arm_join_timeout(&mut self) {
        let on_fire = self.post_on_fire(SessionTimer::JoinTimeout);
        self.timers
            .define(JOIN_TIMEOUT_TIMER, on_fire, self.config.join_timeout, false);
        self.timers.start(JOIN_TIMEOUT_TIMER);
    }

    pub(crate) fn join_timeout_elapsed(&mut self) {
        if self.phase != Phase::Lobby || !self.roster.is_empty() {
            debug!(session = %self.code, phase = %self.phase, "stale join timeout ignored");
            return;
        }
        self.kill("join timeout");
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Attaches a freshly authenticated connection to this session.
    ///
    /// Decides between a new join and a reconnection in one step, so two
    /// connections racing for the same identity are settled in queue order.
    ///
    /// # Errors
    /// [`SessionError::AdmissionDenied`] when the identity is already
    /// connected, or has no seat to come back to once the lobby closed.
    pub fn admit(
        &mut self,
        identity: Identity,
        link: ClientLink,
    ) -> Result<Admission, SessionError> {
        let connected = self.client(&identity).map(|c| c.connected);
        match connected {
            None if self.phase.accepts_joins() => {
                link.send(self.connection_info(&identity));
                self.join_client(Client::new(identity, link))?;
                Ok(Admission::Joined)
            }
            None => Err(SessionError::AdmissionDenied(format!(
                "{identity} has no seat in session {} ({})",
                self.code, self.phase
            ))),
            Some(true) => Err(SessionError::AdmissionDenied(format!(
                "{identity} is already connected"
            ))),
            Some(false) => {
                if !self.phase.accepts_reconnections() {
                    return Err(SessionError::AdmissionDenied(format!(
                        "session {} does not accept reconnections in {}",
                        self.code, self.phase
                    )));
                }
                link.send(self.connection_info(&identity));
                self.reconnect_client(&identity, link)?;
                Ok(Admission::Reconnected)
            }
        }
    }

    fn connection_info(&self, identity: &Identity) -> ServerEvent {
        ServerEvent::ConnectionInfo {
            identity: identity.clone(),
            session: self.code.clone(),
            reconnect_timeout_ms: millis(self.config.reconnect_timeout),
        }
    }

    fn game_info(&self) -> ServerEvent {
        ServerEvent::GameInfo {
            session: self.code.clone(),
            phase: self.phase,
            scenario: self.scenario.descriptor(),
            teams: self.scenario.teams(),
            players: self.roster.iter().map(Client::summary).collect(),
        }
    }

    /// The setup snapshot as seen by a member of `team`: own ships in
    /// full, every other ship without its position.
    fn setup_info_for(&self, team: Option<&TeamId>) -> ServerEvent {
        let ships = self
            .scenario
            .ships()
            .into_iter()
            .map(|ship| {
                if Some(&ship.team) == team {
                    ship
                } else {
                    ship.redacted()
                }
            })
            .collect();
        ServerEvent::SetupInfo {
            shared: self.scenario.setup_shared(),
            ships,
        }
    }

    fn game_start(&self) -> ServerEvent {
        ServerEvent::GameStart {
            turn_order: self.scenario.turn_order(),
            current_team: self.scenario.current_team(),
        }
    }

    /// Adds a new participant. Lobby only, one client per identity.
    pub fn join_client(&mut self, client: Client) -> Result<(), SessionError> {
        let identity = client.identity().clone();
        if !self.phase.accepts_joins() {
            return Err(SessionError::AdmissionDenied(format!(
                "session {} is in {}",
                self.code, self.phase
            )));
        }
        if self.position(&identity).is_some() {
            return Err(SessionError::AdmissionDenied(format!(
                "{identity} is already in session {}",
                self.code
            )));
        }

        self.timers.stop(JOIN_TIMEOUT_TIMER);
        self.roster.push(client);

        let snapshot = self.game_info();
        self.send_to(&identity, snapshot);
        self.broadcast_except(
            &identity,
            ServerEvent::PlayerJoin {
                identity: identity.clone(),
                reconnection: false,
            },
        );

        info!(session = %self.code, %identity, players = self.roster.len(), "client joined");
        Ok(())
    }

    /// Reattaches a disconnected participant and replays the state it
    /// needs for the current phase.
    pub fn reconnect_client(
        &mut self,
        identity: &Identity,
        link: ClientLink,
    ) -> Result<(), SessionError> {
        if !self.phase.accepts_reconnections() {
            return Err(SessionError::AdmissionDenied(format!(
                "session {} does not accept reconnections in {}",
                self.code, self.phase
            )));
        }
        let Some(client) = self.client_mut(identity) else {
            return Err(SessionError::AdmissionDenied(format!(
                "{identity} is not in session"
            )));
        };
        if !client.can_reconnect() {
            return Err(SessionError::AdmissionDenied(format!(
                "{identity} cannot reconnect"
            )));
        }
        client.reattach(link);

        let team = client.team.clone();
        self.send_to(identity, self.game_info());
        if matches!(self.phase, Phase::Setup | Phase::InProgress) {
            self.send_to(identity, self.setup_info_for(team.as_ref()));
        }
        if self.phase == Phase::InProgress {
            self.send_to(identity, self.game_start());
            if let Some(team) = &team {
                for ship in self.scenario.discovered_ships(team) {
                    self.send_to(identity, ServerEvent::ShipAppear { ship });
                }
            }
        }

        self.broadcast_except(
            identity,
            ServerEvent::PlayerJoin {
                identity: identity.clone(),
                reconnection: true,
            },
        );
        info!(session = %self.code, %identity, phase = %self.phase, "client reconnected");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Departure
    // -----------------------------------------------------------------------

    /// Handles the close of connection `conn_id`.
    ///
    /// Ignored when the client has since reattached on a newer
    /// connection. Otherwise the client keeps its seat only if
    /// reconnection is allowed for it in the current phase.
    pub fn connection_closed(&mut self, identity: &Identity, conn_id: ConnectionId) {
        let Some(client) = self.client(identity) else {
            debug!(session = %self.code, %identity, %conn_id, "disconnect for unknown client ignored");
            return;
        };
        if client.conn_id() != conn_id || !client.connected {
            debug!(session = %self.code, %identity, %conn_id, "stale disconnect ignored");
            return;
        }
        let allow = client.allow_reconnection && self.phase.accepts_reconnections();
        self.disconnect_client(identity, allow);
    }

    /// Marks a participant gone, either for good or until its
    /// reconnection deadline.
    pub fn disconnect_client(&mut self, identity: &Identity, allow_reconnection: bool) {
        let Some(idx) = self.position(identity) else {
            return;
        };

        if allow_reconnection {
            let deadline = self.config.reconnect_timeout;
            let epoch = self.roster[idx].disconnect(true);
            let on_expiry = self.post_on_fire(SessionTimer::ReconnectDeadline {
                identity: identity.clone(),
                epoch,
            });
            self.roster[idx].arm_reconnect_deadline(deadline, on_expiry);
            self.broadcast_except(
                identity,
                ServerEvent::PlayerLeave {
                    identity: identity.clone(),
                    temporary: true,
                },
            );
            info!(session = %self.code, %identity, ?deadline, "client disconnected, awaiting reconnection");
        } else {
            let mut client = self.roster.remove(idx);
            client.disconnect(false);
            client.disable_timers();
            self.broadcast_event(ServerEvent::PlayerLeave {
                identity: identity.clone(),
                temporary: false,
            });
            info!(session = %self.code, %identity, players = self.roster.len(), "client left");
        }

        if self.phase == Phase::Lobby {
            if self.roster.is_empty() {
                self.timers.start(JOIN_TIMEOUT_TIMER);
            } else {
                self.attempt_enter_setup();
            }
        }
    }

    /// Applies an expired reconnection deadline.
    ///
    /// `epoch` must match the client's current disconnect; a deadline
    /// armed for an earlier disconnect is dropped.
    pub(crate) fn reconnect_deadline_elapsed(&mut self, identity: &Identity, epoch: u64) {
        let Some(idx) = self.position(identity) else {
            return;
        };
        let client = &mut self.roster[idx];
        if client.connected || client.disconnect_epoch() != epoch || !client.allow_reconnection {
            debug!(session = %self.code, %identity, epoch, "stale reconnection deadline ignored");
            return;
        }

        client.expire();
        let team = client.team.clone();
        let events = self.scenario.player_inactive(identity, team.as_ref());
        self.dispatch(events);

        let mut client = self.roster.remove(idx);
        client.disable_timers();
        self.broadcast_event(ServerEvent::PlayerTimedOut {
            identity: identity.clone(),
        });
        info!(session = %self.code, %identity, "client timed out");

        if self.roster.is_empty() {
            self.kill("all players left");
        } else if self.phase == Phase::Setup {
            self.attempt_start();
        }
    }

    // -----------------------------------------------------------------------
    // Phase transitions
    // -----------------------------------------------------------------------

    /// Lobby → EnteringSetup, when every connected client is ready and
    /// every team's ready count fits its capacity.
    ///
    /// Outside the lobby this is a no-op. A failed team check broadcasts
    /// `enter_setup_failure` and leaves the phase alone.
    pub fn attempt_enter_setup(&mut self) {
        if self.phase != Phase::Lobby {
            return;
        }
        let connected: Vec<&Client> = self.roster.iter().filter(|c| c.connected).collect();
        if connected.is_empty() || connected.iter().any(|c| !c.ready) {
            return;
        }

        for team in self.scenario.teams() {
            let ready = connected
                .iter()
                .filter(|c| c.team.as_ref() == Some(&team.id))
                .count();
            let reason = if ready == 0 {
                EnterSetupFailure::TeamEmpty
            } else if ready > team.max_players {
                EnterSetupFailure::TeamOverCapacity
            } else {
                continue;
            };
            debug!(session = %self.code, team = %team.id, ?reason, ready, "cannot enter setup");
            self.broadcast_event(ServerEvent::EnterSetupFailure {
                reason,
                team: team.id,
            });
            return;
        }

        let wait = self.config.start_setup_delay;
        self.broadcast_event(ServerEvent::EnteringSetup {
            wait_ms: millis(wait),
        });
        let on_fire = self.post_on_fire(SessionTimer::StartSetup);
        self.timers.define(START_SETUP_TIMER, on_fire, wait, false);
        self.timers.start(START_SETUP_TIMER);
        self.phase = Phase::EnteringSetup;
        info!(session = %self.code, ?wait, "entering setup");
    }

    /// EnteringSetup → Setup, driven by the start-setup timer.
    pub fn start_setup(&mut self) {
        if self.phase != Phase::EnteringSetup {
            debug!(session = %self.code, phase = %self.phase, "stale start_setup ignored");
            return;
        }
        if self.roster.is_empty() {
            self.kill("no players left before setup");
            return;
        }

        let mut rosters: BTreeMap<TeamId, Vec<Identity>> = BTreeMap::new();
        for client in &mut self.roster {
            if client.connected {
                client.allow_reconnection = true;
            }
            if let Some(team) = &client.team {
                rosters
                    .entry(team.clone())
                    .or_default()
                    .push(client.identity().clone());
            }
        }
        self.scenario.finalize_teams(rosters);
        let turn_order = self.scenario.compute_turn_order();
        self.phase = Phase::Setup;

        for client in &self.roster {
            client.send(self.setup_info_for(client.team.as_ref()));
        }
        info!(session = %self.code, ?turn_order, "setup started");
    }

    /// Setup → InProgress, once every client has placed its ships.
    pub fn attempt_start(&mut self) {
        if self.phase != Phase::Setup {
            return;
        }
        if self.roster.is_empty() || self.roster.iter().any(|c| !c.ships_placed) {
            return;
        }

        let events = self.scenario.start_game();
        self.phase = Phase::InProgress;
        self.broadcast_event(self.game_start());
        self.dispatch(events);
        info!(session = %self.code, current_team = ?self.scenario.current_team(), "game started");
    }

    /// InProgress → Finished: announces the outcome and records it.
    ///
    /// The store write runs on its own task; its completion comes back as
    /// [`SessionCommand::ResultsRecorded`] and triggers the teardown.
    pub fn end(&mut self, winner: Option<TeamId>, message: impl Into<String>) {
        if self.phase != Phase::InProgress {
            warn!(session = %self.code, phase = %self.phase, "end outside of a running game ignored");
            return;
        }
        let message = message.into();
        self.phase = Phase::Finished;
        self.broadcast_event(ServerEvent::GameOver {
            winner: winner.clone(),
            message: message.clone(),
        });
        info!(session = %self.code, ?winner, "game over");

        let params = vec![
            Value::String(self.persistence_key.clone()),
            winner.map_or(Value::Null, |team| Value::String(team.0)),
            Value::String(message),
            self.scenario.export(),
        ];
        let store = Arc::clone(&self.store);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = store.query(INSERT_RESULT, &params).await.map(|_| ());
            let _ = commands.send(SessionCommand::ResultsRecorded(result));
        });
    }

    /// Continuation of [`end`](Self::end) once the store write finished.
    pub(crate) fn results_recorded(&mut self, result: Result<(), StoreError>) {
        if self.phase != Phase::Finished {
            debug!(session = %self.code, phase = %self.phase, "late result write ignored");
            return;
        }
        if let Err(e) = result {
            error!(session = %self.code, key = %self.persistence_key, error = %e, "failed to record match result");
        }
        self.kill("game over");
    }

    /// Any phase → Killed. Disables every timer before anything else.
    ///
    /// Killing an already killed session logs a warning and does nothing.
    pub fn kill(&mut self, reason: &str) {
        if self.phase == Phase::Killed {
            warn!(session = %self.code, reason, "kill on a killed session ignored");
            return;
        }

        self.timers.disable_all();
        for client in &mut self.roster {
            client.disable_timers();
        }
        for client in &self.roster {
            client.close(CLOSE_NORMAL, reason);
        }
        self.roster.clear();

        let previous = self.phase;
        self.phase = Phase::Killed;
        self.scenario.teardown();
        if let Some(on_teardown) = self.on_teardown.take() {
            on_teardown(&self.code, reason);
        }
        info!(session = %self.code, from = %previous, reason, "session killed");
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Sends `event` to every connected roster member. Returns how many
    /// were reached.
    pub fn broadcast_event(&self, event: ServerEvent) -> usize {
        self.roster
            .iter()
            .filter(|client| client.send(event.clone()))
            .count()
    }

    /// Like [`broadcast_event`](Self::broadcast_event), skipping `identity`.
    pub fn broadcast_except(&self, identity: &Identity, event: ServerEvent) -> usize {
        self.roster
            .iter()
            .filter(|client| client.identity() != identity)
            .filter(|client| client.send(event.clone()))
            .count()
    }

    fn send_to(&self, identity: &Identity, event: ServerEvent) -> bool {
        self.client(identity).is_some_and(|client| client.send(event))
    }

    /// Delivers scenario-produced events to their recipients.
    pub fn dispatch(&self, events: Events) {
        for (recipient, event) in events {
            match recipient {
                Recipient::All => {
                    self.broadcast_event(event);
                }
                Recipient::Client(identity) => {
                    self.send_to(&identity, event);
                }
                Recipient::AllExcept(identity) => {
                    self.broadcast_except(&identity, event);
                }
                Recipient::Team(team) => {
                    for client in &self.roster {
                        if client.team.as_ref() == Some(&team) {
                            client.send(event.clone());
                        }
                    }
                }
            }
        }
    }
}
