//! Per-kind request handlers.
//!
//! Requests reach these functions already decoded and validated against
//! their schema. What remains are game-state rules: phase, team, turn.
//! A request that breaks one of them is dropped with a debug log and the
//! connection stays open; the client may simply try again later.

use broadside_protocol::{
    ClientRequest, Coordinate, Identity, Phase, ServerEvent, ShipId,
    ShipPlacement, TeamId,
};
use broadside_transport::ConnectionId;
use tracing::debug;

use crate::{Scenario, Session};

impl<S: Scenario> Session<S> {
    /// Routes one request from `identity` on connection `conn_id`.
    pub fn handle_request(
        &mut self,
        identity: &Identity,
        conn_id: ConnectionId,
        request: ClientRequest,
    ) {
        let Some(client) = self.client(identity) else {
            debug!(session = %self.code(), %identity, "request from non-member ignored");
            return;
        };
        if !client.connected || client.conn_id() != conn_id {
            debug!(session = %self.code(), %identity, %conn_id, "request from stale connection ignored");
            return;
        }

        let kind = request.kind();
        let outcome = match request {
            ClientRequest::JoinTeam { team } => self.join_team(identity, team),
            ClientRequest::Ready { ready } => self.ready(identity, ready),
            ClientRequest::ShipPlacement { ships } => self.ship_placement(identity, &ships),
            ClientRequest::EndTurn {} => self.end_turn(identity),
            ClientRequest::UseAbility {
                ship,
                ability,
                target,
            } => self.use_ability(identity, ship, ability, target),
        };

        if let Err(reason) = outcome {
            debug!(session = %self.code(), %identity, %kind, %reason, "request ignored");
        }
    }

    fn require_phase(&self, phase: Phase) -> Result<(), String> {
        if self.phase() == phase {
            Ok(())
        } else {
            Err(format!("not allowed in {}", self.phase()))
        }
    }

    /// The client's team, required to be the one to move.
    fn require_turn(&self, identity: &Identity) -> Result<TeamId, String> {
        self.require_phase(Phase::InProgress)?;
        let team = self
            .client(identity)
            .and_then(|c| c.team.clone())
            .ok_or("client has no team")?;
        if self.scenario().current_team().as_ref() != Some(&team) {
            return Err(format!("not {team}'s turn"));
        }
        Ok(team)
    }

    fn join_team(&mut self, identity: &Identity, team: TeamId) -> Result<(), String> {
        self.require_phase(Phase::Lobby)?;
        if !self.scenario().teams().iter().any(|t| t.id == team) {
            return Err(format!("unknown team {team}"));
        }
        let client = self.client_mut(identity).ok_or("client not found")?;
        if client.ready {
            return Err("cannot change team while ready".into());
        }
        client.team = Some(team.clone());

        self.broadcast_event(ServerEvent::TeamAssign {
            identity: identity.clone(),
            team,
        });
        Ok(())
    }

    fn ready(&mut self, identity: &Identity, ready: bool) -> Result<(), String> {
        self.require_phase(Phase::Lobby)?;
        let client = self.client_mut(identity).ok_or("client not found")?;
        if client.team.is_none() {
            return Err("join a team first".into());
        }
        client.ready = ready;

        self.broadcast_event(ServerEvent::PlayerReady {
            identity: identity.clone(),
            ready,
        });
        if ready {
            self.attempt_enter_setup();
        }
        Ok(())
    }

    fn ship_placement(
        &mut self,
        identity: &Identity,
        ships: &[ShipPlacement],
    ) -> Result<(), String> {
        self.require_phase(Phase::Setup)?;
        let client = self.client(identity).ok_or("client not found")?;
        if client.ships_placed {
            return Err("ships already placed".into());
        }
        let team = client.team.clone().ok_or("client has no team")?;

        let events = self.scenario_mut().place_ships(&team, ships)?;
        if let Some(client) = self.client_mut(identity) {
            client.ships_placed = true;
        }
        self.dispatch(events);
        self.attempt_start();
        Ok(())
    }

    fn end_turn(&mut self, identity: &Identity) -> Result<(), String> {
        let team = self.require_turn(identity)?;
        let events = self.scenario_mut().end_turn(&team);
        self.dispatch(events);
        Ok(())
    }

    fn use_ability(
        &mut self,
        identity: &Identity,
        ship: ShipId,
        ability: usize,
        target: Option<Coordinate>,
    ) -> Result<(), String> {
        let team = self.require_turn(identity)?;
        let outcome = self
            .scenario_mut()
            .use_ability(&team, ship, ability, target)?;
        self.dispatch(outcome.events);
        if let Some(winner) = outcome.winner {
            let message = format!("{winner} wins");
            self.end(Some(winner), message);
        }
        Ok(())
    }
}
