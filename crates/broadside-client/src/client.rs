//! One participant's state within a session.

use std::time::Duration;

use broadside_protocol::{Identity, PlayerSummary, ServerEvent, TeamId};
use broadside_timer::TimerRegistry;
use broadside_transport::ConnectionId;

use crate::ClientLink;

/// Name of the per-client timer slot holding the reconnection deadline.
pub const RECONNECT_TIMER: &str = "reconnect_deadline";

/// A participant in one session.
///
/// Created once per identity per session and never recreated: a reconnect
/// swaps the [`ClientLink`] and flips the flags back, keeping team and
/// placement intact.
///
/// ```text
///   connected ──(drop, reconnectable)──→ disconnected ──(deadline)──→ inactive
///       ↑                                      │
///       └──────────────(reattach)──────────────┘
/// ```
///
/// Once `connected` and `allow_reconnection` are both false the client is
/// inactive and the session removes it from the roster.
#[derive(Debug)]
pub struct Client {
    identity: Identity,
    link: ClientLink,

    pub connected: bool,
    /// Whether a dropped connection keeps this client's seat. Off in the
    /// lobby, switched on when setup starts.
    pub allow_reconnection: bool,
    pub ready: bool,
    pub ships_placed: bool,
    pub team: Option<TeamId>,

    timers: TimerRegistry,
    /// Bumped on every disconnect so a deadline armed for an earlier
    /// disconnect can be recognized and dropped.
    disconnect_epoch: u64,
}

impl Client {
    pub fn new(identity: Identity, link: ClientLink) -> Self {
        let timers = TimerRegistry::new(identity.to_string());
        Self {
            identity,
            link,
            connected: true,
            allow_reconnection: false,
            ready: false,
            ships_placed: false,
            team: None,
            timers,
            disconnect_epoch: 0,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The connection this client is currently attached to.
    pub fn conn_id(&self) -> ConnectionId {
        self.link.conn_id()
    }

    /// Queues an event for the current connection.
    ///
    /// Returns `false` when the client is disconnected or its writer has
    /// gone away; the event is dropped in both cases.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.connected && self.link.send(event)
    }

    /// Asks the current connection to close with `code`.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.link.close(code, reason);
    }

    /// Marks the transport as gone and returns the new disconnect epoch.
    pub fn disconnect(&mut self, allow_reconnection: bool) -> u64 {
        self.connected = false;
        self.allow_reconnection = allow_reconnection;
        self.disconnect_epoch += 1;
        if !allow_reconnection {
            self.timers.stop(RECONNECT_TIMER);
        }
        self.disconnect_epoch
    }

    /// Attaches a new connection and cancels the reconnection deadline.
    pub fn reattach(&mut self, link: ClientLink) {
        self.link = link;
        self.connected = true;
        self.timers.stop(RECONNECT_TIMER);
        tracing::debug!(identity = %self.identity, conn_id = %self.link.conn_id(), "client reattached");
    }

    /// Defines and starts the reconnection deadline.
    pub fn arm_reconnect_deadline<F>(&mut self, deadline: Duration, on_expiry: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.timers.define(RECONNECT_TIMER, on_expiry, deadline, false);
        self.timers.start(RECONNECT_TIMER);
    }

    /// Marks the client permanently gone.
    pub fn expire(&mut self) {
        self.allow_reconnection = false;
        self.timers.stop(RECONNECT_TIMER);
    }

    /// Cancels every timer for good. Called on session teardown.
    pub fn disable_timers(&mut self) {
        self.timers.disable_all();
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn disconnect_epoch(&self) -> u64 {
        self.disconnect_epoch
    }

    /// Disconnected but still holding a seat.
    pub fn can_reconnect(&self) -> bool {
        !self.connected && self.allow_reconnection
    }

    /// Disconnected with no way back.
    pub fn is_inactive(&self) -> bool {
        !self.connected && !self.allow_reconnection
    }

    /// What other participants see about this client.
    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            identity: self.identity.clone(),
            team: self.team.clone(),
            ready: self.ready,
            connected: self.connected,
        }
    }
}
