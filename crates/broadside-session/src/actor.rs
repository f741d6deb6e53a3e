//! Session actor: the one task allowed to touch a session's state.
//!
//! Connections, timers, and background store writes never call into a
//! [`Session`] directly. They post a [`SessionCommand`] through a
//! [`SessionHandle`] (or a clone of the raw sender), and the actor applies
//! commands strictly in arrival order.

use broadside_client::ClientLink;
use broadside_protocol::{ClientRequest, Identity, Phase, SessionCode};
use broadside_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot};

use crate::{Scenario, Session, SessionError, StoreError};

/// A timer expiry, posted by a timer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTimer {
    JoinTimeout,
    StartSetup,
    /// `epoch` is the client's disconnect epoch when the deadline was armed.
    ReconnectDeadline { identity: Identity, epoch: u64 },
}

/// How an admitted connection was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Joined,
    Reconnected,
}

/// A snapshot of session metadata (not the game state itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub code: SessionCode,
    pub phase: Phase,
    /// Roster size, disconnected-but-reconnectable clients included.
    pub players: usize,
    pub connected: usize,
}

/// Commands applied by the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// Attach an authenticated connection as a new or returning client.
    Admit {
        identity: Identity,
        link: ClientLink,
        reply: oneshot::Sender<Result<Admission, SessionError>>,
    },

    /// A decoded request from an attached connection.
    Request {
        identity: Identity,
        conn_id: ConnectionId,
        request: ClientRequest,
    },

    /// Connection `conn_id` of `identity` has closed.
    Disconnect {
        identity: Identity,
        conn_id: ConnectionId,
    },

    Info {
        reply: oneshot::Sender<SessionInfo>,
    },

    Kill {
        reason: String,
    },

    Timer(SessionTimer),

    /// The result write started by `end` has finished.
    ResultsRecorded(Result<(), StoreError>),
}

impl<S: Scenario> Session<S> {
    /// Applies one command.
    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Admit {
                identity,
                link,
                reply,
            } => {
                let _ = reply.send(self.admit(identity, link));
            }
            SessionCommand::Request {
                identity,
                conn_id,
                request,
            } => self.handle_request(&identity, conn_id, request),
            SessionCommand::Disconnect { identity, conn_id } => {
                self.connection_closed(&identity, conn_id);
            }
            SessionCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            SessionCommand::Kill { reason } => self.kill(&reason),
            SessionCommand::Timer(SessionTimer::JoinTimeout) => self.join_timeout_elapsed(),
            SessionCommand::Timer(SessionTimer::StartSetup) => self.start_setup(),
            SessionCommand::Timer(SessionTimer::ReconnectDeadline { identity, epoch }) => {
                self.reconnect_deadline_elapsed(&identity, epoch);
            }
            SessionCommand::ResultsRecorded(result) => self.results_recorded(result),
        }
    }

    /// Runs the actor loop until the session is killed.
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<SessionCommand>) {
        tracing::info!(session = %self.code(), "session actor started");

        while let Some(command) = receiver.recv().await {
            self.handle_command(command);
            if self.phase() == Phase::Killed {
                break;
            }
        }

        tracing::info!(session = %self.code(), "session actor stopped");
    }
}

/// Spawns the actor task for `session`, draining `receiver`.
///
/// `receiver` must belong to the sender the session was constructed with,
/// so its timers and store writes land on the same queue.
pub(crate) fn spawn_session<S: Scenario>(
    session: Session<S>,
    receiver: mpsc::UnboundedReceiver<SessionCommand>,
) {
    tokio::spawn(session.run(receiver));
}

/// Handle to a running session actor.
///
/// Cheap to clone: it is an `mpsc::UnboundedSender` plus the code.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    code: SessionCode,
    sender: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(code: SessionCode, sender: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { code, sender }
    }

    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn post(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.sender
            .send(command)
            .map_err(|_| SessionError::Unavailable(self.code.clone()))
    }

    /// Asks the session to attach `identity` through `link`.
    pub async fn admit(
        &self,
        identity: Identity,
        link: ClientLink,
    ) -> Result<Admission, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(SessionCommand::Admit {
            identity,
            link,
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.code.clone()))?
    }

    /// Forwards a decoded request (fire-and-forget).
    pub fn request(
        &self,
        identity: Identity,
        conn_id: ConnectionId,
        request: ClientRequest,
    ) -> Result<(), SessionError> {
        self.post(SessionCommand::Request {
            identity,
            conn_id,
            request,
        })
    }

    /// Reports that connection `conn_id` of `identity` has closed.
    pub fn disconnect(&self, identity: Identity, conn_id: ConnectionId) -> Result<(), SessionError> {
        self.post(SessionCommand::Disconnect { identity, conn_id })
    }

    /// Requests the current session info.
    pub async fn info(&self) -> Result<SessionInfo, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(SessionCommand::Info { reply: reply_tx })?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.code.clone()))
    }

    /// Tells the session to tear itself down.
    pub fn kill(&self, reason: impl Into<String>) -> Result<(), SessionError> {
        self.post(SessionCommand::Kill {
            reason: reason.into(),
        })
    }
}
