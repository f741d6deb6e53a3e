//! Error types for the session layer.

use broadside_protocol::SessionCode;

use crate::StoreError;

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The store rejected a session record or match result.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// The session's actor has stopped (killed or finished).
    #[error("session {0} is unavailable")]
    Unavailable(SessionCode),

    /// No session is registered under this code.
    #[error("session {0} not found")]
    NotFound(SessionCode),

    /// The session refused to attach this identity.
    /// For example, the identity is already connected, or the lobby has
    /// closed and the identity has no seat to reconnect to.
    #[error("admission denied: {0}")]
    AdmissionDenied(String),

    /// The configured session limit is reached.
    #[error("session capacity reached ({limit} live sessions)")]
    CapacityReached { limit: usize },

    /// Every sampled session code was already taken.
    #[error("no free session code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
