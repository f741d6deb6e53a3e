//! Error types for the client layer.

use broadside_protocol::Identity;

/// Errors raised while authenticating or reaching a participant.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The [`Authenticator`](crate::Authenticator) rejected the token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The upgrade request carried no bearer token or cookie.
    #[error("no credential presented")]
    MissingCredential,

    /// The participant's connection task has gone away.
    #[error("link to {0} is closed")]
    LinkClosed(Identity),
}
