//! Authentication hook for admitting participants.
//!
//! Broadside does not store credentials or issue tokens. The server reads
//! a token from the upgrade request (bearer header or cookie) and hands it
//! to an [`Authenticator`] supplied by the embedding application.

use broadside_protocol::Identity;

use crate::ClientError;

/// An authenticated user, as reported by the [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    /// The roster identity of this principal: `user:<username>`.
    ///
    /// Deterministic, so a reconnecting user lands on the same Client.
    pub fn identity(&self) -> Identity {
        Identity::from_username(&self.username)
    }
}

/// Validates a token taken from an upgrade request.
///
/// # Example
///
/// ```rust
/// use broadside_client::{Authenticator, ClientError, Principal};
///
/// /// Accepts tokens of the form `dev-<name>`.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn verify(&self, token: &str) -> Result<Principal, ClientError> {
///         token
///             .strip_prefix("dev-")
///             .filter(|name| !name.is_empty())
///             .map(Principal::new)
///             .ok_or_else(|| ClientError::AuthFailed("unknown token".into()))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the principal the token belongs to.
    ///
    /// # Errors
    /// [`ClientError::AuthFailed`] when the token is invalid or expired.
    fn verify(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Principal, ClientError>> + Send;
}
