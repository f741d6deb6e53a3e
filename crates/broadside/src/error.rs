//! Unified error type for the Broadside server.

use broadside_client::ClientError;
use broadside_protocol::{Phase, ProtocolError};
use broadside_session::SessionError;
use broadside_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum BroadsideError {
    /// A transport-level error (accept, handshake, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (malformed or invalid frame, encode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (persistence, unavailable, capacity).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A client-level error (authentication).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The connection was refused before the upgrade.
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

/// Why a connection was refused before the WebSocket upgrade.
///
/// Each variant maps to the bare HTTP status written back on the socket.
/// Nothing in any session is changed by a refused admission.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The global connection ceiling is reached.
    #[error("connection limit reached")]
    Capacity,

    /// The upgrade head was missing, malformed, or carried no session code.
    #[error("bad upgrade request: {0}")]
    BadRequest(String),

    /// No live session has the requested code.
    #[error("unknown session {0}")]
    UnknownSession(String),

    /// The session's phase admits neither joins nor reconnections.
    #[error("session is in {0}")]
    PhaseClosed(Phase),

    /// The credential was missing or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The session refused this identity (already connected, or no seat).
    #[error("admission denied: {0}")]
    Denied(String),
}

impl AdmissionError {
    /// The HTTP status for this refusal.
    pub fn status(&self) -> u16 {
        match self {
            Self::Capacity => 503,
            Self::Unauthorized(_) => 401,
            Self::BadRequest(_)
            | Self::UnknownSession(_)
            | Self::PhaseClosed(_)
            | Self::Denied(_) => 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use broadside_protocol::SessionCode;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let broadside_err: BroadsideError = err.into();
        assert!(matches!(broadside_err, BroadsideError::Transport(_)));
        assert!(broadside_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::UnknownRequest("fly".into());
        let broadside_err: BroadsideError = err.into();
        assert!(matches!(broadside_err, BroadsideError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotFound(SessionCode::new("ABCD"));
        let broadside_err: BroadsideError = err.into();
        assert!(matches!(broadside_err, BroadsideError::Session(_)));
    }

    #[test]
    fn test_from_client_error() {
        let err = ClientError::AuthFailed("expired".into());
        let broadside_err: BroadsideError = err.into();
        assert!(matches!(broadside_err, BroadsideError::Client(_)));
    }

    #[test]
    fn test_admission_status_codes() {
        assert_eq!(AdmissionError::Capacity.status(), 503);
        assert_eq!(AdmissionError::Unauthorized("x".into()).status(), 401);
        assert_eq!(AdmissionError::BadRequest("x".into()).status(), 400);
        assert_eq!(AdmissionError::UnknownSession("x".into()).status(), 400);
        assert_eq!(AdmissionError::PhaseClosed(Phase::Finished).status(), 400);
        assert_eq!(AdmissionError::Denied("x".into()).status(), 400);
    }
}
