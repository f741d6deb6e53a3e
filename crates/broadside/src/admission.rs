//! Connection admission: decides, before the WebSocket handshake, whether
//! an accepted socket may attach to a session.
//!
//! The checks run in a fixed order and stop at the first failure:
//!
//! 1. connection ceiling (503), checked by the caller with a semaphore
//! 2. upgrade head and session code (400)
//! 3. session phase (400)
//! 4. credential (401)
//! 5. the session's own verdict on the identity (400)
//!
//! Steps 2 to 4 only read. Step 5 runs inside the session actor, so two
//! sockets racing for the same identity are settled one after the other.

use broadside_client::{Authenticator, ClientLink, Outbound};
use broadside_protocol::{Identity, SessionCode};
use broadside_session::{Admission, SessionError, SessionHandle, SessionRegistry};
use broadside_transport::{HeadLimits, PendingConnection, UpgradeRequest};
use tokio::sync::mpsc;

use crate::AdmissionError;

/// An admitted connection, not yet upgraded.
pub(crate) struct Admitted {
    pub(crate) handle: SessionHandle,
    pub(crate) identity: Identity,
    pub(crate) admission: Admission,
    /// Events the session queued for this connection, starting with
    /// `connection_info`.
    pub(crate) outbound: mpsc::UnboundedReceiver<Outbound>,
    pub(crate) link: ClientLink,
}

/// Settings the admission steps need.
pub(crate) struct AdmissionContext<'a, A> {
    pub(crate) registry: &'a SessionRegistry,
    pub(crate) auth: &'a A,
    pub(crate) head_limits: HeadLimits,
    pub(crate) credential_cookie: &'a str,
}

/// The credential carried by `request`: the bearer token if present,
/// otherwise the named cookie.
pub fn credential<'r>(request: &'r UpgradeRequest, cookie: &str) -> Option<&'r str> {
    request
        .bearer_token()
        .or_else(|| request.cookie(cookie))
        .filter(|token| !token.is_empty())
}

/// Runs admission steps 2 to 5 against `pending`.
pub(crate) async fn admit<A: Authenticator>(
    pending: &mut PendingConnection,
    ctx: &AdmissionContext<'_, A>,
) -> Result<Admitted, AdmissionError> {
    let request = pending
        .read_request(ctx.head_limits)
        .await
        .map_err(|e| AdmissionError::BadRequest(e.to_string()))?;

    let code = request
        .session_code()
        .map(SessionCode::new)
        .ok_or_else(|| AdmissionError::BadRequest(format!("no session code in {}", request.path)))?;
    let handle = ctx
        .registry
        .query(&code)
        .ok_or_else(|| AdmissionError::UnknownSession(code.to_string()))?;

    let info = handle
        .info()
        .await
        .map_err(|_| AdmissionError::UnknownSession(code.to_string()))?;
    if !(info.phase.accepts_joins() || info.phase.accepts_reconnections()) {
        return Err(AdmissionError::PhaseClosed(info.phase));
    }

    let token = credential(&request, ctx.credential_cookie)
        .ok_or_else(|| AdmissionError::Unauthorized("no credential presented".into()))?;
    let principal = ctx
        .auth
        .verify(token)
        .await
        .map_err(|e| AdmissionError::Unauthorized(e.to_string()))?;
    let identity = principal.identity();

    let (link, outbound) = ClientLink::channel(pending.id());
    let admission = handle
        .admit(identity.clone(), link.clone())
        .await
        .map_err(|e| match e {
            SessionError::AdmissionDenied(reason) => AdmissionError::Denied(reason),
            other => AdmissionError::UnknownSession(other.to_string()),
        })?;

    tracing::info!(
        conn_id = %pending.id(),
        session = %code,
        %identity,
        ?admission,
        "connection admitted"
    );
    Ok(Admitted {
        handle,
        identity,
        admission,
        outbound,
        link,
    })
}
