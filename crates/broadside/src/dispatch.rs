//! Request dispatch: inbound frame → validated request → session.
//!
//! Every frame passes [`decode_request`] first. Only a request that
//! survived all three validation stages reaches a [`RequestRouter`], so a
//! router never sees a malformed, unknown, or incomplete request.

use broadside_protocol::{ClientRequest, Identity, RequestKind, decode_request};
use broadside_session::{SessionError, SessionHandle};
use broadside_transport::ConnectionId;

use crate::BroadsideError;

/// Where validated requests go.
///
/// Implemented by [`SessionHandle`], which forwards to the session actor.
pub trait RequestRouter: Send + Sync {
    /// Hands one validated request from `identity` on `conn_id` onwards.
    ///
    /// # Errors
    /// [`SessionError::Unavailable`] when the target is gone.
    fn route(
        &self,
        identity: Identity,
        conn_id: ConnectionId,
        request: ClientRequest,
    ) -> Result<(), SessionError>;
}

impl RequestRouter for SessionHandle {
    fn route(
        &self,
        identity: Identity,
        conn_id: ConnectionId,
        request: ClientRequest,
    ) -> Result<(), SessionError> {
        self.request(identity, conn_id, request)
    }
}

/// Decodes `frame` and routes it. Returns the kind that was routed.
///
/// # Errors
/// [`BroadsideError::Protocol`] when the frame fails validation; its
/// `close_code()` says how to close the connection. Nothing is routed in
/// that case. [`BroadsideError::Session`] when the router is gone.
pub fn dispatch_frame<R>(
    router: &R,
    identity: &Identity,
    conn_id: ConnectionId,
    frame: &[u8],
) -> Result<RequestKind, BroadsideError>
where
    R: RequestRouter + ?Sized,
{
    let request = decode_request(frame)?;
    let kind = request.kind();
    tracing::trace!(%identity, %conn_id, %kind, "routing request");
    router.route(identity.clone(), conn_id, request)?;
    Ok(kind)
}
