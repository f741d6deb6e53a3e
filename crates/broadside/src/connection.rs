//! Per-connection task: admission, upgrade, then the read and write loops.
//!
//! Each accepted socket gets its own Tokio task running
//! [`serve_connection`]. The flow is:
//!   1. Take a connection permit → 503 when none is left
//!   2. Admission → bare HTTP status on refusal
//!   3. WebSocket upgrade, split into halves
//!   4. Writer task: drain the client's outbound queue to the socket and
//!      ping the peer on a fixed interval
//!   5. Reader loop: frames → dispatch, until close, protocol error, or
//!      the peer goes silent past the idle timeout
//!   6. Tell the session the connection is gone

use std::sync::Arc;
use std::time::Duration;

use broadside_client::{Authenticator, ClientLink, Outbound};
use broadside_protocol::{CLOSE_NORMAL, Codec, Identity, ProtocolError};
use broadside_session::SessionHandle;
use broadside_transport::{
    ConnectionId, PendingConnection, TransportError, WebSocketReceiver,
    WebSocketSender,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::admission::{AdmissionContext, admit};
use crate::dispatch::dispatch_frame;
use crate::server::ServerState;
use crate::{AdmissionError, BroadsideError};

/// How long the writer gets to flush its queue after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// Floor for the ping period; a zero interval cannot be scheduled.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Reports the closed connection to the session when the task exits,
/// including by panic. `Drop` is synchronous; posting a command is too.
struct DisconnectGuard {
    handle: SessionHandle,
    identity: Identity,
    conn_id: ConnectionId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self
            .handle
            .disconnect(self.identity.clone(), self.conn_id)
            .is_err()
        {
            tracing::trace!(conn_id = %self.conn_id, "session gone before disconnect");
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn serve_connection<A, C>(
    mut pending: PendingConnection,
    state: Arc<ServerState<A, C>>,
) -> Result<(), BroadsideError>
where
    A: Authenticator,
    C: Codec + Clone,
{
    let conn_id = pending.id();

    // Held until this function returns, i.e. until the socket is closed.
    let Ok(_permit) = Arc::clone(&state.connections).try_acquire_owned() else {
        tracing::warn!(%conn_id, peer = %pending.peer(), "connection limit reached");
        pending.reject(AdmissionError::Capacity.status()).await?;
        return Err(AdmissionError::Capacity.into());
    };

    let ctx = AdmissionContext {
        registry: &state.registry,
        auth: &state.auth,
        head_limits: state.config.head_limits,
        credential_cookie: &state.config.credential_cookie,
    };
    let admitted = match admit(&mut pending, &ctx).await {
        Ok(admitted) => admitted,
        Err(e) => {
            tracing::debug!(%conn_id, peer = %pending.peer(), error = %e, "admission refused");
            pending.reject(e.status()).await?;
            return Err(e.into());
        }
    };

    let guard = DisconnectGuard {
        handle: admitted.handle.clone(),
        identity: admitted.identity.clone(),
        conn_id,
    };
    let (sender, receiver) = pending.upgrade().await?;

    let writer = tokio::spawn(write_loop(
        sender,
        admitted.outbound,
        state.codec.clone(),
        state.config.ping_interval,
    ));
    let result = read_loop(
        receiver,
        &admitted.handle,
        &admitted.identity,
        &admitted.link,
        state.config.idle_timeout,
    )
    .await;

    // Tell the writer to finish; frames queued before this go out first.
    let _ = admitted.link.close(CLOSE_NORMAL, "");
    finish_writer(writer, conn_id).await;
    drop(guard);

    tracing::info!(%conn_id, identity = %admitted.identity, "connection closed");
    result
}

/// Reads frames until the peer closes, breaks the protocol, or stays
/// silent for `idle`.
async fn read_loop(
    mut receiver: WebSocketReceiver,
    handle: &SessionHandle,
    identity: &Identity,
    link: &ClientLink,
    idle: Duration,
) -> Result<(), BroadsideError> {
    let conn_id = receiver.id();
    loop {
        let frame = match receiver.recv_idle(idle).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!(%conn_id, %identity, "peer closed connection");
                return Ok(());
            }
            Err(e @ TransportError::IdleTimeout(_)) => {
                tracing::info!(%conn_id, %identity, ?idle, "peer went silent, dropping connection");
                return Err(e.into());
            }
            Err(e) => {
                tracing::debug!(%conn_id, %identity, error = %e, "recv error");
                return Err(e.into());
            }
        };

        match dispatch_frame(handle, identity, conn_id, &frame) {
            Ok(_) => {}
            Err(BroadsideError::Protocol(e)) => {
                close_for(link, &e);
                tracing::debug!(%conn_id, %identity, error = %e, code = e.close_code(), "protocol violation");
                return Err(e.into());
            }
            Err(e) => {
                tracing::debug!(%conn_id, %identity, error = %e, "session unreachable");
                return Err(e);
            }
        }
    }
}

fn close_for(link: &ClientLink, error: &ProtocolError) {
    let _ = link.close(error.close_code(), error.to_string());
}

/// Forwards the client's outbound queue to the socket and pings the peer
/// every `ping_interval`.
///
/// Stops after sending a close frame, or when the socket fails.
async fn write_loop<C: Codec>(
    mut sender: WebSocketSender,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    codec: C,
    ping_interval: Duration,
) {
    let conn_id = sender.id();
    let period = ping_interval.max(MIN_PING_INTERVAL);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = outbound.recv() => {
                let Some(item) = item else { return };
                if !forward(&mut sender, item, &codec).await {
                    return;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sender.ping().await {
                    tracing::debug!(%conn_id, error = %e, "ping failed");
                    return;
                }
            }
        }
    }
}

/// Writes one outbound item. Returns `false` once the writer must stop.
async fn forward<C: Codec>(sender: &mut WebSocketSender, item: Outbound, codec: &C) -> bool {
    let conn_id = sender.id();
    match item {
        Outbound::Event(event) => {
            let text = match codec.encode(&event).map(String::from_utf8) {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    tracing::error!(%conn_id, error = %e, "encoded event is not UTF-8");
                    let _ = sender.close(1011, "internal error").await;
                    return false;
                }
                Err(e) => {
                    tracing::error!(%conn_id, error = %e, "failed to encode event");
                    let _ = sender.close(e.close_code(), "internal error").await;
                    return false;
                }
            };
            if let Err(e) = sender.send_text(text).await {
                tracing::debug!(%conn_id, error = %e, "send failed");
                return false;
            }
            true
        }
        Outbound::Close { code, reason } => {
            if let Err(e) = sender.close(code, &reason).await {
                tracing::trace!(%conn_id, error = %e, "close frame not sent");
            }
            false
        }
    }
}

async fn finish_writer(writer: JoinHandle<()>, conn_id: ConnectionId) {
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        tracing::debug!(%conn_id, "writer did not drain in time");
        abort.abort();
    }
}
