//! `BroadsideServer` builder and server loop.
//!
//! This is the entry point for running a Broadside session server. It ties
//! together all the layers: transport → admission → session → dispatch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use broadside_client::Authenticator;
use broadside_protocol::{Codec, JsonCodec};
use broadside_session::{
    MemoryStore, RegistryConfig, Scenario, SessionConfig, SessionError,
    SessionHandle, SessionRegistry, Store,
};
use broadside_transport::{HeadLimits, Transport, WebSocketTransport};
use tokio::sync::Semaphore;

use crate::connection::serve_connection;
use crate::{BroadsideError, ServerConfig};

/// Shared server state passed to each connection task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The registry
/// has its own interior locking; nothing else here is mutable.
pub(crate) struct ServerState<A: Authenticator, C: Codec> {
    pub(crate) registry: SessionRegistry,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
    /// One permit per open connection.
    pub(crate) connections: Arc<Semaphore>,
}

/// Builder for configuring and starting a Broadside server.
///
/// # Example
///
/// ```rust,ignore
/// use broadside::prelude::*;
///
/// let server = BroadsideServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .max_connections(512)
///     .store(Arc::new(MemoryStore::new()))
///     .build(my_auth)
///     .await?;
/// server.run().await
/// ```
pub struct BroadsideServerBuilder {
    config: ServerConfig,
    store: Option<Arc<dyn Store>>,
}

impl BroadsideServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            store: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the ceiling on simultaneously open connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Sets the ceiling on live sessions.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.registry.max_sessions = max;
        self
    }

    /// Sets the cookie the credential is read from.
    pub fn credential_cookie(mut self, name: &str) -> Self {
        self.config.credential_cookie = name.to_string();
        self
    }

    /// Sets the bounds on reading upgrade heads.
    pub fn head_limits(mut self, limits: HeadLimits) -> Self {
        self.config.head_limits = limits;
        self
    }

    /// Sets how often open connections are pinged.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Sets how long a silent connection is kept before it is dropped.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets the per-session timeouts.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.registry.session = config;
        self
    }

    /// Sets the registry configuration, session timeouts included.
    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.config.registry = config;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the store sessions and results are recorded in.
    ///
    /// Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Binds the listener and builds the server with the given
    /// authenticator.
    ///
    /// # Errors
    /// [`SessionError::InvalidConfig`] when the registry settings cannot
    /// guarantee free session codes, or a transport error from binding.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<BroadsideServer<A, JsonCodec>, BroadsideError> {
        self.config.registry.validate()?;
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };

        let state = Arc::new(ServerState {
            registry: SessionRegistry::new(self.config.registry.clone(), store),
            auth,
            codec: JsonCodec,
            connections: Arc::new(Semaphore::new(self.config.max_connections)),
            config: self.config,
        });

        Ok(BroadsideServer { transport, state })
    }
}

impl Default for BroadsideServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A Broadside session server.
///
/// Built by [`BroadsideServerBuilder`]. Create sessions with
/// [`create_session`](Self::create_session), then call [`run()`](Self::run)
/// to start accepting connections.
pub struct BroadsideServer<A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C>>,
}

impl<A, C> BroadsideServer<A, C>
where
    A: Authenticator,
    C: Codec + Clone,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, BroadsideError> {
        Ok(self.transport.local_addr()?)
    }

    /// The session table. Clones share it.
    pub fn registry(&self) -> SessionRegistry {
        self.state.registry.clone()
    }

    /// Opens a new session hosting `scenario`.
    ///
    /// # Errors
    /// [`SessionError::CapacityReached`] when the live-session ceiling is
    /// reached, [`SessionError::Persistence`] when the store rejects it.
    pub async fn create_session<S: Scenario>(
        &self,
        scenario: S,
        persistence_key: impl Into<String>,
    ) -> Result<SessionHandle, SessionError> {
        create_session(&self.state.registry, scenario, persistence_key).await
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), BroadsideError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes, then kills every
    /// live session.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), BroadsideError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.transport.local_addr()?;
        tracing::info!(%addr, "Broadside server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(pending, state).await {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!(sessions = self.state.registry.len(), "shutting down");
        self.state.registry.shutdown_all("server shutting down");
        Ok(())
    }
}

/// Creates a session in `registry` without exceeding its capacity.
///
/// The slot is claimed before the store write, so concurrent callers can
/// never push the live count past `max_sessions`.
///
/// # Errors
/// [`SessionError::CapacityReached`] when the registry is full.
pub async fn create_session<S: Scenario>(
    registry: &SessionRegistry,
    scenario: S,
    persistence_key: impl Into<String>,
) -> Result<SessionHandle, SessionError> {
    let reservation = registry.try_reserve()?;
    registry
        .create_reserved(reservation, scenario, persistence_key)
        .await
}
