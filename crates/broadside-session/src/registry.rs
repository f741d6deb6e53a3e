//! Session registry: creates, tracks, and removes live sessions.
//!
//! One registry is constructed at process start and handed to whoever
//! needs it; there is no global session table. The table sits behind a
//! short-lived `std::sync::Mutex` that is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use broadside_protocol::SessionCode;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::actor::spawn_session;
use crate::{
    INSERT_SESSION, RegistryConfig, Scenario, Session, SessionCommand,
    SessionError, SessionHandle, Store,
};

/// The 32 symbols session codes are drawn from. No `0`/`O` or `1`/`I`,
/// so codes survive being read aloud.
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Candidate codes drawn before giving up on finding a free one.
pub const MAX_CODE_ATTEMPTS: usize = 64;

/// Produces a candidate code of the given length.
pub type CodeGenerator = Arc<dyn Fn(usize) -> String + Send + Sync + 'static>;

fn random_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

struct Table {
    sessions: HashMap<SessionCode, SessionHandle>,
    /// Always equal to `sessions.len()`.
    live: usize,
    /// Slots held by [`Reservation`]s whose session is not inserted yet.
    reserved: usize,
}

struct Inner {
    table: Mutex<Table>,
    config: RegistryConfig,
    store: Arc<dyn Store>,
    generator: CodeGenerator,
}

/// Handle to the table of live sessions.
///
/// Cheap to clone; every clone sees the same table.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, store: Arc<dyn Store>) -> Self {
        Self::with_code_generator(config, store, Arc::new(random_code))
    }

    /// Like [`new`](Self::new), drawing candidate codes from `generator`.
    pub fn with_code_generator(
        config: RegistryConfig,
        store: Arc<dyn Store>,
        generator: CodeGenerator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(Table {
                    sessions: HashMap::new(),
                    live: 0,
                    reserved: 0,
                }),
                config,
                store,
                generator,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// `true` once live sessions plus reserved slots reach `max_sessions`.
    ///
    /// Advisory: [`create`](Self::create) does not consult it. Callers that
    /// must never exceed the limit go through
    /// [`try_reserve`](Self::try_reserve) instead.
    pub fn capacity_reached(&self) -> bool {
        let table = self.lock();
        table.live + table.reserved >= self.inner.config.max_sessions
    }

    /// Claims one slot below `max_sessions` for a session about to be
    /// created. The slot is given back when the reservation is dropped
    /// without being passed to [`create_reserved`](Self::create_reserved).
    ///
    /// # Errors
    /// [`SessionError::CapacityReached`] when no slot is free.
    pub fn try_reserve(&self) -> Result<Reservation, SessionError> {
        let limit = self.inner.config.max_sessions;
        let mut table = self.lock();
        if table.live + table.reserved >= limit {
            return Err(SessionError::CapacityReached { limit });
        }
        table.reserved += 1;
        Ok(Reservation {
            registry: self.clone(),
            consumed: false,
        })
    }

    /// A code that is not currently a key of the table.
    ///
    /// # Errors
    /// [`SessionError::CodeSpaceExhausted`] when [`MAX_CODE_ATTEMPTS`]
    /// draws all hit live codes.
    pub fn generate_identifier(&self) -> Result<SessionCode, SessionError> {
        let table = self.lock();
        self.fresh_code(&table)
    }

    fn fresh_code(&self, table: &Table) -> Result<SessionCode, SessionError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = SessionCode::new((self.inner.generator)(self.inner.config.code_length));
            if !table.sessions.contains_key(&candidate) {
                return Ok(candidate);
            }
            tracing::debug!(code = %candidate, "session code collision, resampling");
        }
        tracing::warn!(
            live = table.live,
            code_length = self.inner.config.code_length,
            "no free session code"
        );
        Err(SessionError::CodeSpaceExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    /// Records `scenario`, then starts and registers a session hosting it.
    ///
    /// The new session's join timeout is armed, and its teardown removes it
    /// from this registry.
    ///
    /// # Errors
    /// [`SessionError::Persistence`] if the store rejects the record, and
    /// [`SessionError::CodeSpaceExhausted`] if no free code is found. No
    /// session is created in either case.
    pub async fn create<S: Scenario>(
        &self,
        scenario: S,
        persistence_key: impl Into<String>,
    ) -> Result<SessionHandle, SessionError> {
        self.create_inner(None, scenario, persistence_key.into()).await
    }

    /// Like [`create`](Self::create), filling a slot claimed with
    /// [`try_reserve`](Self::try_reserve). On failure the slot is released.
    pub async fn create_reserved<S: Scenario>(
        &self,
        reservation: Reservation,
        scenario: S,
        persistence_key: impl Into<String>,
    ) -> Result<SessionHandle, SessionError> {
        self.create_inner(Some(reservation), scenario, persistence_key.into())
            .await
    }

    async fn create_inner<S: Scenario>(
        &self,
        reservation: Option<Reservation>,
        scenario: S,
        persistence_key: String,
    ) -> Result<SessionHandle, SessionError> {
        let params = [Value::String(persistence_key.clone()), scenario.export()];
        self.inner.store.query(INSERT_SESSION, &params).await?;

        let (session, receiver, handle) = self
            .install(reservation, scenario, persistence_key.clone())
            .inspect_err(|e| {
                tracing::error!(key = %persistence_key, error = %e, "session recorded but not started");
            })?;
        spawn_session(session, receiver);
        Ok(handle)
    }

    /// Builds the session under a fresh code and enters it in the table,
    /// all under one lock. A reservation is converted into the live slot
    /// under that same lock.
    fn install<S: Scenario>(
        &self,
        reservation: Option<Reservation>,
        scenario: S,
        persistence_key: String,
    ) -> Result<
        (
            Session<S>,
            mpsc::UnboundedReceiver<SessionCommand>,
            SessionHandle,
        ),
        SessionError,
    > {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut table = self.lock();
        let code = self.fresh_code(&table)?;

        let mut session = Session::new(
            code.clone(),
            persistence_key,
            scenario,
            self.inner.config.session.clone(),
            Arc::clone(&self.inner.store),
            sender.clone(),
        );
        let registry: Weak<Inner> = Arc::downgrade(&self.inner);
        session.on_teardown(move |code, reason| {
            if let Some(inner) = registry.upgrade() {
                SessionRegistry { inner }.remove(code, reason);
            }
        });
        session.arm_join_timeout();

        let handle = SessionHandle::new(code.clone(), sender);
        table.sessions.insert(code.clone(), handle.clone());
        table.live += 1;
        if let Some(mut reservation) = reservation {
            reservation.consumed = true;
            table.reserved -= 1;
        }
        tracing::info!(session = %code, live = table.live, "session created");
        Ok((session, receiver, handle))
    }

    /// Deletes `code` from the table. Removing an absent code does nothing.
    pub fn remove(&self, code: &SessionCode, reason: &str) {
        let mut table = self.lock();
        if table.sessions.remove(code).is_some() {
            table.live -= 1;
            tracing::info!(session = %code, reason, live = table.live, "session removed");
        }
    }

    pub fn query(&self, code: &SessionCode) -> Option<SessionHandle> {
        self.lock().sessions.get(code).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The live-session counter.
    pub fn live_count(&self) -> usize {
        self.lock().live
    }

    pub fn codes(&self) -> Vec<SessionCode> {
        self.lock().sessions.keys().cloned().collect()
    }

    /// Kills every live session. Each one removes itself on teardown.
    pub fn shutdown_all(&self, reason: &str) {
        let handles: Vec<SessionHandle> = self.lock().sessions.values().cloned().collect();
        for handle in handles {
            if handle.kill(reason).is_err() {
                // Actor already gone without tearing down; drop the entry.
                self.remove(handle.code(), reason);
            }
        }
    }
}

/// A capacity slot claimed by [`SessionRegistry::try_reserve`].
///
/// Dropping it unused, including by cancelling the creating future,
/// returns the slot.
#[must_use = "dropping a reservation releases its slot"]
pub struct Reservation {
    registry: SessionRegistry,
    consumed: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.consumed {
            let mut table = self.registry.lock();
            table.reserved = table.reserved.saturating_sub(1);
        }
    }
}
