//! Persistence collaborator.
//!
//! Sessions write two records: the scenario when the session is created,
//! and the outcome when the game ends. The session layer only needs
//! `query(statement, params) -> rows`; the backing database is the
//! embedding application's business.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use serde_json::Value;

/// Records a new session: `$1` persistence key, `$2` exported scenario.
pub const INSERT_SESSION: &str =
    "INSERT INTO sessions (id, scenario) VALUES ($1, $2)";

/// Records a finished game: `$1` persistence key, `$2` winning team or
/// null, `$3` message, `$4` exported final state.
pub const INSERT_RESULT: &str =
    "INSERT INTO results (session_id, winner, message, final_state) VALUES ($1, $2, $3, $4)";

/// One result row, column name to value.
pub type Row = serde_json::Map<String, Value>;

/// Errors reported by a [`Store`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The statement was rejected.
    #[error("query failed: {0}")]
    Query(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A query interface for session and result persistence.
///
/// Object-safe so a server can hold an `Arc<dyn Store>` chosen at startup.
pub trait Store: Send + Sync + 'static {
    fn query<'a>(
        &'a self,
        statement: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, StoreError>>;
}

/// A [`Store`] that keeps every statement in memory.
///
/// Used by the demo server and by tests, which can also switch it into a
/// failing mode to exercise persistence errors.
#[derive(Debug, Default)]
pub struct MemoryStore {
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later query fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// How many executed statements start with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.statements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(statement, _)| statement.starts_with(prefix))
            .count()
    }
}

impl Store for MemoryStore {
    fn query<'a>(
        &'a self,
        statement: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, StoreError>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("memory store is failing".into()));
            }
            self.statements
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((statement.to_string(), params.to_vec()));
            Ok(Vec::new())
        })
    }
}
