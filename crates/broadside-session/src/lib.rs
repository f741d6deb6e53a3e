//! Session lifecycle management for Broadside.
//!
//! Each session runs as an isolated Tokio task (actor model) that owns the
//! roster, the phase, the session timers, and the scenario object. Nothing
//! outside the task touches that state: connections, timers, and
//! asynchronous store writes all talk to it through [`SessionHandle`].
//!
//! # Key types
//!
//! - [`Scenario`]: the game rules a session hosts
//! - [`Store`]: where session records and match results are written
//! - [`Session`]: the phase state machine and roster
//! - [`SessionHandle`]: send commands to a running session actor
//! - [`SessionRegistry`]: creates, tracks, and removes sessions
//! - [`SessionConfig`], [`RegistryConfig`]: timeouts and limits

mod actor;
mod config;
mod error;
mod handlers;
mod registry;
mod scenario;
mod session;
mod store;

pub use actor::{Admission, SessionCommand, SessionHandle, SessionInfo, SessionTimer};
pub use config::{CODE_SPACE_HEADROOM, RegistryConfig, SessionConfig};
pub use error::SessionError;
pub use registry::{
    CODE_ALPHABET, CodeGenerator, MAX_CODE_ATTEMPTS, Reservation, SessionRegistry,
};
pub use scenario::{AbilityOutcome, Events, Scenario};
pub use session::{JOIN_TIMEOUT_TIMER, START_SETUP_TIMER, Session, TeardownCallback};
pub use store::{INSERT_RESULT, INSERT_SESSION, MemoryStore, Row, Store, StoreError};
