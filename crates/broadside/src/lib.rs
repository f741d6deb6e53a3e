//! # Broadside
//!
//! Session server for turn-based naval games played over WebSocket.
//!
//! Broadside admits authenticated connections into game sessions, drives
//! each session through its lobby → setup → game lifecycle, survives
//! brief disconnects, and routes validated client requests to the game
//! rules. The rules themselves live behind the [`Scenario`] trait, and
//! persistence behind [`Store`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use broadside::prelude::*;
//!
//! struct DevAuth;
//!
//! impl Authenticator for DevAuth {
//!     async fn verify(&self, token: &str) -> Result<Principal, ClientError> {
//!         Ok(Principal::new(token))
//!     }
//! }
//!
//! # async fn start() -> Result<(), BroadsideError> {
//! let server = BroadsideServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build(DevAuth)
//!     .await?;
//! // server.create_session(my_scenario, "match-1").await?;
//! server.run().await
//! # }
//! ```
//!
//! [`Scenario`]: broadside_session::Scenario
//! [`Store`]: broadside_session::Store

mod admission;
mod config;
mod connection;
mod dispatch;
mod error;
mod server;

pub use admission::credential;
pub use config::{DEFAULT_CREDENTIAL_COOKIE, ServerConfig};
pub use dispatch::{RequestRouter, dispatch_frame};
pub use error::{AdmissionError, BroadsideError};
pub use server::{BroadsideServer, BroadsideServerBuilder, create_session};

/// Everything needed to embed a server and write a scenario.
pub mod prelude {
    pub use crate::{
        AdmissionError, BroadsideError, BroadsideServer, BroadsideServerBuilder,
        RequestRouter, ServerConfig,
    };
    pub use broadside_client::{Authenticator, ClientError, Principal};
    pub use broadside_protocol::{
        ClientRequest, Coordinate, EnterSetupFailure, Heading, Identity, Phase,
        Position, Recipient, ScenarioDescriptor, ServerEvent, SessionCode,
        SetupShared, ShipId, ShipInfo, ShipPlacement, TeamId, TeamInfo,
    };
    pub use broadside_session::{
        AbilityOutcome, Events, MemoryStore, RegistryConfig, Row, Scenario,
        SessionConfig, SessionError, SessionHandle, SessionRegistry, Store,
        StoreError,
    };
    pub use broadside_timer::TimerRegistry;
}
