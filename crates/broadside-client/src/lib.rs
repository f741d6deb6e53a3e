//! Participant state for Broadside.
//!
//! This crate models one authenticated participant inside one session:
//!
//! 1. **Authentication**: turning a credential into a stable [`Identity`]
//!    ([`Authenticator`] trait, [`Principal`]).
//! 2. **Outbound link**: the channel the session writes events into and a
//!    connection task drains to the socket ([`ClientLink`], [`Outbound`]).
//! 3. **Client**: flags, team, and the private reconnection timer
//!    ([`Client`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Session (above)  ← owns the roster of Clients, mutates their flags
//!     ↕
//! Client (this crate)  ← identity, link, flags, reconnection deadline
//!     ↕
//! Protocol / Timer (below)  ← Identity, ServerEvent, TimerRegistry
//! ```
//!
//! [`Identity`]: broadside_protocol::Identity

mod auth;
mod client;
mod error;
mod link;

pub use auth::{Authenticator, Principal};
pub use client::{Client, RECONNECT_TIMER};
pub use error::ClientError;
pub use link::{ClientLink, Outbound};
