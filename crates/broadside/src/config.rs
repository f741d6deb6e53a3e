//! Server configuration.

use std::time::Duration;

use broadside_session::RegistryConfig;
use broadside_transport::HeadLimits;

/// Cookie consulted when an upgrade request has no bearer token.
pub const DEFAULT_CREDENTIAL_COOKIE: &str = "token";

/// Configuration for a [`BroadsideServer`](crate::BroadsideServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: String,

    /// Ceiling on simultaneously open connections, pending ones included.
    pub max_connections: usize,

    /// Cookie carrying the credential.
    pub credential_cookie: String,

    /// Bounds on reading the upgrade request head.
    pub head_limits: HeadLimits,

    /// How often the server pings each open connection.
    pub ping_interval: Duration,

    /// A connection that sends nothing, pongs included, for this long is
    /// treated as gone. Should be a few multiples of `ping_interval`.
    pub idle_timeout: Duration,

    /// Session table settings, including per-session timeouts.
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_connections: 1024,
            credential_cookie: DEFAULT_CREDENTIAL_COOKIE.to_string(),
            head_limits: HeadLimits::default(),
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(60),
            registry: RegistryConfig::default(),
        }
    }
}
