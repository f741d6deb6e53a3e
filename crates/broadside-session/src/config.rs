//! Session and registry configuration.

use std::time::Duration;

use crate::{CODE_ALPHABET, SessionError};

/// How many times larger than `max_sessions` the code space must be, so a
/// random draw almost never hits a live code.
pub const CODE_SPACE_HEADROOM: u128 = 1024;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timeouts governing one session's lifecycle.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session may sit with an empty lobby before it is killed.
    ///
    /// Armed at creation and re-armed whenever the lobby empties out.
    pub join_timeout: Duration,

    /// Countdown between everyone being ready and setup starting.
    pub start_setup_delay: Duration,

    /// How long a disconnected participant keeps its seat once setup has
    /// started.
    pub reconnect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(120),
            start_setup_delay: Duration::from_secs(5),
            reconnect_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Limits for the session registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Live sessions at which [`capacity_reached`] turns true.
    ///
    /// [`capacity_reached`]: crate::SessionRegistry::capacity_reached
    pub max_sessions: usize,

    /// Length of generated session codes.
    pub code_length: usize,

    /// Handed to every session the registry creates.
    pub session: SessionConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            code_length: 8,
            session: SessionConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Number of distinct codes of `code_length` symbols. Saturates at
    /// `u128::MAX`.
    pub fn code_space(&self) -> u128 {
        u32::try_from(self.code_length)
            .ok()
            .and_then(|len| (CODE_ALPHABET.len() as u128).checked_pow(len))
            .unwrap_or(u128::MAX)
    }

    /// Checks that codes can always be drawn for `max_sessions` sessions.
    ///
    /// # Errors
    /// [`SessionError::InvalidConfig`] when `code_length` is zero or the
    /// code space is not at least [`CODE_SPACE_HEADROOM`] times
    /// `max_sessions`.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.code_length == 0 {
            return Err(SessionError::InvalidConfig(
                "code_length must be at least 1".into(),
            ));
        }
        let needed = (self.max_sessions as u128).saturating_mul(CODE_SPACE_HEADROOM);
        if self.code_space() < needed {
            return Err(SessionError::InvalidConfig(format!(
                "code_length {} gives {} codes, too few for {} sessions",
                self.code_length,
                self.code_space(),
                self.max_sessions
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_config_default() {
        let config = RegistryConfig::default();
        assert_eq!(config.max_sessions, 64);
        assert_eq!(config.code_length, 8);
        assert_eq!(config.session.join_timeout, Duration::from_secs(120));
        assert_eq!(config.session.start_setup_delay, Duration::from_secs(5));
        assert_eq!(config.session.reconnect_timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_code_length() {
        let config = RegistryConfig {
            code_length: 0,
            ..RegistryConfig::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_code_space_too_small_for_limit() {
        let config = RegistryConfig {
            max_sessions: 64,
            code_length: 1,
            ..RegistryConfig::default()
        };
        assert_eq!(config.code_space(), 32);
        assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));

        // 32^3 = 32768 = 32 * 1024
        let config = RegistryConfig {
            max_sessions: 32,
            code_length: 3,
            ..RegistryConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_code_space_saturates_for_long_codes() {
        let config = RegistryConfig {
            code_length: 200,
            ..RegistryConfig::default()
        };
        assert_eq!(config.code_space(), u128::MAX);
    }
}
