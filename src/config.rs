//! Connection configuration for the remote data service
//!
//! The core talks to one remote data service identified by a URL and an
//! access key. Both are supplied through the environment at startup and
//! their absence is a fatal configuration error; there is no usable
//! default for either.

use std::env;

use thiserror::Error;

use crate::constants;

/// Errors raised while reading the connection configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset or empty
    #[error("required environment variable {0} is not set")]
    MissingVar(&'static str),
}

/// Connection parameters for the remote data service
///
/// The access key is deliberately excluded from `Debug` output so the
/// configuration can be logged without leaking credentials.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Base URL of the remote data service
    pub service_url: String,
    /// Access key presented with every remote request
    pub service_key: String,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("service_url", &self.service_url)
            .field("service_key", &"<redacted>")
            .finish()
    }
}

impl ConnectionConfig {
    /// Reads the connection configuration from the environment
    ///
    /// Looks up the service URL and access key under the variable names in
    /// [`constants::env`]. Empty values are treated the same as unset ones.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] naming the first variable that
    /// is absent or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            service_url: read_required(constants::env::SERVICE_URL)?,
            service_key: read_required(constants::env::SERVICE_KEY)?,
        })
    }
}

/// Reads one required environment variable, rejecting empty values
fn read_required(var: &'static str) -> Result<String, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(var)),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    // Environment mutation is process-global, so all cases run in one test.
    #[test]
    fn test_from_env() {
        unsafe {
            env::remove_var(constants::env::SERVICE_URL);
            env::remove_var(constants::env::SERVICE_KEY);
        }
        assert_eq!(
            ConnectionConfig::from_env().unwrap_err(),
            ConfigError::MissingVar(constants::env::SERVICE_URL)
        );

        unsafe {
            env::set_var(constants::env::SERVICE_URL, "https://example.invalid");
            env::set_var(constants::env::SERVICE_KEY, "  ");
        }
        assert_eq!(
            ConnectionConfig::from_env().unwrap_err(),
            ConfigError::MissingVar(constants::env::SERVICE_KEY)
        );

        unsafe {
            env::set_var(constants::env::SERVICE_KEY, "anon-key");
        }
        let config = ConnectionConfig::from_env().unwrap();
        assert_eq!(config.service_url, "https://example.invalid");
        assert_eq!(config.service_key, "anon-key");
        assert!(!format!("{config:?}").contains("anon-key"));
    }
}
