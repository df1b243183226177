//! Per-connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration supplied when a connection is registered.
///
/// These are the only knobs the core consumes from its environment; everything
/// else is derived from the connect string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// How long the remote store keeps the session alive without heartbeats.
    pub session_timeout: Duration,

    /// The maximum time for a single connection attempt.
    pub connection_timeout: Duration,

    /// The maximum time for a single remote operation.
    pub operation_timeout: Duration,

    /// How many times establishment (or re-establishment) is retried before
    /// the session is declared lost.
    pub max_retries: u32,

    /// The delay between retry attempts.
    pub retry_interval: Duration,

    /// Jitter factor (0.0 - 1.0) applied to the retry delay.
    pub retry_jitter: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(15),
            operation_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_interval: Duration::from_secs(6),
            retry_jitter: 0.0,
        }
    }
}

impl ConnectionConfig {
    /// A configuration with short timeouts, for tests and local stores.
    pub fn fast() -> Self {
        Self {
            session_timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_millis(500),
            operation_timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_interval: Duration::from_millis(20),
            retry_jitter: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_interval, Duration::from_secs(6));
        assert_eq!(config.retry_jitter, 0.0);
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = ConnectionConfig::fast();
        let json = serde_json::to_string(&config).unwrap();
        let back: ConnectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
