//! Common configuration types for Podium components.

use crate::secret::SecretString;
use serde::{Deserialize, Serialize};

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string, redacted in Debug output
    pub url: SecretString,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_debug_hides_url() {
        let config: DatabaseConfig = serde_json::from_str(
            r#"{"url": "postgres://qa:hunter2@db/qa", "max_connections": 4}"#,
        )
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert_eq!(config.max_connections, 4);
    }
}
