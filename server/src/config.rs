//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; the in-memory store is used without it
    pub database_url: Option<String>,
    /// Bearer secret required on sync requests when set
    pub auth_secret: Option<String>,
    /// Payload field holding the record identity
    pub id_field: String,
    /// Payload field holding the partition key, if documents carry one
    pub partition_field: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            auth_secret: None,
            id_field: "id".to_string(),
            partition_field: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(port) => port.parse().map_err(|_| ConfigError::InvalidPort(port))?,
            Err(_) => defaults.port,
        };

        let database_url = non_empty("DATABASE_URL");
        let auth_secret = non_empty("AUTH_SECRET");
        let id_field = non_empty("SYNC_ID_FIELD").unwrap_or(defaults.id_field);
        let partition_field = non_empty("SYNC_PARTITION_FIELD");

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            id_field,
            partition_field,
        })
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_memory_store_and_id_field() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.id_field, "id");
        assert!(config.partition_field.is_none());
    }
}
