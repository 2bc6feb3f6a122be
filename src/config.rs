//! Connection configuration loaded from the environment

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::model::MASTER_DATABASE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    Missing { name: &'static str },

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Where and how to connect to SQL Server
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Initial catalog of a new session
    pub database: String,
    /// Deadline for one reconciliation run, measured from connect
    pub timeout: Duration,
    pub trust_server_certificate: bool,
}

impl ConnectionConfig {
    /// Load from `SQL_SERVER_*` variables, reading a `.env` file first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("SQL_SERVER_PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "SQL_SERVER_PORT",
                value,
            })?,
            None => 1433,
        };
        let timeout_secs: u64 = match lookup("SQL_SERVER_TIMEOUT_SECS") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "SQL_SERVER_TIMEOUT_SECS",
                value,
            })?,
            None => 30,
        };
        let trust_server_certificate = match lookup("SQL_SERVER_TRUST_CERT") {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SQL_SERVER_TRUST_CERT",
                        value,
                    })
                }
            },
            None => true,
        };

        Ok(Self {
            host: lookup("SQL_SERVER_HOST").unwrap_or_else(|| "localhost".to_string()),
            port,
            user: lookup("SQL_SERVER_USER").unwrap_or_else(|| "sa".to_string()),
            password: lookup("SQL_SERVER_PASSWORD").ok_or(ConfigError::Missing {
                name: "SQL_SERVER_PASSWORD",
            })?,
            database: lookup("SQL_SERVER_DATABASE").unwrap_or_else(|| MASTER_DATABASE.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            trust_server_certificate,
        })
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}
