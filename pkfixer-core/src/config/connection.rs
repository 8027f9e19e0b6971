//! Database connection configuration.
//!
//! This module provides the `ConnectionConfig` struct and the parser that
//! derives it from a `mysql://` connection URL.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// MySQL's default TCP port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Configuration for the store connection.
///
/// # Security
/// This struct intentionally does NOT store passwords. The password stays
/// inside the connection URL handed to the connector and is never logged.
///
/// # Example
/// ```rust
/// use pkfixer_core::config::ConnectionConfig;
///
/// let config = ConnectionConfig::new("localhost".to_string())
///     .with_port(3306)
///     .with_database("whmcs".to_string())
///     .with_username("admin".to_string());
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host address
    pub host: String,
    /// Optional port number
    pub port: Option<u16>,
    /// Target database name
    pub database: Option<String>,
    /// Optional username (password handled separately)
    pub username: Option<String>,
    /// Connection character set
    pub charset: String,
    /// Upper bound for establishing one connection
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            database: None,
            username: None,
            charset: "utf8mb4".to_string(),
            connect_timeout: Duration::from_secs(3600),
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConnectionConfig({}{}{})",
            self.host,
            self.port.map_or_else(String::new, |p| format!(":{}", p)),
            self.database
                .as_ref()
                .map_or_else(String::new, |db| format!("/{}", db))
        )
        // Intentionally omit username and never include credentials
    }
}

impl ConnectionConfig {
    /// Validates connection configuration parameters.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid or unsafe
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.is_empty() {
            return Err(crate::error::FixerError::configuration(
                "host cannot be empty",
            ));
        }

        if self.port == Some(0) {
            return Err(crate::error::FixerError::configuration(
                "port must be greater than 0",
            ));
        }

        if self.charset.is_empty() {
            return Err(crate::error::FixerError::configuration(
                "charset cannot be empty",
            ));
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(crate::error::FixerError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Creates a new connection config with safe defaults.
    pub fn new(host: String) -> Self {
        Self {
            host,
            ..Default::default()
        }
    }

    /// Builder method to set port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder method to set database.
    pub fn with_database(mut self, database: String) -> Self {
        self.database = Some(database);
        self
    }

    /// Builder method to set username.
    pub fn with_username(mut self, username: String) -> Self {
        self.username = Some(username);
        self
    }

    /// Builder method to set the character set.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Builder method to set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Parses a MySQL connection string into a validated configuration.
///
/// Recognized query parameters: `charset`, `connect_timeout` (seconds).
///
/// # Errors
/// Returns error if the URL is malformed, not `mysql://`, has no host, or
/// names no database.
pub fn parse_mysql_connection_config(connection_string: &str) -> crate::Result<ConnectionConfig> {
    validate_mysql_connection_string(connection_string)?;

    let url = Url::parse(connection_string).map_err(|e| {
        crate::error::FixerError::configuration(format!(
            "Invalid MySQL connection string format: {}",
            e
        ))
    })?;

    let mut config = ConnectionConfig::new(url.host_str().unwrap_or("localhost").to_string());

    match url.port() {
        Some(0) => {
            return Err(crate::error::FixerError::configuration(
                "Invalid port number: must be greater than 0",
            ));
        }
        Some(port) => config = config.with_port(port),
        None => config = config.with_port(DEFAULT_MYSQL_PORT),
    }

    let database = url.path().trim_start_matches('/');
    if database.is_empty() {
        return Err(crate::error::FixerError::configuration(
            "Connection string must name the database to repair",
        ));
    }
    if database.len() > 64 {
        return Err(crate::error::FixerError::configuration(
            "Database name too long: maximum 64 characters",
        ));
    }
    config = config.with_database(database.to_string());

    let username = url.username();
    if !username.is_empty() {
        if username.len() > 32 {
            return Err(crate::error::FixerError::configuration(
                "Username too long: maximum 32 characters for MySQL",
            ));
        }
        config = config.with_username(username.to_string());
    }

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "charset" if !value.is_empty() => {
                config.charset = value.to_string();
            }
            "connect_timeout" => {
                if let Ok(timeout_secs) = value.parse::<u64>()
                    && timeout_secs > 0
                {
                    config.connect_timeout = Duration::from_secs(timeout_secs);
                }
            }
            _ => {} // Ignore other parameters
        }
    }

    config.validate()?;

    Ok(config)
}

/// Validates MySQL connection string format.
///
/// # Errors
/// Returns error if connection string is invalid
pub fn validate_mysql_connection_string(connection_string: &str) -> crate::Result<()> {
    let url = Url::parse(connection_string).map_err(|e| {
        crate::error::FixerError::configuration(format!(
            "Invalid MySQL connection string format: {}",
            e
        ))
    })?;

    if url.scheme() != "mysql" {
        return Err(crate::error::FixerError::configuration(
            "Connection string must use mysql:// scheme",
        ));
    }

    if url.host_str().is_none() {
        return Err(crate::error::FixerError::configuration(
            "Connection string must specify a host",
        ));
    }

    Ok(())
}
