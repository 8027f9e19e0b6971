//! MySQL session establishment and error classification.
//!
//! # Session Settings
//! Every fresh session gets long idle timeouts, generous network timeouts,
//! and `ONLY_FULL_GROUP_BY` removed from `sql_mode`. The packet-size
//! setting is best-effort: MySQL 8 makes `max_allowed_packet` read-only at
//! session scope, so a failure there is only logged.

use super::MySqlStore;
use crate::Result;
use crate::config::{ConnectionConfig, parse_mysql_connection_config};
use crate::error::{ErrorKind, FixerError, StoreMessage, message_signals_disconnect, redact_database_url};
use crate::store::{Connector, Store};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::{ConnectOptions, Executor};
use std::str::FromStr;
use std::time::Duration;

/// Server error numbers that mean the session is gone or unusable.
///
/// - 1053: server shutdown in progress
/// - 1152/1159/1161: aborted connection, net read/write timeouts
/// - 1927: connection killed
/// - 2006: server has gone away
/// - 2013: lost connection during query
/// - 4031: disconnected by the server for inactivity
///
/// 1153 (packet too large) is not listed: a resend fails the same way.
pub const TRANSIENT_ERROR_NUMBERS: &[u16] = &[1053, 1152, 1159, 1161, 1927, 2006, 2013, 4031];

const SESSION_SETTINGS: &[&str] = &[
    "SET SESSION wait_timeout = 28800",
    "SET SESSION interactive_timeout = 28800",
    "SET SESSION net_read_timeout = 600",
    "SET SESSION net_write_timeout = 600",
    "SET SESSION sql_mode = TRIM(BOTH ',' FROM REPLACE(CONCAT(',', @@SESSION.sql_mode, ','), ',ONLY_FULL_GROUP_BY,', ','))",
];

const PACKET_SETTING: &str = "SET SESSION max_allowed_packet = 1073741824";

/// Classifies a driver error for retry decisions.
pub fn classify(error: &sqlx::Error) -> ErrorKind {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorKind::TransientConnectivity,
        sqlx::Error::Database(db) => {
            if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>()
                && is_transient_error_number(mysql.number())
            {
                return ErrorKind::TransientConnectivity;
            }
            classify_message(db.message())
        }
        other => classify_message(&other.to_string()),
    }
}

/// True for server error numbers that indicate a lost session.
pub fn is_transient_error_number(number: u16) -> bool {
    TRANSIENT_ERROR_NUMBERS.contains(&number)
}

fn classify_message(message: &str) -> ErrorKind {
    if message_signals_disconnect(message) {
        ErrorKind::TransientConnectivity
    } else {
        ErrorKind::Other
    }
}

/// Wraps a driver error as a classified store error.
pub(crate) fn store_error(context: impl Into<String>, error: sqlx::Error) -> FixerError {
    FixerError::store(classify(&error), context, error)
}

/// Opens single-connection MySQL sessions.
///
/// # Security
/// The connection URL is kept private and only ever logged in redacted
/// form.
#[derive(Clone)]
pub struct MySqlConnector {
    options: MySqlConnectOptions,
    config: ConnectionConfig,
    redacted_url: String,
}

impl std::fmt::Debug for MySqlConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnector")
            .field("config", &self.config)
            .field("url", &self.redacted_url)
            .finish_non_exhaustive()
    }
}

impl MySqlConnector {
    /// Builds a connector from a `mysql://` URL without connecting.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or names no database.
    pub fn new(connection_string: &str) -> Result<Self> {
        let config = parse_mysql_connection_config(connection_string)?;
        let options = MySqlConnectOptions::from_str(connection_string)
            .map_err(|e| {
                FixerError::configuration(format!("Invalid MySQL connection options: {}", e))
            })?
            .charset(&config.charset);

        Ok(Self {
            options,
            config,
            redacted_url: redact_database_url(connection_string),
        })
    }

    /// Builder method to bound each connection attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Builder method to override the session character set.
    pub fn with_charset(mut self, charset: &str) -> Self {
        self.options = self.options.charset(charset);
        self.config.charset = charset.to_string();
        self
    }

    /// Parsed connection target.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self) -> Result<Box<dyn Store>> {
        tracing::debug!("Opening MySQL session to {}", self.redacted_url);

        let mut conn =
            match tokio::time::timeout(self.config.connect_timeout, self.options.connect()).await {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    return Err(FixerError::connection_failed(
                        classify(&e),
                        self.redacted_url.clone(),
                        e,
                    ));
                }
                Err(_) => {
                    return Err(FixerError::connection_failed(
                        ErrorKind::TransientConnectivity,
                        self.redacted_url.clone(),
                        StoreMessage(format!(
                            "Connection timed out after {}s",
                            self.config.connect_timeout.as_secs()
                        )),
                    ));
                }
            };

        apply_session_settings(&mut conn).await?;
        Ok(Box::new(MySqlStore::new(conn)))
    }

    fn describe(&self) -> String {
        self.config.to_string()
    }
}

async fn apply_session_settings(conn: &mut MySqlConnection) -> Result<()> {
    for statement in SESSION_SETTINGS {
        conn.execute(*statement)
            .await
            .map_err(|e| {
                FixerError::connection_failed(classify(&e), "Failed to apply session settings", e)
            })?;
    }

    if let Err(e) = conn.execute(PACKET_SETTING).await {
        tracing::debug!("Session max_allowed_packet not adjustable: {}", e);
    }

    Ok(())
}
