//! Connection management with preventive reconnects and bounded retry.
//!
//! The [`ConnectionManager`] owns the single live [`Store`] session. Every
//! store access in the crate goes through [`ConnectionManager::execute_with_retry`],
//! which checks the session first and transparently reconnects after
//! transient-connectivity failures.

use crate::Result;
use crate::config::FixerConfig;
use crate::error::{ErrorKind, FixerError, StoreMessage};
use crate::store::{Connector, Store};
use std::time::Duration;
use tokio::time::Instant;

/// Owns the live session and its reconnection policy.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    store: Option<Box<dyn Store>>,
    last_connected: Option<Instant>,
    reconnect_interval: Duration,
    retry_delay: Duration,
    reconnects: u32,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.connector.describe())
            .field("connected", &self.store.is_some())
            .field("reconnects", &self.reconnects)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager; no session is opened until first use.
    pub fn new(connector: Box<dyn Connector>, config: &FixerConfig) -> Self {
        Self {
            connector,
            store: None,
            last_connected: None,
            reconnect_interval: config.reconnect_interval(),
            retry_delay: config.retry_delay(),
            reconnects: 0,
        }
    }

    /// Opens a fresh session, replacing any existing one.
    ///
    /// # Errors
    /// Returns the classified connection error; the manager is left
    /// without a session.
    pub async fn connect(&mut self) -> Result<()> {
        self.store = None;
        let store = self.connector.connect().await?;
        self.store = Some(store);
        self.last_connected = Some(Instant::now());
        tracing::info!("Connected to {}", self.connector.describe());
        Ok(())
    }

    /// Drops the current session and opens a new one.
    ///
    /// # Errors
    /// Returns the classified connection error.
    pub async fn reconnect(&mut self) -> Result<()> {
        tracing::info!("Reconnecting to {}", self.connector.describe());
        self.connect().await?;
        self.reconnects += 1;
        Ok(())
    }

    /// Makes sure a usable session exists.
    ///
    /// A session older than the reconnect interval is replaced without
    /// a ping. Otherwise the session is pinged; a transient ping failure
    /// triggers a reconnect and any other ping failure is returned.
    ///
    /// # Errors
    /// Returns error if the ping fails non-transiently or the reconnect
    /// fails.
    pub async fn ensure_connection(&mut self) -> Result<()> {
        let Some(last_connected) = self.last_connected else {
            return self.connect().await;
        };
        if self.store.is_none() {
            return self.reconnect().await;
        }

        if last_connected.elapsed() > self.reconnect_interval {
            tracing::info!(
                "Connection older than {}s, reconnecting preventively",
                self.reconnect_interval.as_secs()
            );
            return self.reconnect().await;
        }

        let Some(store) = self.store.as_mut() else {
            return Err(not_connected());
        };
        match store.ping().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                tracing::warn!("Liveness ping failed: {}", e);
                self.reconnect().await
            }
            Err(e) => Err(e),
        }
    }

    /// Runs `operation` against the live session, retrying on
    /// transient-connectivity failures.
    ///
    /// At most `max_attempts` attempts are made (at least one). Between
    /// attempts the manager waits the retry delay and forces a reconnect;
    /// no reconnect follows the final failed attempt. A failed reconnect is
    /// logged and the next attempt tries again through
    /// [`ensure_connection`](Self::ensure_connection). Non-transient errors
    /// are returned immediately.
    ///
    /// ```rust,no_run
    /// # async fn demo(manager: &mut pkfixer_core::ConnectionManager) -> pkfixer_core::Result<()> {
    /// use pkfixer_core::store::Store;
    ///
    /// let columns = manager
    ///     .execute_with_retry(3, async |store: &mut dyn Store| store.columns("tblclients").await)
    ///     .await?;
    /// # let _ = columns;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns the last error once attempts are exhausted, or the first
    /// non-transient error.
    pub async fn execute_with_retry<T, F>(&mut self, max_attempts: u32, mut operation: F) -> Result<T>
    where
        F: AsyncFnMut(&mut dyn Store) -> Result<T>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match self.ensure_connection().await {
                Ok(()) => match self.store.as_deref_mut() {
                    Some(store) => operation(store).await,
                    None => Err(not_connected()),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        "Attempt {}/{} failed: {}; retrying in {}s",
                        attempt,
                        max_attempts,
                        e,
                        self.retry_delay.as_secs()
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    if let Err(reconnect_error) = self.reconnect().await {
                        tracing::warn!("Reconnect failed: {}", reconnect_error);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Number of reconnects since the manager was created.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnects
    }

    /// True while a session is held.
    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// Connection target safe for logging.
    pub fn describe(&self) -> String {
        self.connector.describe()
    }
}

fn not_connected() -> FixerError {
    FixerError::store(
        ErrorKind::TransientConnectivity,
        "No live session",
        StoreMessage("not connected".to_string()),
    )
}
