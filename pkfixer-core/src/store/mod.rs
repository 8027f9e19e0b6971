//! Store-access boundary.
//!
//! `Store` is the only surface through which pkfixer reads or mutates a
//! database. Each method maps to one statement (or one metadata query),
//! so a backend can classify its failures with an [`ErrorKind`] at the
//! point where they occur.
//!
//! # Module Structure
//! - `mysql`: sqlx-backed MySQL sessions
//! - `memory`: in-memory tables for rehearsals and tests
//! - `sql`: statement text shared by both backends
//!
//! [`ErrorKind`]: crate::error::ErrorKind

use crate::Result;
use crate::models::{ColumnDescriptor, DuplicateGroup, IndexDescriptor, RowSnapshot};
use async_trait::async_trait;

pub mod memory;
mod sql;

#[cfg(feature = "mysql")]
pub mod mysql;

/// One live session against the store.
///
/// # Object Safety
/// This trait is object-safe; the connection manager holds a
/// `Box<dyn Store>` and swaps it on reconnect.
#[async_trait]
pub trait Store: Send {
    /// Trivial liveness check.
    async fn ping(&mut self) -> Result<()>;

    /// Names of all base tables in the target database, sorted.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// True if a base table with this exact name exists.
    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Column metadata in ordinal order.
    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Index metadata, ordered by index name then sequence.
    async fn indexes(&mut self, table: &str) -> Result<Vec<IndexDescriptor>>;

    /// Number of rows whose `column` equals zero.
    async fn count_zero_ids(&mut self, table: &str, column: &str) -> Result<u64>;

    /// Values greater than zero held by more than one row, ascending,
    /// at most `limit` groups.
    async fn duplicate_ids(
        &mut self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>>;

    /// Number of rows whose `column` equals `value`.
    async fn count_identity(&mut self, table: &str, column: &str, value: &str) -> Result<u64>;

    /// Full rows whose `column` equals zero, for backups.
    async fn zero_id_rows(
        &mut self,
        table: &str,
        column: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<Vec<RowSnapshot>>;

    /// Deletes every row whose `column` equals zero; returns rows removed.
    async fn delete_zero_ids(&mut self, table: &str, column: &str) -> Result<u64>;

    /// Deletes up to `limit` rows holding `value`, removing rows in
    /// descending `survivor_order` so that the row sorting first survives.
    async fn delete_duplicate_rows(
        &mut self,
        table: &str,
        column: &str,
        value: &str,
        survivor_order: &[String],
        limit: u64,
    ) -> Result<u64>;

    /// Largest value in `column` (negative values count as 0), or `None`
    /// for an empty table.
    async fn max_identity(&mut self, table: &str, column: &str) -> Result<Option<u64>>;

    /// Alters `column` to the given definition (which carries
    /// `AUTO_INCREMENT`).
    async fn add_auto_increment(&mut self, table: &str, column: &str, definition: &str)
    -> Result<()>;

    /// Sets the table's auto-increment counter.
    async fn set_auto_increment(&mut self, table: &str, start: u64) -> Result<()>;
}

/// Opens fresh store sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes a new session with stability settings applied.
    async fn connect(&self) -> Result<Box<dyn Store>>;

    /// Connection target safe for logging (no credentials).
    fn describe(&self) -> String;
}
