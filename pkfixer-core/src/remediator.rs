//! Fixes for the three defect classes.
//!
//! Fixes run in the order zero ids, duplicate ids, auto-increment: the
//! auto-increment start is computed after the destructive fixes, and the
//! column alteration never sees zero or duplicate values. Every statement
//! goes through the connection manager's retry wrapper. In dry-run mode
//! only reads are issued and no backup is written.

use crate::Result;
use crate::backup::write_zero_id_backup;
use crate::config::FixerConfig;
use crate::connection::ConnectionManager;
use crate::error::FixerError;
use crate::models::{DuplicateGroup, IssueRecord, RepairOutcome, TableAnalysis};
use crate::schema::SchemaInspector;
use crate::store::Store;
use std::path::PathBuf;

/// Applies fixes for detected issues.
#[derive(Debug, Clone)]
pub struct Remediator {
    inspector: SchemaInspector,
    max_retries: u32,
    dry_run: bool,
    backup_enabled: bool,
    backup_dir: PathBuf,
}

impl Remediator {
    /// Creates a remediator from run options.
    pub fn new(config: &FixerConfig) -> Self {
        Self {
            inspector: SchemaInspector::new(config.max_retries),
            max_retries: config.max_retries,
            dry_run: config.dry_run,
            backup_enabled: config.backup_enabled,
            backup_dir: config.backup_dir.clone(),
        }
    }

    /// Deletes every row whose identity is zero, after an optional backup.
    ///
    /// Returns the number of rows removed (in dry-run, the number that
    /// would be removed). A failed backup is logged and does not block
    /// the delete.
    ///
    /// # Errors
    /// Returns error if the delete fails after retries.
    pub async fn fix_zero_ids(
        &self,
        conn: &mut ConnectionManager,
        table: &str,
        column: &str,
    ) -> Result<u64> {
        if self.dry_run {
            let count = conn
                .execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
                    store.count_zero_ids(table, column).await
                })
                .await?;
            tracing::info!("[DRY RUN] Would delete {} rows with {} = 0 from {}", count, column, table);
            return Ok(count);
        }

        if self.backup_enabled
            && let Err(e) = self.backup_zero_ids(conn, table, column).await
        {
            tracing::warn!("Backup of zero-id rows in {} failed: {}", table, e);
        }

        let removed = conn
            .execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
                store.delete_zero_ids(table, column).await
            })
            .await?;
        tracing::info!("Deleted {} rows with {} = 0 from {}", removed, column, table);
        Ok(removed)
    }

    async fn backup_zero_ids(
        &self,
        conn: &mut ConnectionManager,
        table: &str,
        column: &str,
    ) -> Result<PathBuf> {
        let columns = self.inspector.get_columns(conn, table).await?;
        let rows = conn
            .execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
                store.zero_id_rows(table, column, &columns).await
            })
            .await?;
        write_zero_id_backup(&self.backup_dir, table, &rows).await
    }

    /// Reduces every duplicate group to a single row.
    ///
    /// The survivor is the row that sorts first when the group is ordered
    /// ascending by the table's other columns in ordinal order. Each group
    /// is re-counted right before its delete so a retried delete never
    /// removes the survivor.
    ///
    /// # Errors
    /// Returns error if a read or delete fails after retries.
    pub async fn fix_duplicate_ids(
        &self,
        conn: &mut ConnectionManager,
        table: &str,
        column: &str,
        groups: &[DuplicateGroup],
    ) -> Result<u64> {
        if self.dry_run {
            let would_remove: u64 = groups.iter().map(|g| g.count.saturating_sub(1)).sum();
            tracing::info!(
                "[DRY RUN] Would delete {} duplicate rows across {} ids in {}",
                would_remove,
                groups.len(),
                table
            );
            return Ok(would_remove);
        }

        let survivor_order: Vec<String> = self
            .inspector
            .get_columns(conn, table)
            .await?
            .into_iter()
            .filter(|c| c.name != column)
            .map(|c| c.name)
            .collect();

        let mut removed = 0;
        for group in groups {
            let value = group.value.as_str();
            let deleted = conn
                .execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
                    let current = store.count_identity(table, column, value).await?;
                    if current <= 1 {
                        return Ok(0);
                    }
                    store
                        .delete_duplicate_rows(table, column, value, &survivor_order, current - 1)
                        .await
                })
                .await?;
            tracing::debug!("Removed {} duplicate rows with {} = {} from {}", deleted, column, value, table);
            removed += deleted;
        }

        tracing::info!("Deleted {} duplicate rows from {}", removed, table);
        Ok(removed)
    }

    /// Adds AUTO_INCREMENT to `column` and sets the table counter to
    /// `max(column) + 1` (1 for an empty table). Returns the start value.
    ///
    /// # Errors
    /// Returns error if the column is gone or either alteration fails.
    pub async fn fix_auto_increment(
        &self,
        conn: &mut ConnectionManager,
        table: &str,
        column: &str,
    ) -> Result<u64> {
        let max = conn
            .execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
                store.max_identity(table, column).await
            })
            .await?;
        let start = next_auto_increment(max);

        let columns = self.inspector.get_columns(conn, table).await?;
        let descriptor = columns
            .iter()
            .find(|c| c.name == column)
            .ok_or_else(|| FixerError::repair_failed(table, format!("column '{}' not found", column)))?;
        let definition = descriptor.auto_increment_definition();

        if self.dry_run {
            tracing::info!(
                "[DRY RUN] Would modify {}.{} to {} starting at {}",
                table,
                column,
                definition,
                start
            );
            return Ok(start);
        }

        conn.execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
            store.add_auto_increment(table, column, &definition).await
        })
        .await?;
        conn.execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
            store.set_auto_increment(table, start).await
        })
        .await?;

        tracing::info!("Added AUTO_INCREMENT to {}.{} starting at {}", table, column, start);
        Ok(start)
    }

    /// Applies the fix for every issue of `analysis`, in order.
    ///
    /// A failed fix is logged and recorded; the remaining fixes are still
    /// attempted.
    pub async fn repair_table(
        &self,
        conn: &mut ConnectionManager,
        analysis: &TableAnalysis,
    ) -> RepairOutcome {
        let table = analysis.table.as_str();
        let mut failures = Vec::new();

        for issue in &analysis.issues {
            let result = match issue {
                IssueRecord::ZeroIds { column, .. } => {
                    self.fix_zero_ids(conn, table, column).await.map(|_| ())
                }
                IssueRecord::DuplicateIds { column, groups } => self
                    .fix_duplicate_ids(conn, table, column, groups)
                    .await
                    .map(|_| ()),
                IssueRecord::MissingAutoIncrement { column } => {
                    self.fix_auto_increment(conn, table, column).await.map(|_| ())
                }
            };

            if let Err(e) = result {
                tracing::error!("Failed to fix {} in {}: {}", issue.class(), table, e);
                failures.push((issue.class(), e.to_string()));
            }
        }

        RepairOutcome {
            table: table.to_string(),
            success: failures.is_empty(),
            attempted: analysis.issues.clone(),
            failures,
        }
    }
}

/// Auto-increment start for a column whose current maximum is `max`.
///
/// ```rust
/// use pkfixer_core::remediator::next_auto_increment;
///
/// assert_eq!(next_auto_increment(None), 1);
/// assert_eq!(next_auto_increment(Some(0)), 1);
/// assert_eq!(next_auto_increment(Some(41)), 42);
/// assert_eq!(next_auto_increment(Some(9_223_372_036_854_775_808)), 9_223_372_036_854_775_809);
/// ```
pub fn next_auto_increment(max: Option<u64>) -> u64 {
    max.unwrap_or(0).saturating_add(1)
}
