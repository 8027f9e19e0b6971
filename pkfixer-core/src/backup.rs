//! Backup files for rows removed by the zero-id fix.
//!
//! Backups are plain SQL (`INSERT` statements) intended for manual
//! recovery; nothing in pkfixer reads them back.

use crate::Result;
use crate::error::FixerError;
use crate::models::RowSnapshot;
use std::path::{Path, PathBuf};

/// Path of the zero-id backup for `table` inside `dir`.
pub fn backup_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}_zero_ids.sql", table))
}

/// Renders the backup file body: a header naming the table and the time,
/// then one `INSERT` per row.
pub fn render_backup(table: &str, rows: &[RowSnapshot]) -> String {
    let mut body = format!(
        "-- Backup of zero-id rows from `{}`\n-- Generated: {}\n-- Rows: {}\n\n",
        table,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        rows.len()
    );
    for row in rows {
        body.push_str(&row.to_insert_statement(table));
        body.push('\n');
    }
    body
}

/// Writes the zero-id backup for `table` and returns its path.
///
/// # Errors
/// Returns error if the directory cannot be created or the file written.
pub async fn write_zero_id_backup(dir: &Path, table: &str, rows: &[RowSnapshot]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| FixerError::Io {
            context: format!("Failed to create backup directory {}", dir.display()),
            source: e,
        })?;

    let path = backup_path(dir, table);
    tokio::fs::write(&path, render_backup(table, rows))
        .await
        .map_err(|e| FixerError::Io {
            context: format!("Failed to write backup {}", path.display()),
            source: e,
        })?;

    tracing::info!("Backed up {} rows of {} to {}", rows.len(), table, path.display());
    Ok(path)
}
