//! MySQL store backend over a single sqlx connection.
//!
//! # Module Structure
//! - `connection`: session establishment, stability settings, and error
//!   classification
//!
//! Metadata comes from `INFORMATION_SCHEMA`; identifiers are
//! backtick-quoted and values are bound as parameters.

pub mod connection;

#[cfg(test)]
mod tests;

use super::{Store, sql};
use crate::Result;
use crate::models::{ColumnDescriptor, DuplicateGroup, IndexDescriptor, RowSnapshot, SqlValue};
use async_trait::async_trait;
use connection::store_error;
use sqlx::mysql::MySqlConnection;
use sqlx::{Executor, Row};

pub use connection::{MySqlConnector, TRANSIENT_ERROR_NUMBERS, classify, is_transient_error_number};

/// One live MySQL session.
pub struct MySqlStore {
    conn: MySqlConnection,
}

impl std::fmt::Debug for MySqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlStore").finish_non_exhaustive()
    }
}

impl MySqlStore {
    pub(crate) fn new(conn: MySqlConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn ping(&mut self) -> Result<()> {
        sqlx::query_scalar::<_, i64>(sql::PING)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| store_error("Liveness ping failed", e))?;
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(sql::LIST_TABLES)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| store_error("Failed to list tables", e))
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(sql::TABLE_EXISTS)
            .bind(table)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to look up table '{}'", table), e))?;
        Ok(count > 0)
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows = sqlx::query(sql::COLUMNS)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to read columns of '{}'", table), e))?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let decode = |e| store_error(format!("Failed to decode column of '{}'", table), e);
            let is_nullable: String = row.try_get("IS_NULLABLE").map_err(decode)?;
            columns.push(ColumnDescriptor {
                name: row.try_get("COLUMN_NAME").map_err(decode)?,
                column_type: row.try_get("COLUMN_TYPE").map_err(decode)?,
                is_nullable: is_nullable.eq_ignore_ascii_case("YES"),
                default_value: row.try_get("COLUMN_DEFAULT").map_err(decode)?,
                extra: row
                    .try_get::<Option<String>, _>("EXTRA")
                    .map_err(decode)?
                    .unwrap_or_default(),
                key: row
                    .try_get::<Option<String>, _>("COLUMN_KEY")
                    .map_err(decode)?
                    .unwrap_or_default(),
            });
        }
        Ok(columns)
    }

    async fn indexes(&mut self, table: &str) -> Result<Vec<IndexDescriptor>> {
        let rows = sqlx::query(sql::INDEXES)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to read indexes of '{}'", table), e))?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let decode = |e| store_error(format!("Failed to decode index of '{}'", table), e);
            let sequence: i64 = row.try_get("SEQ_IN_INDEX").map_err(decode)?;
            let non_unique: i64 = row.try_get("NON_UNIQUE").map_err(decode)?;
            indexes.push(IndexDescriptor {
                name: row.try_get("INDEX_NAME").map_err(decode)?,
                column_name: row
                    .try_get::<Option<String>, _>("COLUMN_NAME")
                    .map_err(decode)?
                    .unwrap_or_default(),
                sequence: u32::try_from(sequence).unwrap_or(u32::MAX),
                is_unique: non_unique == 0,
            });
        }
        Ok(indexes)
    }

    async fn count_zero_ids(&mut self, table: &str, column: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&sql::count_zero_ids(table, column))
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to count zero ids in '{}'", table), e))?;
        Ok(count.max(0) as u64)
    }

    async fn duplicate_ids(
        &mut self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        let rows = sqlx::query(&sql::duplicate_ids(table, column, limit))
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to group ids in '{}'", table), e))?;

        rows.iter()
            .map(|row| -> std::result::Result<DuplicateGroup, sqlx::Error> {
                let value: String = row.try_get("dup_value")?;
                let count: i64 = row.try_get("dup_count")?;
                Ok(DuplicateGroup {
                    value,
                    count: count.max(0) as u64,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| store_error(format!("Failed to decode duplicate ids of '{}'", table), e))
    }

    async fn count_identity(&mut self, table: &str, column: &str, value: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&sql::count_identity(table, column))
            .bind(value)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to count id {} in '{}'", value, table), e))?;
        Ok(count.max(0) as u64)
    }

    async fn zero_id_rows(
        &mut self,
        table: &str,
        column: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<Vec<RowSnapshot>> {
        let rows = sqlx::query(&sql::zero_id_rows(table, column, columns))
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to read zero-id rows of '{}'", table), e))?;

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for (idx, descriptor) in columns.iter().enumerate() {
                let raw: Option<String> = row.try_get(idx).map_err(|e| {
                    store_error(format!("Failed to decode row of '{}'", table), e)
                })?;
                values.push(decode_backup_value(descriptor, raw));
            }
            snapshots.push(RowSnapshot {
                columns: names.clone(),
                values,
            });
        }
        Ok(snapshots)
    }

    async fn delete_zero_ids(&mut self, table: &str, column: &str) -> Result<u64> {
        let result = sqlx::query(&sql::delete_zero_ids(table, column))
            .execute(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to delete zero ids from '{}'", table), e))?;
        Ok(result.rows_affected())
    }

    async fn delete_duplicate_rows(
        &mut self,
        table: &str,
        column: &str,
        value: &str,
        survivor_order: &[String],
        limit: u64,
    ) -> Result<u64> {
        let statement = sql::delete_duplicate_rows(table, column, survivor_order, limit);
        let result = sqlx::query(&statement)
            .bind(value)
            .execute(&mut self.conn)
            .await
            .map_err(|e| {
                store_error(
                    format!("Failed to delete duplicates of {} from '{}'", value, table),
                    e,
                )
            })?;
        Ok(result.rows_affected())
    }

    async fn max_identity(&mut self, table: &str, column: &str) -> Result<Option<u64>> {
        sqlx::query_scalar::<_, Option<u64>>(&sql::max_identity(table, column))
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| store_error(format!("Failed to read max id of '{}'", table), e))
    }

    async fn add_auto_increment(
        &mut self,
        table: &str,
        column: &str,
        definition: &str,
    ) -> Result<()> {
        let statement = sql::add_auto_increment(table, column, definition);
        self.conn
            .execute(statement.as_str())
            .await
            .map_err(|e| store_error(format!("Failed to alter '{}'", table), e))?;
        Ok(())
    }

    async fn set_auto_increment(&mut self, table: &str, start: u64) -> Result<()> {
        let statement = sql::set_auto_increment(table, start);
        self.conn
            .execute(statement.as_str())
            .await
            .map_err(|e| store_error(format!("Failed to set AUTO_INCREMENT of '{}'", table), e))?;
        Ok(())
    }
}

/// Turns a value read as text (or hex, for binary columns) back into a
/// typed value for the backup file.
pub(crate) fn decode_backup_value(column: &ColumnDescriptor, raw: Option<String>) -> SqlValue {
    let Some(text) = raw else {
        return SqlValue::Null;
    };
    if column.is_binary() {
        return match decode_hex(&text) {
            Some(bytes) => SqlValue::Bytes(bytes),
            None => SqlValue::Text(text),
        };
    }
    if is_integer_type(&column.column_type)
        && let Ok(value) = text.parse::<i64>()
    {
        return SqlValue::Int(value);
    }
    SqlValue::Text(text)
}

fn is_integer_type(column_type: &str) -> bool {
    let lower = column_type.to_lowercase();
    ["tinyint", "smallint", "mediumint", "bigint", "int"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}
