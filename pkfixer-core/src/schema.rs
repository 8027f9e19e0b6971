//! Table metadata reads and primary-key derivation.

use crate::Result;
use crate::connection::ConnectionManager;
use crate::models::{ColumnDescriptor, IndexDescriptor, TableDescriptor};
use crate::store::Store;

/// Reads table structure through the connection manager.
#[derive(Debug, Clone, Copy)]
pub struct SchemaInspector {
    max_retries: u32,
}

impl SchemaInspector {
    /// Creates an inspector that retries each metadata read up to
    /// `max_retries` attempts.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Column metadata in ordinal order.
    ///
    /// # Errors
    /// Returns error if the read fails after retries.
    pub async fn get_columns(
        &self,
        conn: &mut ConnectionManager,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>> {
        conn.execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
            store.columns(table).await
        })
        .await
    }

    /// Index metadata.
    ///
    /// # Errors
    /// Returns error if the read fails after retries.
    pub async fn get_indexes(
        &self,
        conn: &mut ConnectionManager,
        table: &str,
    ) -> Result<Vec<IndexDescriptor>> {
        conn.execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
            store.indexes(table).await
        })
        .await
    }

    /// Fresh structural snapshot of `table`.
    ///
    /// # Errors
    /// Returns error if either metadata read fails.
    pub async fn describe(&self, conn: &mut ConnectionManager, table: &str) -> Result<TableDescriptor> {
        let columns = self.get_columns(conn, table).await?;
        let indexes = self.get_indexes(conn, table).await?;
        Ok(TableDescriptor {
            name: table.to_string(),
            columns,
            indexes,
        })
    }

    /// Derives the primary-key column.
    ///
    /// The first column of the `PRIMARY` index wins; failing that, the
    /// first column (in ordinal order) whose own metadata marks it as a
    /// primary-key participant. Returns `None` when neither exists.
    pub fn find_primary_key(
        columns: &[ColumnDescriptor],
        indexes: &[IndexDescriptor],
    ) -> Option<String> {
        indexes
            .iter()
            .filter(|index| index.is_primary())
            .min_by_key(|index| index.sequence)
            .map(|index| index.column_name.clone())
            .or_else(|| {
                columns
                    .iter()
                    .find(|column| column.is_primary_key())
                    .map(|column| column.name.clone())
            })
    }
}
