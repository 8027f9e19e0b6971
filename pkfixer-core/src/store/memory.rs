//! In-memory store for rehearsals and tests.
//!
//! [`MemoryDatabase`] is a shared handle over a set of tables. It acts as
//! the [`Connector`]; each `connect()` hands out a [`MemoryStore`] session
//! bound to the current connection generation. Calling
//! [`MemoryDatabase::drop_connections`] makes every open session fail with a
//! transient-connectivity error, the way a server-side timeout would.
//!
//! Every operation appends the SQL the MySQL backend would issue to a
//! statement log, so tests can assert on what was (and was not) executed.

use super::{Connector, Store, sql};
use crate::Result;
use crate::error::{ErrorKind, FixerError, StoreMessage};
use crate::models::{
    ColumnDescriptor, DuplicateGroup, IndexDescriptor, PRIMARY_INDEX_NAME, RowSnapshot, SqlValue,
};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A table held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,
    /// Index entries
    pub indexes: Vec<IndexDescriptor>,
    /// Rows, each parallel to `columns`
    pub rows: Vec<Vec<SqlValue>>,
    /// Table auto-increment counter, once set
    pub auto_increment: Option<u64>,
}

impl MemoryTable {
    /// Creates an empty table with the given columns.
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    /// Builder method adding a `PRIMARY` index entry over `column`.
    pub fn with_primary_index(mut self, column: &str) -> Self {
        let sequence = self.indexes.iter().filter(|i| i.is_primary()).count() as u32 + 1;
        self.indexes.push(IndexDescriptor {
            name: PRIMARY_INDEX_NAME.to_string(),
            column_name: column.to_string(),
            sequence,
            is_unique: true,
        });
        self
    }

    /// Builder method adding a secondary index entry.
    pub fn with_index(mut self, name: &str, column: &str, is_unique: bool) -> Self {
        let sequence = self.indexes.iter().filter(|i| i.name == name).count() as u32 + 1;
        self.indexes.push(IndexDescriptor {
            name: name.to_string(),
            column_name: column.to_string(),
            sequence,
            is_unique,
        });
        self
    }

    /// Builder method appending a row.
    pub fn with_row(mut self, row: Vec<SqlValue>) -> Self {
        self.rows.push(row);
        self
    }

    /// Values of `column`, in row order.
    pub fn column_values(&self, column: &str) -> Vec<SqlValue> {
        match self.position(column) {
            Some(idx) => self.rows.iter().map(|row| row[idx].clone()).collect(),
            None => Vec::new(),
        }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }
}

#[derive(Debug)]
struct InjectedFailure {
    operation: &'static str,
    kind: ErrorKind,
    remaining: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    statements: Vec<String>,
    failures: Vec<InjectedFailure>,
    connect_failures: u32,
    connects: u32,
    generation: u64,
}

impl MemoryState {
    fn take_failure(&mut self, operation: &str) -> Option<ErrorKind> {
        let failure = self
            .failures
            .iter_mut()
            .find(|f| f.operation == operation && f.remaining > 0)?;
        failure.remaining -= 1;
        Some(failure.kind)
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables.get(name).ok_or_else(|| missing_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables.get_mut(name).ok_or_else(|| missing_table(name))
    }
}

fn missing_table(name: &str) -> FixerError {
    FixerError::store(
        ErrorKind::Other,
        format!("Table '{}' doesn't exist", name),
        StoreMessage(format!("unknown table {}", name)),
    )
}

fn missing_column(table: &str, column: &str) -> FixerError {
    FixerError::store(
        ErrorKind::Other,
        format!("Unknown column '{}' in '{}'", column, table),
        StoreMessage(format!("unknown column {}", column)),
    )
}

fn identity_of(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int(v) => Some(*v),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Ordering used by `ORDER BY`: NULL first, then numbers, text, bytes.
fn compare_values(a: &SqlValue, b: &SqlValue) -> Ordering {
    fn rank(value: &SqlValue) -> u8 {
        match value {
            SqlValue::Null => 0,
            SqlValue::Int(_) => 1,
            SqlValue::Text(_) => 2,
            SqlValue::Bytes(_) => 3,
        }
    }
    match (a, b) {
        (SqlValue::Int(x), SqlValue::Int(y)) => x.cmp(y),
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        (SqlValue::Bytes(x), SqlValue::Bytes(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Shared in-memory database; clones refer to the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a table.
    pub fn add_table(&self, name: &str, table: MemoryTable) {
        self.lock().tables.insert(name.to_string(), table);
    }

    /// Builder-style variant of [`add_table`](Self::add_table).
    pub fn with_table(self, name: &str, table: MemoryTable) -> Self {
        self.add_table(name, table);
        self
    }

    /// Copy of a table's current contents.
    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.lock().tables.get(name).cloned()
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Executed statements that changed data or structure.
    pub fn mutating_statements(&self) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .filter(|s| sql::is_mutating(s))
            .cloned()
            .collect()
    }

    /// Number of sessions opened so far.
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    /// Makes the next `times` calls of `operation` fail with `kind`.
    ///
    /// Operation names match the [`Store`] method names, e.g. `"columns"`.
    pub fn fail_operation(&self, operation: &'static str, kind: ErrorKind, times: u32) {
        self.lock().failures.push(InjectedFailure {
            operation,
            kind,
            remaining: times,
        });
    }

    /// Makes the next `times` connection attempts fail.
    pub fn fail_connects(&self, times: u32) {
        self.lock().connect_failures = times;
    }

    /// Invalidates every open session.
    pub fn drop_connections(&self) {
        self.lock().generation += 1;
    }
}

#[async_trait]
impl Connector for MemoryDatabase {
    async fn connect(&self) -> Result<Box<dyn Store>> {
        let mut state = self.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(FixerError::connection_failed(
                ErrorKind::TransientConnectivity,
                "memory",
                StoreMessage("Can't connect to MySQL server".to_string()),
            ));
        }
        state.connects += 1;
        Ok(Box::new(MemoryStore {
            database: self.clone(),
            generation: state.generation,
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// One session over a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryStore {
    database: MemoryDatabase,
    generation: u64,
}

impl MemoryStore {
    /// Locks the state for one operation, logging `statement` and applying
    /// stale-session and injected failures first.
    fn begin(&self, operation: &'static str, statement: String) -> Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.database.lock();
        if state.generation != self.generation {
            return Err(FixerError::store(
                ErrorKind::TransientConnectivity,
                format!("{} failed", operation),
                StoreMessage("MySQL server has gone away".to_string()),
            ));
        }
        if let Some(kind) = state.take_failure(operation) {
            return Err(FixerError::store(
                kind,
                format!("{} failed", operation),
                StoreMessage(format!("injected {} failure", operation)),
            ));
        }
        state.statements.push(statement);
        Ok(state)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&mut self) -> Result<()> {
        self.begin("ping", sql::PING.to_string())?;
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let state = self.begin("list_tables", sql::LIST_TABLES.trim().to_string())?;
        Ok(state.tables.keys().cloned().collect())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let state = self.begin("table_exists", sql::TABLE_EXISTS.trim().to_string())?;
        Ok(state.tables.contains_key(table))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let state = self.begin("columns", sql::COLUMNS.trim().to_string())?;
        Ok(state.table(table)?.columns.clone())
    }

    async fn indexes(&mut self, table: &str) -> Result<Vec<IndexDescriptor>> {
        let state = self.begin("indexes", sql::INDEXES.trim().to_string())?;
        let mut indexes = state.table(table)?.indexes.clone();
        indexes.sort_by(|a, b| a.name.cmp(&b.name).then(a.sequence.cmp(&b.sequence)));
        Ok(indexes)
    }

    async fn count_zero_ids(&mut self, table: &str, column: &str) -> Result<u64> {
        let state = self.begin("count_zero_ids", sql::count_zero_ids(table, column))?;
        let data = state.table(table)?;
        let idx = data.position(column).ok_or_else(|| missing_column(table, column))?;
        Ok(data
            .rows
            .iter()
            .filter(|row| identity_of(&row[idx]) == Some(0))
            .count() as u64)
    }

    async fn duplicate_ids(
        &mut self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        let state = self.begin("duplicate_ids", sql::duplicate_ids(table, column, limit))?;
        let data = state.table(table)?;
        let idx = data.position(column).ok_or_else(|| missing_column(table, column))?;

        let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
        for value in data.rows.iter().filter_map(|row| identity_of(&row[idx])) {
            if value > 0 {
                *counts.entry(value).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .take(limit)
            .map(|(value, count)| DuplicateGroup {
                value: value.to_string(),
                count,
            })
            .collect())
    }

    async fn count_identity(&mut self, table: &str, column: &str, value: &str) -> Result<u64> {
        let state = self.begin("count_identity", sql::count_identity(table, column))?;
        let data = state.table(table)?;
        let idx = data.position(column).ok_or_else(|| missing_column(table, column))?;
        let target: Option<i64> = value.trim().parse().ok();
        Ok(data
            .rows
            .iter()
            .filter(|row| target.is_some() && identity_of(&row[idx]) == target)
            .count() as u64)
    }

    async fn zero_id_rows(
        &mut self,
        table: &str,
        column: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<Vec<RowSnapshot>> {
        let state = self.begin("zero_id_rows", sql::zero_id_rows(table, column, columns))?;
        let data = state.table(table)?;
        let idx = data.position(column).ok_or_else(|| missing_column(table, column))?;
        let projection = columns
            .iter()
            .map(|c| data.position(&c.name).ok_or_else(|| missing_column(table, &c.name)))
            .collect::<Result<Vec<usize>>>()?;

        Ok(data
            .rows
            .iter()
            .filter(|row| identity_of(&row[idx]) == Some(0))
            .map(|row| RowSnapshot {
                columns: columns.iter().map(|c| c.name.clone()).collect(),
                values: projection.iter().map(|&i| row[i].clone()).collect(),
            })
            .collect())
    }

    async fn delete_zero_ids(&mut self, table: &str, column: &str) -> Result<u64> {
        let mut state = self.begin("delete_zero_ids", sql::delete_zero_ids(table, column))?;
        let data = state.table_mut(table)?;
        let idx = data.position(column).ok_or_else(|| missing_column(table, column))?;
        let before = data.rows.len();
        data.rows.retain(|row| identity_of(&row[idx]) != Some(0));
        Ok((before - data.rows.len()) as u64)
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
        let mut state = self.begin("delete_duplicate_rows", statement)?;
        let data = state.table_mut(table)?;
        let idx = data.position(column).ok_or_else(|| missing_column(table, column))?;
        let order = survivor_order
            .iter()
            .map(|c| data.position(c).ok_or_else(|| missing_column(table, c)))
            .collect::<Result<Vec<usize>>>()?;
        let target: Option<i64> = value.trim().parse().ok();

        let mut matching: Vec<usize> = (0..data.rows.len())
            .filter(|&i| target.is_some() && identity_of(&data.rows[i][idx]) == target)
            .collect();
        // ORDER BY ... DESC
        matching.sort_by(|&a, &b| {
            order
                .iter()
                .map(|&col| compare_values(&data.rows[b][col], &data.rows[a][col]))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        matching.truncate(limit as usize);

        let doomed: std::collections::HashSet<usize> = matching.into_iter().collect();
        let mut position = 0;
        data.rows.retain(|_| {
            let keep = !doomed.contains(&position);
            position += 1;
            keep
        });
        Ok(doomed.len() as u64)
    }

    async fn max_identity(&mut self, table: &str, column: &str) -> Result<Option<u64>> {
        let state = self.begin("max_identity", sql::max_identity(table, column))?;
        let data = state.table(table)?;
        let idx = data.position(column).ok_or_else(|| missing_column(table, column))?;
        let max = data.rows.iter().filter_map(|row| identity_of(&row[idx])).max();
        Ok(max.map(|m| u64::try_from(m).unwrap_or(0)))
    }

    async fn add_auto_increment(
        &mut self,
        table: &str,
        column: &str,
        definition: &str,
    ) -> Result<()> {
        let statement = sql::add_auto_increment(table, column, definition);
        let mut state = self.begin("add_auto_increment", statement)?;
        let data = state.table_mut(table)?;
        let idx = data.position(column).ok_or_else(|| missing_column(table, column))?;

        // MySQL resequences zero values and rejects duplicates here.
        let mut seen: HashMap<i64, u32> = HashMap::new();
        for value in data.rows.iter().filter_map(|row| identity_of(&row[idx])) {
            let count = seen.entry(value).or_default();
            *count += 1;
            if value == 0 || *count > 1 {
                return Err(FixerError::store(
                    ErrorKind::Other,
                    format!("ALTER TABLE {} failed", table),
                    StoreMessage(format!(
                        "ALTER TABLE causes auto_increment resequencing, resulting in duplicate entry '{}'",
                        value
                    )),
                ));
            }
        }

        let column = &mut data.columns[idx];
        column.extra = "auto_increment".to_string();
        column.default_value = None;
        if definition.to_uppercase().contains("NOT NULL") {
            column.is_nullable = false;
        }
        Ok(())
    }

    async fn set_auto_increment(&mut self, table: &str, start: u64) -> Result<()> {
        let mut state = self.begin("set_auto_increment", sql::set_auto_increment(table, start))?;
        state.table_mut(table)?.auto_increment = Some(start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_table(ids: &[i64]) -> MemoryTable {
        let mut table = MemoryTable::new(vec![
            ColumnDescriptor::new("id", "int(11)").primary(),
            ColumnDescriptor::new("name", "varchar(50)"),
        ])
        .with_primary_index("id");
        for (n, id) in ids.iter().enumerate() {
            table = table.with_row(vec![SqlValue::Int(*id), SqlValue::Text(format!("row{}", n))]);
        }
        table
    }

    #[tokio::test]
    async fn test_zero_and_duplicate_counts() {
        let db = MemoryDatabase::new().with_table("t", identity_table(&[0, 0, 5, 5, 7]));
        let mut store = db.connect().await.unwrap();

        assert_eq!(store.count_zero_ids("t", "id").await.unwrap(), 2);
        assert_eq!(
            store.duplicate_ids("t", "id", 50).await.unwrap(),
            vec![DuplicateGroup {
                value: "5".to_string(),
                count: 2
            }]
        );
        assert!(db.mutating_statements().is_empty());
    }

    #[tokio::test]
    async fn test_max_identity_clamps_negative_values() {
        let db = MemoryDatabase::new()
            .with_table("neg", identity_table(&[-9, -2]))
            .with_table("pos", identity_table(&[-9, 41]))
            .with_table("empty", identity_table(&[]));
        let mut store = db.connect().await.unwrap();

        assert_eq!(store.max_identity("neg", "id").await.unwrap(), Some(0));
        assert_eq!(store.max_identity("pos", "id").await.unwrap(), Some(41));
        assert_eq!(store.max_identity("empty", "id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_groups_respect_limit() {
        let db = MemoryDatabase::new().with_table("t", identity_table(&[3, 3, 1, 1, 2, 2]));
        let mut store = db.connect().await.unwrap();

        let groups = store.duplicate_ids("t", "id", 2).await.unwrap();
        let values: Vec<&str> = groups.iter().map(|g| g.value.as_str()).collect();
        assert_eq!(values, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_delete_duplicate_rows_keeps_first_in_order() {
        let table = MemoryTable::new(vec![
            ColumnDescriptor::new("id", "int(11)"),
            ColumnDescriptor::new("name", "varchar(50)"),
        ])
        .with_row(vec![SqlValue::Int(4), SqlValue::Text("carol".to_string())])
        .with_row(vec![SqlValue::Int(4), SqlValue::Text("alice".to_string())])
        .with_row(vec![SqlValue::Int(4), SqlValue::Text("bob".to_string())])
        .with_row(vec![SqlValue::Int(9), SqlValue::Text("zed".to_string())]);
        let db = MemoryDatabase::new().with_table("t", table);
        let mut store = db.connect().await.unwrap();

        let removed = store
            .delete_duplicate_rows("t", "id", "4", &["name".to_string()], 2)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let names = db.table("t").unwrap().column_values("name");
        assert_eq!(
            names,
            vec![
                SqlValue::Text("alice".to_string()),
                SqlValue::Text("zed".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_add_auto_increment_rejects_zero_ids() {
        let db = MemoryDatabase::new().with_table("t", identity_table(&[0, 1]));
        let mut store = db.connect().await.unwrap();

        let err = store
            .add_auto_increment("t", "id", "int(11) NOT NULL AUTO_INCREMENT")
            .await
            .unwrap_err();
        assert!(!err.is_transient());

        store.delete_zero_ids("t", "id").await.unwrap();
        store
            .add_auto_increment("t", "id", "int(11) NOT NULL AUTO_INCREMENT")
            .await
            .unwrap();
        assert!(db.table("t").unwrap().columns[0].is_auto_increment());
    }

    #[tokio::test]
    async fn test_dropped_connection_invalidates_session() {
        let db = MemoryDatabase::new().with_table("t", identity_table(&[1]));
        let mut stale = db.connect().await.unwrap();
        db.drop_connections();

        let err = stale.ping().await.unwrap_err();
        assert!(err.is_transient());

        let mut fresh = db.connect().await.unwrap();
        fresh.ping().await.unwrap();
        assert_eq!(db.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let db = MemoryDatabase::new().with_table("t", identity_table(&[1]));
        db.fail_operation("columns", ErrorKind::Other, 1);
        let mut store = db.connect().await.unwrap();

        assert!(store.columns("t").await.is_err());
        assert_eq!(store.columns("t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_id_rows_projection() {
        let db = MemoryDatabase::new().with_table("t", identity_table(&[0, 2]));
        let mut store = db.connect().await.unwrap();
        let columns = db.table("t").unwrap().columns;

        let rows = store.zero_id_rows("t", "id", &columns).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].to_insert_statement("t"),
            "INSERT INTO `t` (`id`, `name`) VALUES (0, 'row0');"
        );
    }
}
