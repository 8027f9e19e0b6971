//! Defect detection for a single table.
//!
//! The zero and duplicate checks fail open: a query error is logged as a
//! warning and reported as "no defect" so that one unreadable table
//! never blocks the rest of a run. Metadata reads do not fail open.

use crate::Result;
use crate::connection::ConnectionManager;
use crate::models::{DUPLICATE_GROUP_LIMIT, DuplicateGroup, IssueRecord, TableAnalysis};
use crate::schema::SchemaInspector;
use crate::store::Store;

/// Finds the three defect classes in a table.
#[derive(Debug, Clone, Copy)]
pub struct IssueDetector {
    inspector: SchemaInspector,
    max_retries: u32,
}

impl IssueDetector {
    /// Creates a detector whose store reads retry up to `max_retries`
    /// attempts.
    pub fn new(max_retries: u32) -> Self {
        Self {
            inspector: SchemaInspector::new(max_retries),
            max_retries,
        }
    }

    /// True iff `column` carries the auto-increment attribute.
    ///
    /// # Errors
    /// Returns error if the column metadata cannot be read.
    pub async fn has_auto_increment(
        &self,
        conn: &mut ConnectionManager,
        table: &str,
        column: &str,
    ) -> Result<bool> {
        let columns = self.inspector.get_columns(conn, table).await?;
        Ok(columns
            .iter()
            .any(|c| c.name == column && c.is_auto_increment()))
    }

    /// Number of rows whose identity is zero; 0 if the query fails.
    pub async fn count_zero_ids(&self, conn: &mut ConnectionManager, table: &str, column: &str) -> u64 {
        match conn
            .execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
                store.count_zero_ids(table, column).await
            })
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Could not count zero ids in {}: {}", table, e);
                0
            }
        }
    }

    /// Identity values above zero held by several rows, ascending and
    /// capped at [`DUPLICATE_GROUP_LIMIT`]; empty if the query fails.
    pub async fn find_duplicate_ids(
        &self,
        conn: &mut ConnectionManager,
        table: &str,
        column: &str,
    ) -> Vec<DuplicateGroup> {
        let groups = match conn
            .execute_with_retry(self.max_retries, async |store: &mut dyn Store| {
                store.duplicate_ids(table, column, DUPLICATE_GROUP_LIMIT).await
            })
            .await
        {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!("Could not check duplicate ids in {}: {}", table, e);
                return Vec::new();
            }
        };

        if groups.len() >= DUPLICATE_GROUP_LIMIT {
            tracing::warn!(
                "{} has at least {} duplicated id values; only the first {} are handled this run",
                table,
                DUPLICATE_GROUP_LIMIT,
                DUPLICATE_GROUP_LIMIT
            );
        }
        groups
    }

    /// Describes the table, derives its primary key and collects issues in
    /// repair order: zero ids, duplicate ids, missing auto-increment.
    ///
    /// # Errors
    /// Returns error if the table metadata cannot be read.
    pub async fn analyze_table(&self, conn: &mut ConnectionManager, table: &str) -> Result<TableAnalysis> {
        let descriptor = self.inspector.describe(conn, table).await?;

        let Some(primary_key) =
            SchemaInspector::find_primary_key(&descriptor.columns, &descriptor.indexes)
        else {
            tracing::debug!("{} has no primary key", table);
            return Ok(TableAnalysis {
                table: table.to_string(),
                primary_key: None,
                issues: Vec::new(),
            });
        };

        let mut issues = Vec::new();

        let zero_count = self.count_zero_ids(conn, table, &primary_key).await;
        if zero_count > 0 {
            issues.push(IssueRecord::ZeroIds {
                column: primary_key.clone(),
                count: zero_count,
            });
        }

        let groups = self.find_duplicate_ids(conn, table, &primary_key).await;
        if !groups.is_empty() {
            issues.push(IssueRecord::DuplicateIds {
                column: primary_key.clone(),
                groups,
            });
        }

        let auto_increment = descriptor
            .column(&primary_key)
            .is_some_and(|c| c.is_auto_increment());
        if !auto_increment {
            issues.push(IssueRecord::MissingAutoIncrement {
                column: primary_key.clone(),
            });
        }

        for issue in &issues {
            tracing::info!("{}: {}", table, issue.description());
        }

        Ok(TableAnalysis {
            table: table.to_string(),
            primary_key: Some(primary_key),
            issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixerConfig;
    use crate::error::ErrorKind;
    use crate::models::{ColumnDescriptor, DefectClass, SqlValue};
    use crate::store::memory::{MemoryDatabase, MemoryTable};

    fn table_with_ids(ids: &[i64], auto_increment: bool) -> MemoryTable {
        let mut id = ColumnDescriptor::new("id", "int(11)").primary();
        if auto_increment {
            id = id.with_extra("auto_increment");
        }
        let mut table = MemoryTable::new(vec![id, ColumnDescriptor::new("name", "varchar(20)")])
            .with_primary_index("id");
        for value in ids {
            table = table.with_row(vec![SqlValue::Int(*value), SqlValue::Text("x".to_string())]);
        }
        table
    }

    fn setup(db: &MemoryDatabase) -> (ConnectionManager, IssueDetector) {
        (
            ConnectionManager::new(Box::new(db.clone()), &FixerConfig::default()),
            IssueDetector::new(3),
        )
    }

    #[tokio::test]
    async fn test_checks_on_mixed_identities() {
        let db = MemoryDatabase::new().with_table("t", table_with_ids(&[0, 0, 5, 5, 7], true));
        let (mut conn, detector) = setup(&db);

        assert_eq!(detector.count_zero_ids(&mut conn, "t", "id").await, 2);
        assert_eq!(
            detector.find_duplicate_ids(&mut conn, "t", "id").await,
            vec![DuplicateGroup {
                value: "5".to_string(),
                count: 2
            }]
        );
        assert!(detector.has_auto_increment(&mut conn, "t", "id").await.unwrap());
    }

    #[tokio::test]
    async fn test_analysis_orders_issues_for_repair() {
        let db = MemoryDatabase::new().with_table("t", table_with_ids(&[0, 1, 1, 3], false));
        let (mut conn, detector) = setup(&db);

        let analysis = detector.analyze_table(&mut conn, "t").await.unwrap();
        let classes: Vec<DefectClass> = analysis.issues.iter().map(IssueRecord::class).collect();
        assert_eq!(
            classes,
            vec![
                DefectClass::ZeroIds,
                DefectClass::DuplicateIds,
                DefectClass::MissingAutoIncrement
            ]
        );
        assert_eq!(analysis.primary_key.as_deref(), Some("id"));
    }

    #[tokio::test]
    async fn test_table_without_primary_key_has_no_issues() {
        let table = MemoryTable::new(vec![ColumnDescriptor::new("id", "int(11)")])
            .with_row(vec![SqlValue::Int(0)])
            .with_row(vec![SqlValue::Int(0)]);
        let db = MemoryDatabase::new().with_table("log", table);
        let (mut conn, detector) = setup(&db);

        let analysis = detector.analyze_table(&mut conn, "log").await.unwrap();
        assert_eq!(analysis.primary_key, None);
        assert!(!analysis.has_issues());
    }

    #[tokio::test]
    async fn test_healthy_table_has_no_issues() {
        let db = MemoryDatabase::new().with_table("t", table_with_ids(&[1, 2, 3], true));
        let (mut conn, detector) = setup(&db);

        let analysis = detector.analyze_table(&mut conn, "t").await.unwrap();
        assert!(analysis.primary_key.is_some());
        assert!(!analysis.has_issues());
    }

    #[tokio::test]
    async fn test_checks_fail_open() {
        let db = MemoryDatabase::new().with_table("t", table_with_ids(&[0, 4, 4], true));
        db.fail_operation("count_zero_ids", ErrorKind::Other, 1);
        db.fail_operation("duplicate_ids", ErrorKind::Other, 1);
        let (mut conn, detector) = setup(&db);

        let analysis = detector.analyze_table(&mut conn, "t").await.unwrap();
        assert!(!analysis.has_issues());
    }

    #[tokio::test]
    async fn test_metadata_failure_propagates() {
        let db = MemoryDatabase::new().with_table("t", table_with_ids(&[1], true));
        db.fail_operation("indexes", ErrorKind::Other, 1);
        let (mut conn, detector) = setup(&db);

        assert!(detector.analyze_table(&mut conn, "t").await.is_err());
    }
}
