//! SQL text for every statement pkfixer issues.
//!
//! Identifiers are backtick-quoted; values are bound as `?` parameters
//! except where MySQL grammar requires a literal (`LIMIT`, `AUTO_INCREMENT`).

use crate::models::{ColumnDescriptor, quote_identifier};

pub(crate) const PING: &str = "SELECT 1";

pub(crate) const LIST_TABLES: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR) AS TABLE_NAME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = DATABASE()
    AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

pub(crate) const TABLE_EXISTS: &str = r#"
    SELECT COUNT(*)
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = DATABASE()
    AND TABLE_TYPE = 'BASE TABLE'
    AND TABLE_NAME = ?
"#;

// Cast to CHAR to avoid VARBINARY type issues in MySQL 8.0+
pub(crate) const COLUMNS: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS CHAR) AS COLUMN_NAME,
        CAST(COLUMN_TYPE AS CHAR) AS COLUMN_TYPE,
        CAST(IS_NULLABLE AS CHAR) AS IS_NULLABLE,
        CAST(COLUMN_DEFAULT AS CHAR) AS COLUMN_DEFAULT,
        CAST(EXTRA AS CHAR) AS EXTRA,
        CAST(COLUMN_KEY AS CHAR) AS COLUMN_KEY
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE()
    AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

pub(crate) const INDEXES: &str = r#"
    SELECT
        CAST(INDEX_NAME AS CHAR) AS INDEX_NAME,
        CAST(COLUMN_NAME AS CHAR) AS COLUMN_NAME,
        CAST(SEQ_IN_INDEX AS SIGNED) AS SEQ_IN_INDEX,
        CAST(NON_UNIQUE AS SIGNED) AS NON_UNIQUE
    FROM INFORMATION_SCHEMA.STATISTICS
    WHERE TABLE_SCHEMA = DATABASE()
    AND TABLE_NAME = ?
    ORDER BY INDEX_NAME, SEQ_IN_INDEX
"#;

pub(crate) fn count_zero_ids(table: &str, column: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {} = 0",
        quote_identifier(table),
        quote_identifier(column)
    )
}

pub(crate) fn duplicate_ids(table: &str, column: &str, limit: usize) -> String {
    let column = quote_identifier(column);
    format!(
        "SELECT CAST({column} AS CHAR) AS dup_value, COUNT(*) AS dup_count FROM {} \
         WHERE {column} > 0 GROUP BY {column} HAVING COUNT(*) > 1 ORDER BY {column} LIMIT {limit}",
        quote_identifier(table),
    )
}

pub(crate) fn count_identity(table: &str, column: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        quote_identifier(table),
        quote_identifier(column)
    )
}

/// Binary columns are read as hex so that no bytes are lost to charset
/// conversion; everything else is read as text.
pub(crate) fn zero_id_rows(table: &str, column: &str, columns: &[ColumnDescriptor]) -> String {
    let projection: Vec<String> = columns
        .iter()
        .map(|c| {
            let name = quote_identifier(&c.name);
            if c.is_binary() {
                format!("HEX({name}) AS {name}")
            } else {
                format!("CAST({name} AS CHAR) AS {name}")
            }
        })
        .collect();
    format!(
        "SELECT {} FROM {} WHERE {} = 0",
        projection.join(", "),
        quote_identifier(table),
        quote_identifier(column)
    )
}

pub(crate) fn delete_zero_ids(table: &str, column: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = 0",
        quote_identifier(table),
        quote_identifier(column)
    )
}

pub(crate) fn delete_duplicate_rows(
    table: &str,
    column: &str,
    survivor_order: &[String],
    limit: u64,
) -> String {
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_identifier(table),
        quote_identifier(column)
    );
    if !survivor_order.is_empty() {
        let order: Vec<String> = survivor_order
            .iter()
            .map(|c| format!("{} DESC", quote_identifier(c)))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }
    sql.push_str(&format!(" LIMIT {}", limit));
    sql
}

/// Negative maxima clamp to 0; the UNSIGNED cast keeps `bigint unsigned`
/// values above the signed range intact.
pub(crate) fn max_identity(table: &str, column: &str) -> String {
    format!(
        "SELECT CAST(GREATEST(MAX({}), 0) AS UNSIGNED) FROM {}",
        quote_identifier(column),
        quote_identifier(table)
    )
}

pub(crate) fn add_auto_increment(table: &str, column: &str, definition: &str) -> String {
    format!(
        "ALTER TABLE {} MODIFY {} {}",
        quote_identifier(table),
        quote_identifier(column),
        definition
    )
}

pub(crate) fn set_auto_increment(table: &str, start: u64) -> String {
    format!(
        "ALTER TABLE {} AUTO_INCREMENT = {}",
        quote_identifier(table),
        start
    )
}

/// True for statements that change data or structure.
pub(crate) fn is_mutating(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_uppercase();
    ["DELETE", "ALTER", "INSERT", "UPDATE"]
        .iter()
        .any(|keyword| head.starts_with(keyword))
}
