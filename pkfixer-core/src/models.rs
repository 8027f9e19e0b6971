//! Table metadata snapshots, defect records and repair outcomes.
//!
//! Everything in this module is built fresh for a single table visit and
//! dropped when the visit ends; nothing here is cached across a run.

use serde::{Deserialize, Serialize};

/// Maximum number of duplicate-value groups collected per table.
///
/// Tables with more distinct duplicated values report only the first
/// groups in ascending identity order, so counts may be an undercount.
pub const DUPLICATE_GROUP_LIMIT: usize = 50;

/// Index name MySQL reserves for the primary key.
pub const PRIMARY_INDEX_NAME: &str = "PRIMARY";

/// Column metadata as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Raw declared type, e.g. `int(11) unsigned`
    pub column_type: String,
    /// Whether NULL is allowed
    pub is_nullable: bool,
    /// Default value as text, if any
    pub default_value: Option<String>,
    /// Extra attributes, e.g. `auto_increment`
    pub extra: String,
    /// Key marker: `PRI`, `UNI`, `MUL` or empty
    pub key: String,
}

impl ColumnDescriptor {
    /// Creates a NOT NULL column with no default and no key marker.
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            is_nullable: false,
            default_value: None,
            extra: String::new(),
            key: String::new(),
        }
    }

    /// Builder method to mark the column as a primary-key participant.
    pub fn primary(mut self) -> Self {
        self.key = "PRI".to_string();
        self
    }

    /// Builder method to allow NULL values.
    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    /// Builder method to set the default value.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }

    /// Builder method to set the extra attributes.
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    /// True when the column metadata marks it as part of the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.key.eq_ignore_ascii_case("PRI")
    }

    /// True when the extra attributes contain the auto-increment marker.
    pub fn is_auto_increment(&self) -> bool {
        self.extra.to_lowercase().contains("auto_increment")
    }

    /// True for binary column types whose values must be hex-encoded.
    pub fn is_binary(&self) -> bool {
        let lower = self.column_type.to_lowercase();
        lower.contains("blob") || lower.contains("binary")
    }

    /// Clause used when adding AUTO_INCREMENT to the column.
    ///
    /// MySQL rejects a DEFAULT on an auto-increment column, so the default
    /// is dropped here.
    ///
    /// ```rust
    /// use pkfixer_core::models::ColumnDescriptor;
    ///
    /// let column = ColumnDescriptor::new("id", "int(10) unsigned").with_default("0");
    /// assert_eq!(column.auto_increment_definition(), "int(10) unsigned NOT NULL AUTO_INCREMENT");
    /// ```
    pub fn auto_increment_definition(&self) -> String {
        let mut definition = self.column_type.clone();
        if !self.is_nullable {
            definition.push_str(" NOT NULL");
        }
        definition.push_str(" AUTO_INCREMENT");
        definition
    }
}

/// One column entry of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name (`PRIMARY` for the primary key)
    pub name: String,
    /// Indexed column
    pub column_name: String,
    /// 1-based position of the column within the index
    pub sequence: u32,
    /// Whether the index enforces uniqueness
    pub is_unique: bool,
}

impl IndexDescriptor {
    /// True when this entry belongs to the explicitly flagged primary index.
    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY_INDEX_NAME
    }
}

/// Snapshot of a table's structure taken at analysis time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,
    /// Index entries
    pub indexes: Vec<IndexDescriptor>,
}

impl TableDescriptor {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One duplicated identity value and how many rows share it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Identity value, as text
    pub value: String,
    /// Number of rows holding the value (always > 1)
    pub count: u64,
}

/// The three recognized defect classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectClass {
    /// Primary key lacks the auto-increment property
    MissingAutoIncrement,
    /// Rows hold identity zero
    ZeroIds,
    /// Rows share an identity value
    DuplicateIds,
}

impl std::fmt::Display for DefectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAutoIncrement => write!(f, "missing_auto_increment"),
            Self::ZeroIds => write!(f, "zero_ids"),
            Self::DuplicateIds => write!(f, "duplicate_ids"),
        }
    }
}

/// A detected defect together with the evidence needed to fix it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IssueRecord {
    /// Primary key has no auto-increment property
    MissingAutoIncrement {
        /// Primary-key column
        column: String,
    },
    /// Rows whose identity equals zero
    ZeroIds {
        /// Primary-key column
        column: String,
        /// Number of affected rows
        count: u64,
    },
    /// Identity values held by more than one row
    DuplicateIds {
        /// Primary-key column
        column: String,
        /// Duplicate groups, capped at [`DUPLICATE_GROUP_LIMIT`]
        groups: Vec<DuplicateGroup>,
    },
}

impl IssueRecord {
    /// Defect class of this record.
    pub fn class(&self) -> DefectClass {
        match self {
            Self::MissingAutoIncrement { .. } => DefectClass::MissingAutoIncrement,
            Self::ZeroIds { .. } => DefectClass::ZeroIds,
            Self::DuplicateIds { .. } => DefectClass::DuplicateIds,
        }
    }

    /// Primary-key column the record refers to.
    pub fn column(&self) -> &str {
        match self {
            Self::MissingAutoIncrement { column }
            | Self::ZeroIds { column, .. }
            | Self::DuplicateIds { column, .. } => column,
        }
    }

    /// Human-readable summary used in log lines.
    pub fn description(&self) -> String {
        match self {
            Self::MissingAutoIncrement { column } => {
                format!("Primary key '{}' missing AUTO_INCREMENT", column)
            }
            Self::ZeroIds { column, count } => {
                format!("Found {} rows with {} = 0", count, column)
            }
            Self::DuplicateIds { groups, .. } => {
                let values: Vec<&str> = groups.iter().map(|g| g.value.as_str()).collect();
                format!("Found duplicate IDs: {}", values.join(", "))
            }
        }
    }
}

/// Result of analyzing one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAnalysis {
    /// Table name
    pub table: String,
    /// Recognized primary-key column, if any
    pub primary_key: Option<String>,
    /// Detected defects in repair order
    pub issues: Vec<IssueRecord>,
}

impl TableAnalysis {
    /// True when the table has defects to repair.
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Result of repairing one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Table name
    pub table: String,
    /// True when every attempted fix succeeded
    pub success: bool,
    /// Records whose fixes were attempted
    pub attempted: Vec<IssueRecord>,
    /// Defect classes whose fix failed, with the error text
    pub failures: Vec<(DefectClass, String)>,
}

impl RepairOutcome {
    /// Summary of failed fixes for the error list.
    pub fn failure_message(&self) -> String {
        self.failures
            .iter()
            .map(|(class, message)| format!("{}: {}", class, message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A typed value read back from a row for backup purposes.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Integer value
    Int(i64),
    /// Text value
    Text(String),
    /// Binary value
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Renders the value as a MySQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Int(v) => v.to_string(),
            Self::Text(s) => format!("'{}'", escape_sql_string(s)),
            Self::Bytes(bytes) if bytes.is_empty() => "''".to_string(),
            Self::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                format!("X'{}'", hex)
            }
        }
    }
}

/// A full row, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSnapshot {
    /// Column names
    pub columns: Vec<String>,
    /// Values, parallel to `columns`
    pub values: Vec<SqlValue>,
}

impl RowSnapshot {
    /// Renders the row as an INSERT statement for `table`.
    pub fn to_insert_statement(&self, table: &str) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_identifier(c)).collect();
        let values: Vec<String> = self.values.iter().map(SqlValue::to_sql_literal).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({});",
            quote_identifier(table),
            columns.join(", "),
            values.join(", ")
        )
    }
}

/// Quotes a MySQL identifier with backticks.
///
/// ```rust
/// use pkfixer_core::models::quote_identifier;
///
/// assert_eq!(quote_identifier("tblclients"), "`tblclients`");
/// assert_eq!(quote_identifier("odd`name"), "`odd``name`");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Escapes a string for use inside a single-quoted MySQL literal.
pub fn escape_sql_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\u{1a}' => escaped.push_str("\\Z"),
            other => escaped.push(other),
        }
    }
    escaped
}
