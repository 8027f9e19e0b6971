//! Run outcome accumulation and the finalized run report.

use crate::models::IssueRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Why a table needed no repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No primary-key column could be identified
    NoPrimaryKey,
    /// The table was healthy
    NoIssues,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPrimaryKey => write!(f, "no primary key"),
            Self::NoIssues => write!(f, "no issues"),
        }
    }
}

/// A table whose every fix succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedTable {
    /// Table name
    pub table: String,
    /// Issues that were repaired, in repair order
    pub issues: Vec<IssueRecord>,
}

/// A table left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTable {
    /// Table name
    pub table: String,
    /// Why no repair was attempted
    pub reason: SkipReason,
}

/// A table whose analysis or repair failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableError {
    /// Table name
    pub table: String,
    /// Failure text, including the store's own error message
    pub message: String,
}

/// Finalized summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Target database name
    pub database: String,
    /// True when no mutation was issued
    pub dry_run: bool,
    /// When the report was finalized
    pub generated_at: DateTime<Utc>,
    /// Wall-clock run time in seconds
    pub duration_secs: f64,
    /// Tables the run set out to visit
    pub total_tables: usize,
    /// Tables whose every fix succeeded
    pub fixed: Vec<FixedTable>,
    /// Tables left alone, with the reason
    pub skipped: Vec<SkippedTable>,
    /// Tables whose analysis or repair failed
    pub errors: Vec<TableError>,
    /// Fixed plus errored tables
    pub issues_found: usize,
    /// Fixed share of fixed plus errored, in percent (one decimal)
    pub success_rate: f64,
    /// Reconnects performed during the run
    pub reconnects: u32,
}

impl RunReport {
    /// Tables actually visited.
    pub fn processed_tables(&self) -> usize {
        self.fixed.len() + self.skipped.len() + self.errors.len()
    }
}

/// Success rate in percent, rounded to one decimal.
///
/// ```rust
/// use pkfixer_core::report::success_rate;
///
/// assert_eq!(success_rate(2, 1), 66.7);
/// assert_eq!(success_rate(0, 0), 0.0);
/// ```
pub fn success_rate(fixed: usize, errored: usize) -> f64 {
    let denominator = (fixed + errored).max(1) as f64;
    let rate = fixed as f64 / denominator * 100.0;
    (rate * 10.0).round() / 10.0
}

/// Accumulates per-table outcomes; a table is recorded in at most one list,
/// and the last outcome recorded for it wins.
#[derive(Debug, Clone, Default)]
pub struct ReportCollector {
    fixed: Vec<FixedTable>,
    skipped: Vec<SkippedTable>,
    errors: Vec<TableError>,
    planned: BTreeSet<String>,
}

impl ReportCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tables` to the planned set; a table planned twice (e.g. by
    /// emergency recovery after a failed scan) is counted once.
    pub fn add_planned(&mut self, tables: &[String]) {
        self.planned.extend(tables.iter().cloned());
    }

    /// Records `table` as fixed with the issues that were repaired.
    pub fn record_fixed(&mut self, table: &str, issues: Vec<IssueRecord>) {
        self.forget(table);
        self.fixed.push(FixedTable {
            table: table.to_string(),
            issues,
        });
    }

    /// Records `table` as skipped.
    pub fn record_skipped(&mut self, table: &str, reason: SkipReason) {
        self.forget(table);
        self.skipped.push(SkippedTable {
            table: table.to_string(),
            reason,
        });
    }

    /// Records `table` as failed with `message`.
    pub fn record_error(&mut self, table: &str, message: impl Into<String>) {
        self.forget(table);
        self.errors.push(TableError {
            table: table.to_string(),
            message: message.into(),
        });
    }

    fn forget(&mut self, table: &str) {
        self.fixed.retain(|t| t.table != table);
        self.skipped.retain(|t| t.table != table);
        self.errors.retain(|t| t.table != table);
    }

    /// Builds the final report.
    pub fn finalize(
        &self,
        database: &str,
        dry_run: bool,
        duration_secs: f64,
        reconnects: u32,
    ) -> RunReport {
        RunReport {
            database: database.to_string(),
            dry_run,
            generated_at: Utc::now(),
            duration_secs,
            total_tables: self.planned.len(),
            fixed: self.fixed.clone(),
            skipped: self.skipped.clone(),
            errors: self.errors.clone(),
            issues_found: self.fixed.len() + self.errors.len(),
            success_rate: success_rate(self.fixed.len(), self.errors.len()),
            reconnects,
        }
    }
}
