//! Report rendering.
//!
//! Both renderers read nothing but the finalized [`RunReport`].

use askama::Template;
use pkfixer_core::RunReport;
use pkfixer_core::models::IssueRecord;
use pkfixer_core::report::{FixedTable, SkippedTable, TableError};
use std::fmt::Write as _;

/// A fixed table with its defect classes joined for display.
struct FixedRow {
    table: String,
    issues: String,
}

impl From<&FixedTable> for FixedRow {
    fn from(fixed: &FixedTable) -> Self {
        Self {
            table: fixed.table.clone(),
            issues: issue_classes(&fixed.issues),
        }
    }
}

/// HTML summary of one run.
#[derive(Template)]
#[template(path = "report.html")]
pub struct HtmlReport<'a> {
    database: &'a str,
    dry_run: bool,
    mode: &'static str,
    generated_at: String,
    duration: String,
    total_tables: usize,
    processed_tables: usize,
    fixed: Vec<FixedRow>,
    skipped: &'a [SkippedTable],
    errors: &'a [TableError],
    issues_found: usize,
    success_rate: String,
    reconnects: u32,
}

impl<'a> HtmlReport<'a> {
    /// Builds the template view of `report`.
    pub fn new(report: &'a RunReport) -> Self {
        Self {
            database: &report.database,
            dry_run: report.dry_run,
            mode: mode_label(report.dry_run),
            generated_at: report.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            duration: format!("{:.1}s", report.duration_secs),
            total_tables: report.total_tables,
            processed_tables: report.processed_tables(),
            fixed: report.fixed.iter().map(FixedRow::from).collect(),
            skipped: &report.skipped,
            errors: &report.errors,
            issues_found: report.issues_found,
            success_rate: format!("{:.1}%", report.success_rate),
            reconnects: report.reconnects,
        }
    }
}

fn mode_label(dry_run: bool) -> &'static str {
    if dry_run { "DRY RUN" } else { "LIVE" }
}

fn issue_classes(issues: &[IssueRecord]) -> String {
    issues
        .iter()
        .map(|issue| issue.class().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders the HTML report.
///
/// # Errors
/// Returns error if the template fails to render.
pub fn render_html(report: &RunReport) -> askama::Result<String> {
    HtmlReport::new(report).render()
}

/// Renders the plain-text summary printed at the end of a run.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== pkfixer report ===");
    let _ = writeln!(out, "Database:     {}", report.database);
    let _ = writeln!(out, "Mode:         {}", mode_label(report.dry_run));
    let _ = writeln!(
        out,
        "Generated:    {}",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "Duration:     {:.1}s", report.duration_secs);
    let _ = writeln!(
        out,
        "Tables:       {} of {}",
        report.processed_tables(),
        report.total_tables
    );
    let _ = writeln!(out, "Fixed:        {}", report.fixed.len());
    let _ = writeln!(out, "Skipped:      {}", report.skipped.len());
    let _ = writeln!(out, "Errors:       {}", report.errors.len());
    let _ = writeln!(out, "Issues found: {}", report.issues_found);
    let _ = writeln!(out, "Success rate: {:.1}%", report.success_rate);
    let _ = writeln!(out, "Reconnects:   {}", report.reconnects);

    if !report.fixed.is_empty() {
        let _ = writeln!(out, "\nFixed tables:");
        for fixed in &report.fixed {
            let _ = writeln!(out, "  {}: {}", fixed.table, issue_classes(&fixed.issues));
        }
    }
    if !report.errors.is_empty() {
        let _ = writeln!(out, "\nErrors:");
        for error in &report.errors {
            let _ = writeln!(out, "  {}: {}", error.table, error.message);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pkfixer_core::SkipReason;
    use pkfixer_core::models::DuplicateGroup;

    fn sample_report(dry_run: bool) -> RunReport {
        RunReport {
            database: "whmcs".to_string(),
            dry_run,
            generated_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap(),
            duration_secs: 12.34,
            total_tables: 4,
            fixed: vec![FixedTable {
                table: "tblclients".to_string(),
                issues: vec![
                    IssueRecord::ZeroIds {
                        column: "id".to_string(),
                        count: 1,
                    },
                    IssueRecord::DuplicateIds {
                        column: "id".to_string(),
                        groups: vec![DuplicateGroup {
                            value: "7".to_string(),
                            count: 2,
                        }],
                    },
                    IssueRecord::MissingAutoIncrement {
                        column: "id".to_string(),
                    },
                ],
            }],
            skipped: vec![SkippedTable {
                table: "tblactivitylog".to_string(),
                reason: SkipReason::NoPrimaryKey,
            }],
            errors: vec![TableError {
                table: "tblorders".to_string(),
                message: "zero_ids: <script>alert(1)</script>".to_string(),
            }],
            issues_found: 2,
            success_rate: 50.0,
            reconnects: 3,
        }
    }

    #[test]
    fn test_render_text_summary() {
        let text = render_text(&sample_report(false));

        assert!(text.contains("Database:     whmcs"));
        assert!(text.contains("Mode:         LIVE"));
        assert!(text.contains("Generated:    2026-03-01 12:30:00 UTC"));
        assert!(text.contains("Duration:     12.3s"));
        assert!(text.contains("Tables:       3 of 4"));
        assert!(text.contains("Success rate: 50.0%"));
        assert!(text.contains("Reconnects:   3"));
        assert!(text.contains("  tblclients: zero_ids, duplicate_ids, missing_auto_increment"));
        assert!(text.contains("  tblorders: zero_ids: <script>"));
    }

    #[test]
    fn test_render_text_omits_empty_sections() {
        let mut report = sample_report(true);
        report.fixed.clear();
        report.errors.clear();

        let text = render_text(&report);
        assert!(text.contains("Mode:         DRY RUN"));
        assert!(!text.contains("Fixed tables:"));
        assert!(!text.contains("\nErrors:\n"));
    }

    #[test]
    fn test_template_renders_report_sections() {
        let html = render_html(&sample_report(false)).unwrap();

        assert!(html.contains("<title>pkfixer report: whmcs</title>"));
        assert!(html.contains("<td>LIVE</td>"));
        assert!(html.contains("<td>3 of 4</td>"));
        assert!(html.contains("<td>50.0%</td>"));
        assert!(html.contains("zero_ids, duplicate_ids, missing_auto_increment"));
        assert!(html.contains("<td>tblactivitylog</td><td>no primary key</td>"));
        assert!(!html.contains("class=\"dry-run\""));
    }

    #[test]
    fn test_template_escapes_messages() {
        let html = render_html(&sample_report(false)).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("tblorders"));
    }

    #[test]
    fn test_template_dry_run_banner() {
        let mut report = sample_report(true);
        report.fixed.clear();

        let html = render_html(&report).unwrap();
        assert!(html.contains("class=\"dry-run\""));
        assert!(html.contains("<td>DRY RUN</td>"));
        assert!(html.contains("None."));
    }
}
