//! Run orchestration: batching, pacing, and the three run modes.
//!
//! Tables are processed strictly one at a time over a single session.
//! Each table is analyzed, repaired if needed, and recorded in the run's
//! [`ReportCollector`]; a failure on one table never stops the run.

use crate::Result;
use crate::config::FixerConfig;
use crate::connection::ConnectionManager;
use crate::detector::IssueDetector;
use crate::error::FixerError;
use crate::remediator::Remediator;
use crate::report::{ReportCollector, RunReport, SkipReason};
use crate::store::{Connector, Store};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::Instrument;

/// Where the orchestrator is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Created, nothing run yet
    Idle,
    /// Listing the tables to visit
    Scanning,
    /// Reading metadata and checking one table for defects
    Analyzing,
    /// Applying fixes to one table
    Fixing,
    /// Finalizing the run report
    Reporting,
    /// Report finalized
    Done,
    /// Repairing critical tables after a forced reconnect
    EmergencyRecovery,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Analyzing => "analyzing",
            Self::Fixing => "fixing",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::EmergencyRecovery => "emergency recovery",
        };
        f.write_str(name)
    }
}

/// Which tables a run visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every base table
    Scan,
    /// The configured quick-fix list
    QuickFix,
    /// The configured critical list, after a forced reconnect
    Emergency,
}

/// State scoped to one run.
#[derive(Debug)]
pub struct RunContext {
    /// Run options
    pub config: FixerConfig,
    /// Database being repaired, for the report
    pub database: String,
    /// Outcome accumulator
    pub report: ReportCollector,
    phase: Phase,
    started: Instant,
}

impl RunContext {
    /// Starts a run context now.
    pub fn new(config: FixerConfig, database: impl Into<String>) -> Self {
        Self {
            config,
            database: database.into(),
            report: ReportCollector::new(),
            phase: Phase::Idle,
            started: Instant::now(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!("Phase: {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }
}

/// Completion percentage, one decimal.
///
/// ```rust
/// use pkfixer_core::orchestrator::progress_percent;
///
/// assert_eq!(progress_percent(1, 3), 33.3);
/// assert_eq!(progress_percent(0, 0), 100.0);
/// ```
pub fn progress_percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let percent = processed as f64 / total as f64 * 100.0;
    (percent * 10.0).round() / 10.0
}

/// Drives a whole run.
#[derive(Debug)]
pub struct BatchOrchestrator {
    conn: ConnectionManager,
    detector: IssueDetector,
    remediator: Remediator,
    context: RunContext,
}

impl BatchOrchestrator {
    /// Creates an orchestrator for `database` over `connector`.
    pub fn new(connector: Box<dyn Connector>, config: FixerConfig, database: impl Into<String>) -> Self {
        Self {
            conn: ConnectionManager::new(connector, &config),
            detector: IssueDetector::new(config.max_retries),
            remediator: Remediator::new(&config),
            context: RunContext::new(config, database),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.context.phase()
    }

    /// Run-scoped state.
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Runs `mode` under the configured execution-time ceiling.
    ///
    /// # Errors
    /// Returns [`FixerError::ExecutionTimeExceeded`] when the ceiling is
    /// hit, or the fatal error that ended the run.
    pub async fn execute(&mut self, mode: RunMode) -> Result<()> {
        let ceiling = self.context.config.max_execution_time();
        let work = async {
            match mode {
                RunMode::Scan => self.run().await,
                RunMode::QuickFix => self.quick_fix().await,
                RunMode::Emergency => self.emergency_recovery().await.map(|_| ()),
            }
        };

        match ceiling {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| FixerError::ExecutionTimeExceeded {
                    seconds: limit.as_secs(),
                })?,
            None => work.await,
        }
    }

    /// Runs `mode`; if it fails fatally outside emergency mode, runs
    /// emergency recovery before returning the fatal error.
    ///
    /// # Errors
    /// Returns the error that ended `mode`, even when recovery succeeds.
    pub async fn execute_with_recovery(&mut self, mode: RunMode) -> Result<()> {
        let Err(fatal) = self.execute(mode).await else {
            return Ok(());
        };
        tracing::error!("Fatal error: {}", fatal);

        if mode != RunMode::Emergency {
            match self.emergency_recovery().await {
                Ok(fixed) => tracing::warn!("Emergency recovery fixed {} tables", fixed),
                Err(e) => tracing::error!("Emergency recovery failed: {}", e),
            }
        }
        Err(fatal)
    }

    /// Scans and repairs every base table.
    ///
    /// # Errors
    /// Returns error if the table list cannot be read.
    pub async fn run(&mut self) -> Result<()> {
        self.context.enter(Phase::Scanning);
        tracing::info!("Scanning {}", self.conn.describe());

        let tables = self
            .conn
            .execute_with_retry(self.context.config.max_retries, async |store: &mut dyn Store| {
                store.list_tables().await
            })
            .await?;
        tracing::info!("Found {} tables", tables.len());

        self.process_tables(&tables).await;
        Ok(())
    }

    /// Repairs the quick-fix tables that exist.
    ///
    /// # Errors
    /// Returns error if the session cannot be established.
    pub async fn quick_fix(&mut self) -> Result<()> {
        self.context.enter(Phase::Scanning);
        let candidates = self.context.config.quick_fix_tables.clone();
        let tables = self.existing_tables(&candidates).await?;
        tracing::info!(
            "Quick fix: {} of {} listed tables exist",
            tables.len(),
            candidates.len()
        );

        self.process_tables(&tables).await;
        Ok(())
    }

    /// Forces a reconnect and repairs the critical tables that exist.
    /// Returns the number of tables fixed.
    ///
    /// # Errors
    /// Returns error if the reconnect fails.
    pub async fn emergency_recovery(&mut self) -> Result<usize> {
        self.context.enter(Phase::EmergencyRecovery);
        tracing::warn!("Starting emergency recovery");
        self.conn.reconnect().await?;

        let candidates = self.context.config.critical_tables.clone();
        let tables = self.existing_tables(&candidates).await?;
        self.context.report.add_planned(&tables);

        let mut fixed = 0;
        for table in &tables {
            let span = tracing::info_span!("table", name = %table);
            if self.process_table(table).instrument(span).await {
                fixed += 1;
            }
            self.context.enter(Phase::EmergencyRecovery);
        }

        tracing::info!("Emergency recovery fixed {} of {} critical tables", fixed, tables.len());
        Ok(fixed)
    }

    /// Finalizes the run report.
    pub fn finish(&mut self) -> RunReport {
        self.context.enter(Phase::Reporting);
        let report = self.context.report.finalize(
            &self.context.database,
            self.context.config.dry_run,
            self.context.started.elapsed().as_secs_f64(),
            self.conn.reconnect_count(),
        );
        self.context.enter(Phase::Done);
        report
    }

    async fn existing_tables(&mut self, candidates: &[String]) -> Result<Vec<String>> {
        self.conn.ensure_connection().await?;

        let mut tables = Vec::new();
        for table in candidates {
            match self
                .conn
                .execute_with_retry(self.context.config.max_retries, async |store: &mut dyn Store| {
                    store.table_exists(table).await
                })
                .await
            {
                Ok(true) => tables.push(table.clone()),
                Ok(false) => tracing::debug!("{} does not exist", table),
                Err(e) => tracing::warn!("Could not check whether {} exists: {}", table, e),
            }
        }
        Ok(tables)
    }

    async fn process_tables(&mut self, tables: &[String]) {
        let batch_size = self.context.config.batch_size.max(1);
        let total = tables.len();
        let batches = total.div_ceil(batch_size);
        self.context.report.add_planned(tables);

        let mut processed = 0;
        for (index, batch) in tables.chunks(batch_size).enumerate() {
            tracing::info!("Batch {}/{} ({} tables)", index + 1, batches, batch.len());

            for table in batch {
                let span = tracing::info_span!("table", name = %table);
                self.process_table(table).instrument(span).await;
                processed += 1;
                tracing::info!(
                    "Progress: {}/{} tables ({:.1}%)",
                    processed,
                    total,
                    progress_percent(processed, total)
                );
                tokio::time::sleep(self.context.config.table_delay()).await;
            }

            if index + 1 < batches {
                tokio::time::sleep(self.context.config.batch_delay()).await;
            }
        }
    }

    /// Analyzes and repairs one table; returns true if it was fixed.
    async fn process_table(&mut self, table: &str) -> bool {
        self.context.enter(Phase::Analyzing);
        let analysis = match self.detector.analyze_table(&mut self.conn, table).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::error!("Analysis of {} failed: {}", table, e);
                self.context.report.record_error(table, e.to_string());
                return false;
            }
        };

        if analysis.primary_key.is_none() {
            tracing::info!("Skipping {}: no primary key", table);
            self.context.report.record_skipped(table, SkipReason::NoPrimaryKey);
            return false;
        }
        if !analysis.has_issues() {
            tracing::debug!("{} is healthy", table);
            self.context.report.record_skipped(table, SkipReason::NoIssues);
            return false;
        }

        self.context.enter(Phase::Fixing);
        let outcome = self.remediator.repair_table(&mut self.conn, &analysis).await;
        if outcome.success {
            tracing::info!("Fixed {} ({} issues)", table, outcome.attempted.len());
            self.context.report.record_fixed(table, outcome.attempted);
            true
        } else {
            self.context
                .report
                .record_error(table, outcome.failure_message());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDescriptor, SqlValue};
    use crate::store::memory::{MemoryDatabase, MemoryTable};
    use std::time::Duration;

    fn table(ids: &[i64], auto_increment: bool) -> MemoryTable {
        let mut id = ColumnDescriptor::new("id", "int(11)").primary();
        if auto_increment {
            id = id.with_extra("auto_increment");
        }
        let mut table = MemoryTable::new(vec![id]).with_primary_index("id");
        for value in ids {
            table = table.with_row(vec![SqlValue::Int(*value)]);
        }
        table
    }

    fn quiet_config() -> FixerConfig {
        FixerConfig::default().with_backup(false, ".")
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(2, 3), 66.7);
        assert_eq!(progress_percent(5, 5), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_tables_and_batches() {
        let db = MemoryDatabase::new()
            .with_table("a", table(&[1], true))
            .with_table("b", table(&[1], true))
            .with_table("c", table(&[1], true));
        let config = quiet_config().with_batch_size(2);
        let mut orchestrator = BatchOrchestrator::new(Box::new(db), config, "whmcs");

        let started = Instant::now();
        orchestrator.run().await.unwrap();

        // three table delays plus one batch delay
        assert_eq!(started.elapsed(), Duration::from_millis(3 * 200 + 2000));
        let report = orchestrator.finish();
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(orchestrator.phase(), Phase::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_records_every_outcome() {
        let no_pk = MemoryTable::new(vec![ColumnDescriptor::new("id", "int(11)")]);
        let db = MemoryDatabase::new()
            .with_table("broken", table(&[0, 2, 2], false))
            .with_table("healthy", table(&[1, 2], true))
            .with_table("nopk", no_pk);
        let mut orchestrator = BatchOrchestrator::new(Box::new(db), quiet_config(), "whmcs");

        orchestrator.run().await.unwrap();
        let report = orchestrator.finish();

        assert_eq!(report.total_tables, 3);
        assert_eq!(report.fixed.len(), 1);
        assert_eq!(report.fixed[0].table, "broken");
        assert_eq!(report.fixed[0].issues.len(), 3);
        let skipped: Vec<(&str, SkipReason)> = report
            .skipped
            .iter()
            .map(|s| (s.table.as_str(), s.reason))
            .collect();
        assert_eq!(
            skipped,
            vec![("healthy", SkipReason::NoIssues), ("nopk", SkipReason::NoPrimaryKey)]
        );
        assert_eq!(report.success_rate, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_failure_is_recorded_and_run_continues() {
        let db = MemoryDatabase::new()
            .with_table("a", table(&[1], true))
            .with_table("b", table(&[0], true));
        db.fail_operation("columns", crate::error::ErrorKind::Other, 1);
        let mut orchestrator = BatchOrchestrator::new(Box::new(db), quiet_config(), "whmcs");

        orchestrator.run().await.unwrap();
        let report = orchestrator.finish();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].table, "a");
        assert_eq!(report.fixed.len(), 1);
        assert_eq!(report.success_rate, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_fix_only_visits_listed_tables() {
        let db = MemoryDatabase::new()
            .with_table("tblclients", table(&[0, 1], true))
            .with_table("custom_table", table(&[0, 1], true));
        let mut orchestrator = BatchOrchestrator::new(Box::new(db.clone()), quiet_config(), "whmcs");

        orchestrator.execute(RunMode::QuickFix).await.unwrap();
        let report = orchestrator.finish();

        assert_eq!(report.total_tables, 1);
        assert_eq!(report.fixed[0].table, "tblclients");
        assert_eq!(db.table("custom_table").unwrap().rows.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_recovery_reconnects_and_fixes_critical_tables() {
        let db = MemoryDatabase::new()
            .with_table("tblclients", table(&[0, 1], true))
            .with_table("tblorders", table(&[1, 1], true))
            .with_table("tbldomains", table(&[0], true));
        let mut orchestrator = BatchOrchestrator::new(Box::new(db.clone()), quiet_config(), "whmcs");

        let fixed = orchestrator.emergency_recovery().await.unwrap();

        assert_eq!(fixed, 2);
        assert_eq!(db.connect_count(), 1);
        assert_eq!(db.table("tbldomains").unwrap().rows.len(), 1);
        assert_eq!(orchestrator.phase(), Phase::EmergencyRecovery);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_ceiling() {
        let db = MemoryDatabase::new()
            .with_table("a", table(&[1], true))
            .with_table("b", table(&[1], true));
        let config = FixerConfig {
            max_execution_time_secs: 1,
            table_delay_ms: 5_000,
            ..quiet_config()
        };
        let mut orchestrator = BatchOrchestrator::new(Box::new(db), config, "whmcs");

        let err = orchestrator.execute(RunMode::Scan).await.unwrap_err();
        assert!(matches!(err, FixerError::ExecutionTimeExceeded { seconds: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_scan_falls_back_to_emergency_recovery() {
        let db = MemoryDatabase::new()
            .with_table("tblclients", table(&[0, 1], true))
            .with_table("tblorders", table(&[1], false))
            .with_table("custom_table", table(&[0, 1], true));
        db.fail_operation("list_tables", crate::error::ErrorKind::Other, 1);
        let mut orchestrator = BatchOrchestrator::new(Box::new(db.clone()), quiet_config(), "whmcs");

        let err = orchestrator.execute_with_recovery(RunMode::Scan).await.unwrap_err();
        assert!(matches!(err, FixerError::Store { .. }));
        assert!(err.to_string().contains("injected list_tables failure"));

        let report = orchestrator.finish();
        let fixed: Vec<&str> = report.fixed.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(fixed, vec!["tblclients", "tblorders"]);
        assert_eq!(report.total_tables, 2);
        assert_eq!(db.table("tblclients").unwrap().rows.len(), 1);
        assert_eq!(db.table("custom_table").unwrap().rows.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_emergency_mode_is_not_recovered_twice() {
        let db = MemoryDatabase::new().with_table("tblclients", table(&[0, 1], true));
        db.fail_connects(1);
        let mut orchestrator = BatchOrchestrator::new(Box::new(db.clone()), quiet_config(), "whmcs");

        let err = orchestrator
            .execute_with_recovery(RunMode::Emergency)
            .await
            .unwrap_err();

        assert!(matches!(err, FixerError::Connection { .. }));
        assert_eq!(db.connect_count(), 0);
        assert_eq!(db.table("tblclients").unwrap().rows.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run_skips_recovery() {
        let db = MemoryDatabase::new().with_table("custom_table", table(&[0, 1], true));
        let mut orchestrator = BatchOrchestrator::new(Box::new(db.clone()), quiet_config(), "whmcs");

        orchestrator.execute_with_recovery(RunMode::Scan).await.unwrap();

        let report = orchestrator.finish();
        assert_eq!(report.fixed.len(), 1);
        assert_eq!(report.reconnects, 0);
        assert_eq!(db.connect_count(), 1);
    }
}
