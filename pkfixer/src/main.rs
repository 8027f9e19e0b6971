//! Primary-key repair tool for MySQL databases.
//!
//! This binary scans every table of a database (or a configured subset),
//! detects broken identity columns, and repairs them in place:
//! zero identities are backed up and deleted, duplicate identities are
//! collapsed to one survivor, and primary keys regain `AUTO_INCREMENT`.
//!
//! # Safety Guarantees
//! - `--dry-run` issues reads only and writes no backups or HTML report
//! - Zero-identity rows are written to a SQL backup before deletion
//! - Credentials are sanitized in every log line and report

mod render;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser};
use pkfixer_core::{
    BatchOrchestrator, FixerConfig, MySqlConnector, RunMode, RunReport,
    error::redact_database_url,
    logging::{init_logging, log_file_path},
};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "pkfixer")]
#[command(about = "Detects and repairs broken primary keys on MySQL tables")]
#[command(version)]
#[command(long_about = "
pkfixer - Primary-key repair for MySQL

Scans tables for three identity-column defects and repairs them:
- Primary keys without AUTO_INCREMENT
- Rows whose identity is 0 (backed up, then deleted)
- Rows sharing an identity value (one survivor kept per value)

The run survives dropped connections: sessions are pinged, refreshed
preventively, and failed operations are retried after a reconnect.

MODES:
- default        scan and repair every table
- --quick-fix    repair the configured list of core tables
- --emergency    reconnect and repair only the critical tables

EXAMPLES:
  pkfixer --dry-run mysql://user@localhost/whmcs
  pkfixer --quick-fix --ask-password mysql://user@localhost/whmcs
  DATABASE_URL=mysql://user:pass@db/whmcs pkfixer --report-json run.json
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Database connection URL
    #[arg(
        long,
        env = "DATABASE_URL",
        help = "MySQL connection string (credentials will be sanitized in logs)"
    )]
    pub database_url: Option<String>,

    /// Positional form of the connection URL
    #[arg(value_name = "DATABASE_URL")]
    pub url: Option<String>,

    /// Prompt for the database password
    #[arg(long, help = "Prompt for the database password instead of embedding it in the URL")]
    pub ask_password: bool,

    /// JSON configuration file
    #[arg(long, help = "Load run options from a JSON file (flags override it)")]
    pub config: Option<PathBuf>,

    /// Quick-fix mode
    #[arg(long, conflicts_with = "emergency", help = "Repair only the configured core tables")]
    pub quick_fix: bool,

    /// Emergency mode
    #[arg(long, help = "Force a reconnect and repair only the critical tables")]
    pub emergency: bool,

    /// Dry run
    #[arg(long, help = "Detect only; never modify the database")]
    pub dry_run: bool,

    /// Disable backups
    #[arg(long, help = "Do not back up zero-id rows before deleting them")]
    pub no_backup: bool,

    /// Disable the log file
    #[arg(long, help = "Do not write a timestamped log file")]
    pub no_log: bool,

    /// Tables per batch
    #[arg(long, help = "Number of tables processed per batch")]
    pub batch_size: Option<usize>,

    /// Attempts per operation
    #[arg(long, help = "Attempts per database operation before giving up")]
    pub max_retries: Option<u32>,

    /// HTML report path
    #[arg(long, help = "HTML report destination (live runs only)")]
    pub report: Option<PathBuf>,

    /// JSON report path
    #[arg(long, help = "Also write the run report as JSON")]
    pub report_json: Option<PathBuf>,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(
        short,
        long,
        visible_alias = "silent",
        help = "Suppress all console output except errors (the log file is unaffected)"
    )]
    pub quiet: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.emergency {
            RunMode::Emergency
        } else if self.quick_fix {
            RunMode::QuickFix
        } else {
            RunMode::Scan
        }
    }

    fn connection_url(&self) -> Option<&str> {
        self.url.as_deref().or(self.database_url.as_deref())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let log_file = if config.log_enabled {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        Some(log_file_path(&config.log_dir))
    } else {
        None
    };
    init_logging(cli.global.verbose, !config.verbose, log_file.as_deref())?;

    let Some(url) = cli.connection_url() else {
        eprintln!("Error: Database URL is required");
        eprintln!("Use --help for usage information");
        std::process::exit(1);
    };
    let url = if cli.ask_password {
        with_password(url, &prompt_password()?)?
    } else {
        url.to_string()
    };

    run(&cli, config, &url).await
}

/// Loads the JSON configuration (or defaults) and applies CLI overrides.
///
/// `--quiet` clears `verbose`; the console is quiet whenever `verbose` is
/// false, whether it came from the flag or the configuration file.
fn build_config(cli: &Cli) -> Result<FixerConfig> {
    let mut config = match &cli.config {
        Some(path) => FixerConfig::from_json_file(path)?,
        None => FixerConfig::default(),
    };

    if cli.dry_run {
        config.dry_run = true;
    }
    if cli.no_backup {
        config.backup_enabled = false;
    }
    if cli.no_log {
        config.log_enabled = false;
    }
    if cli.global.quiet {
        config.verbose = false;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(report) = &cli.report {
        config.report_path = report.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Returns `url` with its password replaced by `password`.
fn with_password(url: &str, password: &str) -> Result<String> {
    let mut parsed = url::Url::parse(url)
        .map_err(|_| anyhow!("Invalid database URL: {}", redact_database_url(url)))?;
    parsed
        .set_password(Some(password))
        .map_err(|()| anyhow!("Cannot set a password on {}", redact_database_url(url)))?;
    Ok(parsed.to_string())
}

fn prompt_password() -> Result<String> {
    use std::io::{self, Write};

    print!("Enter database password: ");
    io::stdout()
        .flush()
        .context("Failed to flush stdout before reading password")?;
    let password = rpassword::read_password().context("Failed to read password")?;
    if password.is_empty() {
        return Err(anyhow!("Password cannot be empty"));
    }
    Ok(password)
}

/// Runs the requested mode, falling back to emergency recovery when the
/// run dies, then writes the reports.
async fn run(cli: &Cli, config: FixerConfig, url: &str) -> Result<()> {
    let mode = cli.mode();
    info!("Starting pkfixer ({:?})", mode);
    info!("Target: {}", redact_database_url(url));
    if config.dry_run {
        info!("Dry run: no changes will be made");
    }

    let mut connector =
        MySqlConnector::new(url)?.with_connect_timeout(config.connection_timeout());
    if let Some(charset) = &config.charset {
        connector = connector.with_charset(charset);
    }
    let database = connector
        .config()
        .database
        .clone()
        .ok_or_else(|| anyhow!("Database name missing from {}", redact_database_url(url)))?;

    let outputs = ReportOutputs {
        dry_run: config.dry_run,
        html: config.report_path.clone(),
        json: cli.report_json.clone(),
    };
    let mut orchestrator = BatchOrchestrator::new(Box::new(connector), config, database);
    run_orchestrator(&mut orchestrator, mode, &outputs).await
}

/// Where the end-of-run reports go.
struct ReportOutputs {
    dry_run: bool,
    html: PathBuf,
    json: Option<PathBuf>,
}

/// Executes `mode` (with emergency fallback), then renders and writes the
/// reports. Reports are written even when the run failed fatally; the
/// fatal error is returned afterwards.
async fn run_orchestrator(
    orchestrator: &mut BatchOrchestrator,
    mode: RunMode,
    outputs: &ReportOutputs,
) -> Result<()> {
    let outcome = orchestrator.execute_with_recovery(mode).await;
    if let Err(e) = &outcome {
        eprintln!("pkfixer terminated: {}", e);
    }

    let report = orchestrator.finish();
    for line in render::render_text(&report).lines() {
        info!("{}", line);
    }

    if outputs.dry_run {
        info!("Dry run: HTML report not written");
    } else {
        write_html_report(&report, &outputs.html).await?;
    }
    if let Some(path) = &outputs.json {
        write_json_report(&report, path).await?;
    }

    outcome.map_err(Into::into)
}

async fn write_html_report(report: &RunReport, path: &Path) -> Result<()> {
    let html = render::render_html(report).context("Failed to render HTML report")?;
    tokio::fs::write(path, html)
        .await
        .with_context(|| format!("Failed to write HTML report to {}", path.display()))?;
    info!("✓ HTML report saved to {}", path.display());
    Ok(())
}

async fn write_json_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write JSON report to {}", path.display()))?;
    info!("✓ JSON report saved to {}", path.display());
    Ok(())
}
