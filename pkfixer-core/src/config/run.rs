//! Run options for a repair pass.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known business tables visited by the quick-fix mode.
pub const QUICK_FIX_TABLES: &[&str] = &[
    "tblclients",
    "tblorders",
    "tblhostingaccounts",
    "tbldomains",
    "tblinvoices",
    "tblinvoiceitems",
    "tbltickets",
    "tblticketreplies",
    "tblproducts",
    "tblproductgroups",
    "tblhosting",
    "tblaccounts",
    "tbladmins",
    "tblaffiliates",
    "tblaffiliatespayments",
    "tblannouncements",
    "tblbannedips",
    "tblconfiguration",
    "tblcurrencies",
    "tblcustomfields",
    "tblcustomfieldsvalues",
    "tblemails",
    "tblemailtemplates",
    "tblgateways",
    "tblknowledgebase",
    "tbllinks",
    "tblnetworkissues",
    "tblpaymentgateways",
    "tblpricing",
    "tblquotes",
    "tblservers",
    "tblservices",
    "tblsupportdepartments",
    "tbltax",
    "tbltodolist",
    "tbltransactions",
    "tblusers",
    "tblactivitylog",
];

/// The minimal set repaired by emergency recovery.
pub const CRITICAL_TABLES: &[&str] = &[
    "tblclients",
    "tblinvoices",
    "tblorders",
    "tbltickets",
    "tblusers",
];

/// Options controlling one run.
///
/// Every field has a default, so a JSON file only needs the options it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixerConfig {
    /// Detect only; never issue DELETE, ALTER or INSERT
    pub dry_run: bool,
    /// Echo status lines to the console
    pub verbose: bool,
    /// Write zero-identity rows to a backup file before deleting them
    pub backup_enabled: bool,
    /// Directory receiving backup files
    pub backup_dir: PathBuf,
    /// Write a timestamped log file
    pub log_enabled: bool,
    /// Directory receiving the log file
    pub log_dir: PathBuf,
    /// Largest tolerated identity gap (advisory, not enforced)
    pub max_id_gap: u64,
    /// Tables per batch
    pub batch_size: usize,
    /// Session character set; overrides the URL's `charset` parameter
    /// (which defaults to `utf8mb4`) when set
    pub charset: Option<String>,
    /// Upper bound for establishing one connection, in seconds
    pub connection_timeout_secs: u64,
    /// Attempts per store operation
    pub max_retries: u32,
    /// Wait before retrying after a connectivity failure, in seconds
    pub retry_delay_secs: u64,
    /// Reconnect preventively once a connection is this old, in seconds
    pub reconnect_interval_secs: u64,
    /// Ceiling for the whole run, in seconds (0 disables it)
    pub max_execution_time_secs: u64,
    /// Advisory memory ceiling, e.g. `512M`
    pub memory_limit: String,
    /// Pause after each table, in milliseconds
    pub table_delay_ms: u64,
    /// Pause between batches, in milliseconds
    pub batch_delay_ms: u64,
    /// Tables visited by the quick-fix mode
    pub quick_fix_tables: Vec<String>,
    /// Tables visited by emergency recovery
    pub critical_tables: Vec<String>,
    /// HTML report destination
    pub report_path: PathBuf,
}

impl Default for FixerConfig {
    fn default() -> Self {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        Self {
            dry_run: false,
            verbose: true,
            backup_enabled: true,
            backup_dir: PathBuf::from(format!("db_backups_{}", stamp)),
            log_enabled: true,
            log_dir: PathBuf::from("."),
            max_id_gap: 1_000_000,
            batch_size: 5,
            charset: None,
            connection_timeout_secs: 3600,
            max_retries: 3,
            retry_delay_secs: 2,
            reconnect_interval_secs: 300,
            max_execution_time_secs: 7200,
            memory_limit: "512M".to_string(),
            table_delay_ms: 200,
            batch_delay_ms: 2000,
            quick_fix_tables: QUICK_FIX_TABLES.iter().map(|t| t.to_string()).collect(),
            critical_tables: CRITICAL_TABLES.iter().map(|t| t.to_string()).collect(),
            report_path: PathBuf::from("pkfixer_report.html"),
        }
    }
}

impl FixerConfig {
    /// Loads options from a JSON file; missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_json_file(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| crate::error::FixerError::Io {
            context: format!("Failed to read configuration file {}", path.display()),
            source: e,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| crate::error::FixerError::Serialization {
                context: format!("Failed to parse configuration file {}", path.display()),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates option values.
    ///
    /// # Errors
    /// Returns error if a value would make the run impossible.
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::error::FixerError::configuration(
                "batch_size must be greater than 0",
            ));
        }
        if self.max_retries == 0 {
            return Err(crate::error::FixerError::configuration(
                "max_retries must be greater than 0",
            ));
        }
        if self.charset.as_deref().is_some_and(str::is_empty) {
            return Err(crate::error::FixerError::configuration(
                "charset cannot be empty",
            ));
        }
        if self.connection_timeout_secs == 0 {
            return Err(crate::error::FixerError::configuration(
                "connection_timeout_secs must be greater than 0",
            ));
        }
        parse_memory_limit(&self.memory_limit)?;
        Ok(())
    }

    /// Builder method to toggle dry-run.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builder method to toggle backups.
    pub fn with_backup(mut self, enabled: bool, dir: impl Into<PathBuf>) -> Self {
        self.backup_enabled = enabled;
        self.backup_dir = dir.into();
        self
    }

    /// Builder method to set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder method to set the retry budget and delay.
    pub fn with_retries(mut self, max_retries: u32, retry_delay_secs: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_secs = retry_delay_secs;
        self
    }

    /// Connect timeout as a duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Retry back-off as a duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Preventive reconnect interval as a duration.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Run ceiling, if any.
    pub fn max_execution_time(&self) -> Option<Duration> {
        (self.max_execution_time_secs > 0)
            .then(|| Duration::from_secs(self.max_execution_time_secs))
    }

    /// Pause after each table.
    pub fn table_delay(&self) -> Duration {
        Duration::from_millis(self.table_delay_ms)
    }

    /// Pause between batches.
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Parses a memory size such as `512M`, `1G` or `1048576` into bytes.
///
/// ```rust
/// use pkfixer_core::config::parse_memory_limit;
///
/// assert_eq!(parse_memory_limit("512M").unwrap(), 512 * 1024 * 1024);
/// assert!(parse_memory_limit("lots").is_err());
/// ```
///
/// # Errors
/// Returns error for empty, non-numeric or overflowing values.
pub fn parse_memory_limit(value: &str) -> crate::Result<u64> {
    let trimmed = value.trim();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('K' | 'k') => (&trimmed[..trimmed.len() - 1], 1024_u64),
        Some('M' | 'm') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('G' | 'g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| {
            crate::error::FixerError::configuration(format!("Invalid memory limit '{}'", value))
        })
}
