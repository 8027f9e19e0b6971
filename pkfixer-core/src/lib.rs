//! Identity-column analysis and repair engine for pkfixer.
//!
//! This crate inspects MySQL tables for three structural defects and
//! repairs them in place over a long-lived, possibly unreliable connection:
//!
//! - primary keys without `AUTO_INCREMENT`
//! - rows whose identity is `0`
//! - rows sharing an identity value
//!
//! # Safety Guarantees
//! - Every store access goes through [`ConnectionManager::execute_with_retry`]
//! - Dry runs issue reads only and write no backups
//! - Zero-id rows are backed up as SQL before they are deleted
//! - Connection strings are sanitized in every error and log line
//!
//! # Architecture
//! - `store`: the object-safe store boundary, with MySQL and in-memory backends
//! - `connection`: session ownership, preventive reconnects and bounded retry
//! - `schema` / `detector` / `remediator`: per-table analysis and repair
//! - `orchestrator`: batching, pacing and run modes
//! - `report`: outcome accumulation into a finalized [`RunReport`]

pub mod backup;
pub mod config;
pub mod connection;
pub mod detector;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod remediator;
pub mod report;
pub mod schema;
pub mod store;

// Re-export commonly used types
pub use config::{ConnectionConfig, FixerConfig};
pub use connection::ConnectionManager;
pub use error::{ErrorKind, FixerError, Result};
pub use orchestrator::{BatchOrchestrator, Phase, RunContext, RunMode};
pub use report::{ReportCollector, RunReport, SkipReason};

#[cfg(feature = "mysql")]
pub use store::mysql::MySqlConnector;
