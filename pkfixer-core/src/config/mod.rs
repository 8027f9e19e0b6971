//! Configuration types.
//!
//! - `ConnectionConfig`: where to connect (parsed from a `mysql://` URL)
//! - `FixerConfig`: run options (modes, pacing, retry, backup, reporting)
//!
//! # Security
//! These structs intentionally do NOT store passwords. The password only
//! lives in the connection URL given to the connector.

mod connection;
mod run;

pub use connection::{
    ConnectionConfig, DEFAULT_MYSQL_PORT, parse_mysql_connection_config,
    validate_mysql_connection_string,
};
pub use run::{CRITICAL_TABLES, FixerConfig, QUICK_FIX_TABLES, parse_memory_limit};
