//! MySQL repair integration tests (require Docker).
//!
//! This test suite covers:
//! - INFORMATION_SCHEMA column and index reads
//! - Zero-id deletion and AUTO_INCREMENT repair on a real server
//! - Dry runs leaving the server untouched

#![cfg(feature = "integration")]

use pkfixer_core::{
    BatchOrchestrator, FixerConfig, MySqlConnector, RunMode, SkipReason,
    store::{Connector, Store},
};
use sqlx::MySqlPool;
use std::time::Duration;
use testcontainers_modules::{mysql::Mysql, testcontainers::runners::AsyncRunner};

/// Waits for MySQL to accept queries
async fn wait_for_mysql_ready(database_url: &str, max_attempts: u32) {
    for _ in 0..max_attempts {
        if let Ok(pool) = MySqlPool::connect(database_url).await {
            let ready = sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok();
            pool.close().await;
            if ready {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("MySQL failed to become ready after {max_attempts} attempts");
}

async fn seed(database_url: &str) {
    let pool = MySqlPool::connect(database_url).await.unwrap();
    for statement in [
        "CREATE TABLE tblclients (
            id INT NOT NULL DEFAULT 0,
            firstname VARCHAR(100) NOT NULL,
            PRIMARY KEY (id)
        )",
        "INSERT INTO tblclients (id, firstname) VALUES (0, 'ghost'), (1, 'ada'), (3, 'grace')",
        "CREATE TABLE tblactivitylog (
            id INT NOT NULL,
            description TEXT
        )",
        "INSERT INTO tblactivitylog (id, description) VALUES (0, 'boot')",
        "CREATE TABLE tblcurrencies (
            id INT NOT NULL AUTO_INCREMENT PRIMARY KEY,
            code CHAR(3) NOT NULL
        )",
        "INSERT INTO tblcurrencies (code) VALUES ('USD'), ('EUR')",
    ] {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

fn config(backup_dir: &std::path::Path) -> FixerConfig {
    FixerConfig {
        table_delay_ms: 0,
        batch_delay_ms: 0,
        ..FixerConfig::default().with_backup(true, backup_dir)
    }
}

#[tokio::test]
async fn test_mysql_metadata_reads() {
    let mysql = Mysql::default().start().await.unwrap();
    let port = mysql.get_host_port_ipv4(3306).await.unwrap();
    let database_url = format!("mysql://root@localhost:{}/test", port);
    wait_for_mysql_ready(&database_url, 60).await;
    seed(&database_url).await;

    let connector = MySqlConnector::new(&database_url).unwrap();
    let mut store = connector.connect().await.unwrap();

    store.ping().await.unwrap();
    let tables = store.list_tables().await.unwrap();
    assert_eq!(tables, vec!["tblactivitylog", "tblclients", "tblcurrencies"]);
    assert!(store.table_exists("tblclients").await.unwrap());
    assert!(!store.table_exists("tblmissing").await.unwrap());

    let columns = store.columns("tblclients").await.unwrap();
    assert_eq!(columns[0].name, "id");
    assert!(columns[0].is_primary_key());
    assert!(!columns[0].is_auto_increment());
    assert_eq!(columns[0].default_value.as_deref(), Some("0"));

    let indexes = store.indexes("tblclients").await.unwrap();
    assert!(indexes.iter().any(|i| i.is_primary() && i.column_name == "id"));

    assert_eq!(store.count_zero_ids("tblclients", "id").await.unwrap(), 1);
    assert_eq!(store.max_identity("tblclients", "id").await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_mysql_max_identity_beyond_signed_range() {
    let mysql = Mysql::default().start().await.unwrap();
    let port = mysql.get_host_port_ipv4(3306).await.unwrap();
    let database_url = format!("mysql://root@localhost:{}/test", port);
    wait_for_mysql_ready(&database_url, 60).await;

    let pool = MySqlPool::connect(&database_url).await.unwrap();
    for statement in [
        "CREATE TABLE tbltransactions (id BIGINT UNSIGNED NOT NULL PRIMARY KEY)",
        "INSERT INTO tbltransactions (id) VALUES (5), (9223372036854775810)",
        "CREATE TABLE tblnegative (id INT NOT NULL PRIMARY KEY)",
        "INSERT INTO tblnegative (id) VALUES (-4)",
    ] {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;

    let connector = MySqlConnector::new(&database_url).unwrap();
    let mut store = connector.connect().await.unwrap();
    assert_eq!(
        store.max_identity("tbltransactions", "id").await.unwrap(),
        Some(9_223_372_036_854_775_810)
    );
    assert_eq!(store.max_identity("tblnegative", "id").await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_mysql_live_repair() {
    let mysql = Mysql::default().start().await.unwrap();
    let port = mysql.get_host_port_ipv4(3306).await.unwrap();
    let database_url = format!("mysql://root@localhost:{}/test", port);
    wait_for_mysql_ready(&database_url, 60).await;
    seed(&database_url).await;

    let backups = tempfile::tempdir().unwrap();
    let connector = MySqlConnector::new(&database_url).unwrap();
    let mut orchestrator =
        BatchOrchestrator::new(Box::new(connector), config(backups.path()), "test");

    orchestrator.execute(RunMode::Scan).await.unwrap();
    let report = orchestrator.finish();

    assert_eq!(report.fixed.len(), 1);
    assert_eq!(report.fixed[0].table, "tblclients");
    assert!(report.errors.is_empty());
    let reasons: Vec<SkipReason> = report.skipped.iter().map(|s| s.reason).collect();
    assert!(reasons.contains(&SkipReason::NoPrimaryKey));
    assert!(reasons.contains(&SkipReason::NoIssues));

    let pool = MySqlPool::connect(&database_url).await.unwrap();
    let zero: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tblclients WHERE id = 0")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(zero, 0);

    let result = sqlx::query("INSERT INTO tblclients (firstname) VALUES ('linus')")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(result.last_insert_id(), 4);
    pool.close().await;

    let backup = std::fs::read_to_string(backups.path().join("tblclients_zero_ids.sql")).unwrap();
    assert!(backup.contains("VALUES (0, 'ghost');"));
}

#[tokio::test]
async fn test_mysql_dry_run_leaves_data_untouched() {
    let mysql = Mysql::default().start().await.unwrap();
    let port = mysql.get_host_port_ipv4(3306).await.unwrap();
    let database_url = format!("mysql://root@localhost:{}/test", port);
    wait_for_mysql_ready(&database_url, 60).await;
    seed(&database_url).await;

    let backups = tempfile::tempdir().unwrap();
    let connector = MySqlConnector::new(&database_url).unwrap();
    let mut orchestrator = BatchOrchestrator::new(
        Box::new(connector),
        config(backups.path()).with_dry_run(true),
        "test",
    );

    orchestrator.execute(RunMode::QuickFix).await.unwrap();
    let report = orchestrator.finish();
    assert!(report.dry_run);

    let pool = MySqlPool::connect(&database_url).await.unwrap();
    let zero: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tblclients WHERE id = 0")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(zero, 1);
    let extra: String = sqlx::query_scalar(
        "SELECT CAST(EXTRA AS CHAR) FROM INFORMATION_SCHEMA.COLUMNS
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = 'tblclients' AND COLUMN_NAME = 'id'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!extra.to_lowercase().contains("auto_increment"));
    pool.close().await;
}
