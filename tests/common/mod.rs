//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use duckdb::Connection;
use querygate::{AppConfig, CacheConfig, DatabaseConfig, PolicyConfig, QueryConfig};
use tempfile::TempDir;

/// Create a DuckDB file with `county_data` (`rows` rows) and `state_data`
pub fn seeded_database(rows: usize) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("census.duckdb");

    let conn = Connection::open(&path).expect("open seed connection");
    conn.execute_batch(&format!(
        "CREATE TABLE county_data (state VARCHAR, county VARCHAR, population BIGINT);
         INSERT INTO county_data
             SELECT 'S' || (i % 50), 'County ' || i, i * 10 FROM range({rows}) t(i);
         CREATE TABLE state_data (state VARCHAR, name VARCHAR);
         INSERT INTO state_data VALUES ('S0', 'Alpha'), ('S1', 'Beta');
         CREATE TABLE secret_table (token VARCHAR);
         INSERT INTO secret_table VALUES ('do-not-leak');"
    ))
    .expect("seed tables");
    drop(conn);

    (dir, path)
}

pub fn app_config(path: &Path) -> AppConfig {
    AppConfig {
        database: DatabaseConfig::new(path.display().to_string(), 1, 4, 2_000)
            .with_retry_backoff(10),
        query: QueryConfig::new(10_000),
        cache: CacheConfig::new(true, 300, 128),
        policy: PolicyConfig::new(&["county_data", "state_data"], 100, 1000),
    }
}
