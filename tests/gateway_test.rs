//! Integration tests for the query gateway
//!
//! Each test seeds its own DuckDB file and drives queries end to end through
//! validation, the pool, the executor and the cache.

mod common;

use std::time::Duration;

use querygate::prelude::*;
use serde_json::json;

#[tokio::test]
async fn test_select_appends_default_limit() {
    let (_dir, path) = common::seeded_database(500);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();

    let result = gateway
        .run("SELECT state, population FROM county_data")
        .await
        .unwrap();

    assert_eq!(result.row_count, 100);
    assert!(!result.truncated);
    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["state", "population"]);
    assert_eq!(result.columns[1].data_type, "BIGINT");
}

#[tokio::test]
async fn test_oversized_limit_is_clamped() {
    let (_dir, path) = common::seeded_database(2_000);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();

    let result = gateway
        .run("SELECT county FROM county_data LIMIT 50000")
        .await
        .unwrap();

    assert_eq!(result.row_count, 1000);
}

#[tokio::test]
async fn test_rejected_queries_never_touch_the_pool() {
    let (_dir, path) = common::seeded_database(10);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();
    let before = gateway.pool().stats();

    let cases = [
        ("DROP TABLE county_data", "DisallowedStatement"),
        ("ATTACH 'other.duckdb' AS other", "DisallowedStatement"),
        ("SELECT * FROM secret_table", "DisallowedTable"),
        ("SELECT * FROM read_csv('/etc/passwd')", "DisallowedFunction"),
        ("SELECT 1 FROM county_data; SELECT 2 FROM county_data", "MultiStatementRejected"),
        ("SELEC nonsense", "SyntaxError"),
    ];
    for (sql, kind) in cases {
        let err = gateway.run(sql).await.unwrap_err();
        assert_eq!(err.error_kind(), kind, "{}", sql);
    }

    assert_eq!(gateway.pool().stats(), before);
}

#[tokio::test]
async fn test_tool_response_shapes() {
    let (_dir, path) = common::seeded_database(10);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();

    let success = gateway
        .run_tool("SELECT state, name FROM state_data ORDER BY state")
        .await
        .to_json();
    assert_eq!(success["success"], json!(true));
    assert_eq!(success["rows"], json!([
        {"state": "S0", "name": "Alpha"},
        {"state": "S1", "name": "Beta"}
    ]));
    assert_eq!(success["metadata"]["rowCount"], json!(2));
    assert_eq!(success["metadata"]["truncated"], json!(false));
    assert_eq!(
        success["metadata"]["columns"],
        json!([{"name": "state", "type": "VARCHAR"}, {"name": "name", "type": "VARCHAR"}])
    );

    let failure = gateway.run_tool("SELECT * FROM secret_table").await.to_json();
    assert_eq!(failure["success"], json!(false));
    assert_eq!(failure["errorKind"], json!("DisallowedTable"));
    assert_eq!(
        failure["suggestions"],
        json!(["Available tables: county_data, state_data"])
    );
}

#[tokio::test]
async fn test_runtime_errors_are_sanitized() {
    let (_dir, path) = common::seeded_database(10);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();

    let response = gateway
        .run_tool("SELECT no_such_column FROM county_data")
        .await
        .to_json();

    assert_eq!(response["errorKind"], json!("RuntimeError"));
    let message = response["message"].as_str().unwrap();
    assert!(!message.contains("no_such_column"));
    assert!(!message.contains("Binder Error"));

    // The failed query released its connection normally
    let stats = gateway.pool().stats();
    assert_eq!(stats.acquired, 0);
    assert_eq!(stats.replaced, 0);
}

#[tokio::test]
async fn test_timeout_poisons_connection_and_pool_recovers() {
    let (_dir, path) = common::seeded_database(3_000);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();

    let err = gateway
        .run_with_timeout(
            "SELECT sum(a.population * b.population + c.population) \
             FROM county_data a, county_data b, county_data c",
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_kind(), "QueryTimeout");
    assert_eq!(gateway.pool().stats().replaced, 1);

    let result = gateway
        .run("SELECT count(*) AS n FROM county_data")
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], json!(3_000));
}

#[tokio::test]
async fn test_cacheable_query_is_served_from_cache() {
    let (_dir, path) = common::seeded_database(100);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();
    let sql = "SELECT state, sum(population) AS total FROM county_data GROUP BY state ORDER BY state";

    let first = gateway.run(sql).await.unwrap();
    assert!(!first.cache_hit);
    let created = gateway.pool().stats().created;

    let second = gateway.run(sql).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.rows, first.rows);
    assert_eq!(second.columns, first.columns);
    assert_eq!(gateway.pool().stats().created, created);
    assert_eq!(gateway.cache().unwrap().len(), 1);
}

#[tokio::test]
async fn test_time_relative_query_is_not_cached() {
    let (_dir, path) = common::seeded_database(10);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();
    let sql = "SELECT state, now() AS asked_at FROM state_data";

    gateway.run(sql).await.unwrap();
    let second = gateway.run(sql).await.unwrap();

    assert!(!second.cache_hit);
    assert!(gateway.cache().unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_is_collected_when_enabled() {
    let (_dir, path) = common::seeded_database(10);
    let mut config = common::app_config(&path);
    config.query = QueryConfig::new(10_000).with_profile(true);
    let gateway = QueryGateway::new(config).await.unwrap();

    let result = gateway.run("SELECT * FROM state_data").await.unwrap();
    let profile = result.profile.unwrap();
    assert!(profile.connection_id.is_some());
    assert!(!profile.cache_hit);
}

#[tokio::test]
async fn test_health_check_and_close() {
    let (_dir, path) = common::seeded_database(10);
    let gateway = QueryGateway::new(common::app_config(&path)).await.unwrap();

    gateway.health_check().await.unwrap();
    gateway.close();

    assert_eq!(gateway.pool().state(), PoolState::Closed);
    let err = gateway.run("SELECT * FROM state_data").await.unwrap_err();
    assert_eq!(err.error_kind(), "PoolClosed");
}

#[tokio::test]
async fn test_gateways_on_one_path_share_engine() {
    let (_dir, path) = common::seeded_database(10);
    let first = QueryGateway::new(common::app_config(&path)).await.unwrap();
    let second = QueryGateway::new(common::app_config(&path)).await.unwrap();

    assert!(first.pool().shares_engine_with(second.pool()));
    assert_eq!(second.run("SELECT * FROM state_data").await.unwrap().row_count, 2);
}

#[tokio::test]
async fn test_invalid_policy_refuses_to_start() {
    let (_dir, path) = common::seeded_database(10);

    let mut config = common::app_config(&path);
    config.policy.allowed_statements.push("delete".to_string());
    let err = QueryGateway::new(config).await.unwrap_err();
    assert_eq!(err.error_kind(), "PolicyError");

    let mut config = common::app_config(&path);
    config.policy.default_row_cap = 5_000;
    let err = QueryGateway::new(config).await.unwrap_err();
    assert_eq!(err.error_kind(), "ConfigError");
}

#[tokio::test]
async fn test_config_file_round_trip() {
    let (dir, path) = common::seeded_database(10);
    let config_path = dir.path().join("querygate.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[database]
path = "{}"
min_connections = 1
max_connections = 2
acquire_timeout_ms = 1000

[cache]
enabled = false
default_ttl_seconds = 60
max_entries = 16

[policy]
allowed_tables = ["state_data"]
allowed_statements = ["select"]
disallowed_functions = ["read_csv"]
time_relative_functions = ["now"]
default_row_cap = 10
max_row_cap = 10
cacheable_query_classes = ["aggregate"]
"#,
            path.display()
        ),
    )
    .unwrap();

    let config = AppConfig::from_file(&config_path).unwrap();
    let gateway = QueryGateway::new(config).await.unwrap();

    assert!(gateway.cache().is_none());
    let result = gateway.run("SELECT * FROM state_data").await.unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(
        gateway.run("SELECT * FROM county_data").await.unwrap_err().error_kind(),
        "DisallowedTable"
    );
}
