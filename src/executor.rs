//! Query execution
//!
//! The executor runs a [`ValidatedQuery`] on a pooled connection. The query
//! itself runs on a blocking worker so async callers are never stalled by a
//! slow analytic query; the connection is held through a `PoolGuard`, so it
//! goes back to the pool (or is replaced) on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cache_system::CacheManager;
use config::CacheConfig;
use connection_pool::{ConnectionPool, PoolError};
use duckdb::Connection;
use duckdb::types::Value;
use query_policy::{QueryClass, ValidatedQuery};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use type_mapping::{ColumnInfo, duckdb_type_name, duckdb_value_to_json};
use uuid::Uuid;

use crate::errors::{ExecutionError, RuntimeCategory};
use crate::{debug_log, trace_log};

/// Per-execution timings, collected when profiling is enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryProfile {
    pub connection_id: Option<Uuid>,
    pub acquire_wait_ms: u64,
    pub execution_ms: u64,
    pub cache_hit: bool,
}

/// Rows and metadata of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Row records keyed by column name, in column order
    pub rows: Vec<Map<String, JsonValue>>,
    pub columns: Vec<ColumnInfo>,
    pub row_count: usize,
    /// More rows existed than the cap allowed
    pub truncated: bool,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<QueryProfile>,
}

struct RawResult {
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<JsonValue>>,
}

/// Cache lifetimes by query class
#[derive(Debug, Clone, Copy)]
struct CacheTtls {
    default: Duration,
    aggregate: Option<Duration>,
    detail: Option<Duration>,
}

impl CacheTtls {
    fn from_config(config: &CacheConfig) -> Self {
        Self {
            default: config.ttl_duration(),
            aggregate: config.aggregate_ttl_seconds.map(Duration::from_secs),
            detail: config.detail_ttl_seconds.map(Duration::from_secs),
        }
    }

    fn for_class(&self, class: QueryClass) -> Duration {
        let specific = match class {
            QueryClass::Aggregate => self.aggregate,
            QueryClass::Detail => self.detail,
        };
        specific.unwrap_or(self.default)
    }
}

pub struct QueryExecutor {
    pool: Arc<ConnectionPool>,
    cache: Option<(Arc<CacheManager>, CacheTtls)>,
    max_row_cap: u64,
    acquire_timeout: Duration,
    collect_profile: bool,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("pool", &self.pool)
            .field("cached", &self.cache.is_some())
            .field("max_row_cap", &self.max_row_cap)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl QueryExecutor {
    pub fn new(pool: Arc<ConnectionPool>, max_row_cap: u64, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            cache: None,
            max_row_cap,
            acquire_timeout,
            collect_profile: false,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>, config: &CacheConfig) -> Self {
        self.cache = Some((cache, CacheTtls::from_config(config)));
        self
    }

    pub fn with_profile(mut self, collect_profile: bool) -> Self {
        self.collect_profile = collect_profile;
        self
    }

    /// Run a validated query under `timeout`
    pub async fn execute(
        &self,
        query: &ValidatedQuery,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();

        if let Some(hit) = self.cached(query, started) {
            return Ok(hit);
        }

        let mut guard = self.pool.acquire(self.acquire_timeout).await?;
        let acquire_wait = guard.wait_time();
        let connection_id = guard.id();
        let handle = guard.take_handle().ok_or_else(|| {
            // A guard without a handle is replaced on drop
            PoolError::ConnectionCreateFailed("pooled connection has no handle".to_string())
        })?;

        let interrupt = handle.interrupt_handle();
        let sql = query.sql().to_string();
        let max_row_cap = self.max_row_cap;
        let exec_started = Instant::now();
        let task = tokio::task::spawn_blocking(move || {
            let outcome = run_query(&handle, &sql, max_row_cap);
            (handle, outcome)
        });

        let raw = match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                interrupt.interrupt();
                guard.poison();
                tracing::warn!(
                    connection_id = ?connection_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "query timed out, connection poisoned"
                );
                return Err(ExecutionError::QueryTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(Err(join_error)) => {
                guard.poison();
                tracing::error!(error = %join_error, "query worker failed");
                return Err(ExecutionError::RuntimeError {
                    category: RuntimeCategory::Internal,
                });
            }
            Ok(Ok((handle, outcome))) => {
                guard.restore_handle(handle);
                match outcome {
                    Ok(raw) => raw,
                    Err(e) => {
                        let category = RuntimeCategory::classify(&e);
                        tracing::warn!(error = %e, category = category.as_str(), "query failed");
                        return Err(ExecutionError::RuntimeError { category });
                    }
                }
            }
        };
        let execution_time = exec_started.elapsed();
        drop(guard);

        let result = shape_result(
            raw,
            max_row_cap,
            started.elapsed(),
            self.collect_profile.then(|| QueryProfile {
                connection_id,
                acquire_wait_ms: acquire_wait.as_millis() as u64,
                execution_ms: execution_time.as_millis() as u64,
                cache_hit: false,
            }),
        );
        if result.truncated {
            tracing::info!(cap = max_row_cap, "result truncated at row cap");
        }

        self.store(query, &result);
        Ok(result)
    }

    /// Run `SELECT 1` on a pooled connection
    pub async fn ping(&self) -> Result<(), ExecutionError> {
        let mut guard = self.pool.acquire(self.acquire_timeout).await?;
        let handle = guard.take_handle().ok_or_else(|| {
            PoolError::ConnectionCreateFailed("pooled connection has no handle".to_string())
        })?;

        let (handle, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = handle.query_row("SELECT 1", [], |row| row.get::<_, i32>(0));
            (handle, outcome)
        })
        .await
        .map_err(|_| ExecutionError::RuntimeError {
            category: RuntimeCategory::Internal,
        })?;
        guard.restore_handle(handle);

        outcome.map(|_| ()).map_err(|e| ExecutionError::RuntimeError {
            category: RuntimeCategory::classify(&e),
        })
    }

    fn cached(&self, query: &ValidatedQuery, started: Instant) -> Option<ExecutionResult> {
        let (cache, _) = self.cache.as_ref()?;
        let key = query.cache_key()?;

        match cache.get_json::<ExecutionResult>(key) {
            Ok(Some(mut hit)) => {
                debug_log!(key, "cache hit");
                // Cached copies never carry a profile; a fresh one describes this lookup
                hit.cache_hit = true;
                hit.execution_time_ms = started.elapsed().as_millis() as u64;
                hit.profile = self.collect_profile.then(|| QueryProfile {
                    connection_id: None,
                    acquire_wait_ms: 0,
                    execution_ms: 0,
                    cache_hit: true,
                });
                Some(hit)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cache entry");
                cache.invalidate(key);
                None
            }
        }
    }

    fn store(&self, query: &ValidatedQuery, result: &ExecutionResult) {
        let (Some((cache, ttls)), Some(key)) = (self.cache.as_ref(), query.cache_key()) else {
            return;
        };

        let mut stored = result.clone();
        stored.profile = None;
        let ttl = ttls.for_class(query.class());
        match cache.put_json(key, &stored, ttl) {
            Ok(()) => {
                trace_log!(key, ttl_secs = ttl.as_secs(), "cached result");
            }
            Err(e) => tracing::warn!(error = %e, "failed to cache result"),
        }
    }
}

/// Read at most `max_row_cap + 1` rows so truncation can be detected
fn run_query(conn: &Connection, sql: &str, max_row_cap: u64) -> Result<RawResult, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;

    let columns = match rows.as_ref() {
        Some(stmt) => stmt
            .column_names()
            .into_iter()
            .enumerate()
            .map(|(idx, name)| ColumnInfo::new(name, duckdb_type_name(&stmt.column_type(idx))))
            .collect(),
        None => Vec::new(),
    };

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let width = row.as_ref().column_count();
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            let value: Value = row.get(idx)?;
            values.push(duckdb_value_to_json(&value));
        }
        out.push(values);
        if out.len() as u64 > max_row_cap {
            break;
        }
    }

    Ok(RawResult { columns, rows: out })
}

fn shape_result(
    raw: RawResult,
    max_row_cap: u64,
    elapsed: Duration,
    profile: Option<QueryProfile>,
) -> ExecutionResult {
    let RawResult { columns, mut rows } = raw;
    let columns = dedupe_column_names(columns);

    let cap = usize::try_from(max_row_cap).unwrap_or(usize::MAX);
    let truncated = rows.len() > cap;
    rows.truncate(cap);

    let records: Vec<Map<String, JsonValue>> = rows
        .into_iter()
        .map(|values| {
            columns
                .iter()
                .map(|column| column.name.clone())
                .zip(values)
                .collect()
        })
        .collect();

    ExecutionResult {
        row_count: records.len(),
        rows: records,
        columns,
        truncated,
        execution_time_ms: elapsed.as_millis() as u64,
        cache_hit: false,
        profile,
    }
}

/// Repeated output names (`SELECT a, a`) would collide as record keys
fn dedupe_column_names(columns: Vec<ColumnInfo>) -> Vec<ColumnInfo> {
    let mut seen = std::collections::HashSet::new();
    columns
        .into_iter()
        .map(|mut column| {
            if !seen.insert(column.name.clone()) {
                let base = column.name.clone();
                let mut suffix = 1;
                while !seen.insert(format!("{}_{}", base, suffix)) {
                    suffix += 1;
                }
                column.name = format!("{}_{}", base, suffix);
            }
            column
        })
        .collect()
}
