use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use config::{DatabaseConfig, SecretString};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::connection::{PoolGuard, PooledConnection};
use crate::errors::PoolError;
use crate::registry::{self, Engine, EngineOptions};

/// Pool lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Uninitialized,
    Initializing,
    Ready,
    Draining,
    Closed,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub state: PoolState,
    pub idle: usize,
    pub acquired: usize,
    /// Connections opened over the pool's lifetime
    pub created: u64,
    /// Poisoned connections closed and replaced
    pub replaced: u64,
}

struct PoolInner {
    state: PoolState,
    engine: Option<Arc<Engine>>,
    idle: VecDeque<PooledConnection>,
    acquired: usize,
    created: u64,
    replaced: u64,
}

/// Bounded pool of DuckDB connections on a shared engine
pub struct ConnectionPool {
    inner: Mutex<PoolInner>,
    permits: Arc<Semaphore>,
    max_connections: usize,
    retry_backoff: Duration,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl ConnectionPool {
    /// Open (or join) the engine for `path` and pre-create `min_connections`
    /// idle connections. The encryption key, if configured, is read from the
    /// environment variable named in `config`.
    pub async fn initialize<P: AsRef<Path>>(
        path: P,
        config: &DatabaseConfig,
    ) -> Result<Arc<Self>, PoolError> {
        let key = config.encryption_key()?;
        Self::initialize_with_key(path, config, key).await
    }

    /// Same as [`ConnectionPool::initialize`] with an already resolved key
    pub async fn initialize_with_key<P: AsRef<Path>>(
        path: P,
        config: &DatabaseConfig,
        encryption_key: Option<SecretString>,
    ) -> Result<Arc<Self>, PoolError> {
        if config.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if config.min_connections > config.max_connections {
            return Err(PoolError::InvalidConfig(format!(
                "min_connections ({}) exceeds max_connections ({})",
                config.min_connections, config.max_connections
            )));
        }

        let max_connections = config.max_connections as usize;
        let pool = Arc::new(Self {
            inner: Mutex::new(PoolInner {
                state: PoolState::Uninitialized,
                engine: None,
                idle: VecDeque::with_capacity(max_connections),
                acquired: 0,
                created: 0,
                replaced: 0,
            }),
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            retry_backoff: config.retry_backoff(),
        });
        pool.lock().state = PoolState::Initializing;

        let options = EngineOptions {
            read_only: config.read_only,
            encryption_key,
            encryption_cipher: config.encryption_cipher.clone(),
        };
        let path = path.as_ref().to_path_buf();
        let engine = tokio::task::spawn_blocking(move || registry::engine_for(&path, &options))
            .await
            .map_err(|e| PoolError::ConnectionCreateFailed(e.to_string()))??;
        let encrypted = engine.is_encrypted();
        let engine_path = engine.path().display().to_string();
        pool.lock().engine = Some(engine);

        for _ in 0..config.min_connections {
            let connection = pool.create_with_retry().await?;
            pool.lock().idle.push_back(connection);
        }

        pool.lock().state = PoolState::Ready;
        tracing::info!(
            path = %engine_path,
            encrypted,
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "connection pool ready"
        );
        Ok(pool)
    }

    /// Wait up to `timeout` for a connection. Waiters are served in arrival order.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PoolGuard, PoolError> {
        if self.state() != PoolState::Ready {
            return Err(PoolError::PoolClosed);
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::PoolClosed),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "connection pool exhausted");
                return Err(PoolError::PoolExhausted {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let reused = {
            let mut inner = self.lock();
            if inner.state != PoolState::Ready {
                return Err(PoolError::PoolClosed);
            }
            inner.idle.pop_front()
        };
        // Without an idle connection the permit covers a fresh one; dropping
        // the permit on failure gives the slot back.
        let mut connection = match reused {
            Some(connection) => connection,
            None => self.create_with_retry().await?,
        };
        connection.mark_acquired();

        {
            let mut inner = self.lock();
            if inner.state != PoolState::Ready {
                return Err(PoolError::PoolClosed);
            }
            inner.acquired += 1;
        }

        Ok(PoolGuard::new(
            Arc::clone(self),
            connection,
            started.elapsed(),
            permit,
        ))
    }

    /// Return a connection. Healthy connections go back to the idle set; a
    /// poisoned one (or one whose handle went missing) is closed and a
    /// replacement is opened on a blocking worker so the idle count is
    /// restored. Called by `PoolGuard` on drop.
    pub(crate) fn release(self: &Arc<Self>, mut connection: PooledConnection) {
        let engine = {
            let mut inner = self.lock();
            inner.acquired = inner.acquired.saturating_sub(1);
            if inner.state != PoolState::Ready {
                return;
            }
            if connection.is_reusable() {
                // A refill racing an on-demand create can leave one connection too many
                if inner.idle.len() + inner.acquired < self.max_connections {
                    connection.mark_idle();
                    inner.idle.push_back(connection);
                }
                return;
            }
            inner.replaced += 1;
            inner.engine.clone()
        };

        tracing::warn!(connection_id = %connection.id(), "closing poisoned connection");
        drop(connection);

        let Some(engine) = engine else {
            return;
        };
        let pool = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || pool.refill(&engine));
            }
            Err(_) => pool.refill(&engine),
        }
    }

    /// Open one idle connection in place of a poisoned one. A slot taken in
    /// the meantime by an on-demand connection is left alone.
    fn refill(&self, engine: &Engine) {
        let handle = match engine.connect() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "replacement connection failed, slot refills on next acquire");
                return;
            }
        };

        let mut inner = self.lock();
        if inner.state == PoolState::Ready
            && inner.idle.len() + inner.acquired < self.max_connections
        {
            inner.idle.push_back(PooledConnection::new(handle));
            inner.created += 1;
        }
    }

    /// Stop handing out connections and release the engine
    pub fn close(&self) {
        let idle = {
            let mut inner = self.lock();
            if matches!(inner.state, PoolState::Draining | PoolState::Closed) {
                return;
            }
            inner.state = PoolState::Draining;
            std::mem::take(&mut inner.idle)
        };

        self.permits.close();
        let drained = idle.len();
        drop(idle);

        let mut inner = self.lock();
        inner.engine = None;
        inner.state = PoolState::Closed;
        tracing::info!(drained, in_use = inner.acquired, "connection pool closed");
    }

    pub fn state(&self) -> PoolState {
        self.lock().state
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            state: inner.state,
            idle: inner.idle.len(),
            acquired: inner.acquired,
            created: inner.created,
            replaced: inner.replaced,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Whether both pools run on the same engine instance
    pub fn shares_engine_with(&self, other: &ConnectionPool) -> bool {
        let mine = self.lock().engine.clone();
        let theirs = other.lock().engine.clone();
        match (mine, theirs) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn create_with_retry(&self) -> Result<PooledConnection, PoolError> {
        let engine = self.lock().engine.clone().ok_or(PoolError::PoolClosed)?;

        let first = match Self::open_on(Arc::clone(&engine)).await {
            Ok(connection) => return Ok(self.track_created(connection)),
            Err(e @ PoolError::EncryptionAttachFailed { .. }) => return Err(e),
            Err(e) => e,
        };

        let backoff = self.jittered_backoff();
        tracing::warn!(error = %first, backoff_ms = backoff.as_millis() as u64, "connection create failed, retrying");
        tokio::time::sleep(backoff).await;

        match Self::open_on(engine).await {
            Ok(connection) => Ok(self.track_created(connection)),
            Err(e @ PoolError::EncryptionAttachFailed { .. }) => Err(e),
            Err(e) => Err(PoolError::ConnectionCreateFailed(e.to_string())),
        }
    }

    async fn open_on(engine: Arc<Engine>) -> Result<duckdb::Connection, PoolError> {
        tokio::task::spawn_blocking(move || engine.connect())
            .await
            .map_err(|e| PoolError::ConnectionCreateFailed(e.to_string()))?
    }

    fn track_created(&self, handle: duckdb::Connection) -> PooledConnection {
        self.lock().created += 1;
        PooledConnection::new(handle)
    }

    fn jittered_backoff(&self) -> Duration {
        let base = self.retry_backoff.as_millis() as u64;
        let jitter = if base == 0 {
            0
        } else {
            rand::rng().random_range(0..=base / 2)
        };
        Duration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use duckdb::Connection;
    use tempfile::TempDir;

    fn seeded_db() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool_test.duckdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE county_data (state VARCHAR, population BIGINT);
             INSERT INTO county_data VALUES ('CA', 100), ('NY', 200);",
        )
        .unwrap();
        drop(conn);
        (dir, path)
    }

    fn config_for(path: &Path, min: u32, max: u32) -> DatabaseConfig {
        DatabaseConfig::new(path.display().to_string(), min, max, 1000).with_retry_backoff(5)
    }

    /// Replacements are opened on a blocking worker; wait for the idle set to refill
    async fn wait_for_idle(pool: &ConnectionPool, expected: usize) {
        for _ in 0..200 {
            if pool.stats().idle == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("idle count never reached {}: {:?}", expected, pool.stats());
    }

    fn encrypted_db(key: &str) -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encrypted.duckdb");
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "ATTACH '{}' AS seed (ENCRYPTION_KEY '{}');
             CREATE TABLE seed.county_data (state VARCHAR, population BIGINT);
             INSERT INTO seed.county_data VALUES ('CA', 100), ('NY', 200), ('TX', 300);
             DETACH seed;",
            path.display(),
            key
        ))
        .unwrap();
        drop(conn);
        (dir, path)
    }

    #[tokio::test]
    async fn test_initialize_precreates_min_connections() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 2, 4))
            .await
            .unwrap();

        let stats = pool.stats();
        assert_eq!(stats.state, PoolState::Ready);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.acquired, 0);
        assert_eq!(stats.created, 2);
    }

    #[tokio::test]
    async fn test_acquire_reuses_idle_connection() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 1, 2))
            .await
            .unwrap();

        let first_id = {
            let guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
            assert_eq!(pool.stats().acquired, 1);
            let count: i64 = guard
                .handle()
                .unwrap()
                .query_row("SELECT count(*) FROM county_data", [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 2);
            guard.id()
        };

        assert_eq!(pool.stats().idle, 1);
        let guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(guard.id(), first_id);
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();

        let _held = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted { timeout_ms: 50 }));
        assert_eq!(err.kind(), "PoolExhausted");
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();

        let held = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(Duration::from_secs(2)).await.map(|g| g.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let held_id = held.id();
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
    }

    #[tokio::test]
    async fn test_poisoned_connection_is_replaced() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();

        let poisoned_id = {
            let mut guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
            guard.poison();
            assert!(guard.is_poisoned());
            guard.id()
        };

        let stats = pool.stats();
        assert_eq!(stats.acquired, 0);
        assert_eq!(stats.replaced, 1);
        wait_for_idle(&pool, 1).await;
        assert_eq!(pool.stats().created, 2);

        let guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_ne!(guard.id(), poisoned_id);
    }

    #[tokio::test]
    async fn test_refill_keeps_idle_within_max() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();

        {
            let mut guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
            guard.poison();
        }
        // Either the refill or this acquire opens the next connection
        let guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(pool.stats().acquired, 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);

        let stats = pool.stats();
        assert_eq!(stats.acquired, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_missing_handle_is_replaced() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();

        {
            let mut guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
            let handle = guard.take_handle();
            assert!(handle.is_some());
        }

        assert_eq!(pool.stats().replaced, 1);
        wait_for_idle(&pool, 1).await;
    }

    #[tokio::test]
    async fn test_close_rejects_new_acquisitions() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 2, 2))
            .await
            .unwrap();

        pool.close();
        let stats = pool.stats();
        assert_eq!(stats.state, PoolState::Closed);
        assert_eq!(stats.idle, 0);
        assert!(matches!(
            pool.acquire(Duration::from_secs(1)).await,
            Err(PoolError::PoolClosed)
        ));
    }

    #[tokio::test]
    async fn test_release_after_close_drops_connection() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();

        let guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
        pool.close();
        drop(guard);

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.acquired, 0);
    }

    #[tokio::test]
    async fn test_pools_on_same_path_share_engine() {
        let (dir, path) = seeded_db();
        let first = ConnectionPool::initialize(&path, &config_for(&path, 1, 2))
            .await
            .unwrap();
        let relative = dir.path().join(".").join("pool_test.duckdb");
        let second = ConnectionPool::initialize(&relative, &config_for(&relative, 1, 2))
            .await
            .unwrap();

        assert!(first.shares_engine_with(&second));
        assert!(registry::is_registered(&path));

        first.close();
        assert!(registry::is_registered(&path));
        second.close();
        assert!(!registry::is_registered(&path));
    }

    #[tokio::test]
    async fn test_read_only_pool_rejects_writes() {
        let (_dir, path) = seeded_db();
        let pool = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();

        let guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let result = guard
            .handle()
            .unwrap()
            .execute_batch("INSERT INTO county_data VALUES ('TX', 1)");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_database_fails_to_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.duckdb");

        let err = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConnectionCreateFailed");
    }

    #[tokio::test]
    async fn test_encrypted_attach_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent_encrypted.duckdb");
        let config = config_for(&path, 1, 1).with_encryption("UNUSED_KEY_ENV", "GCM");

        let err = ConnectionPool::initialize_with_key(
            &path,
            &config,
            Some(SecretString::new("not-the-key".to_string())),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "EncryptionAttachFailed");
        assert!(!err.to_string().contains("not-the-key"));
    }

    #[tokio::test]
    async fn test_encrypted_storage_attaches_with_correct_key() {
        let (_dir, path) = encrypted_db("correct-horse");
        let config = config_for(&path, 1, 2).with_encryption("UNUSED_KEY_ENV", "GCM");

        let pool = ConnectionPool::initialize_with_key(
            &path,
            &config,
            Some(SecretString::new("correct-horse".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(pool.stats().created, 1);

        // A second connection runs the attach again and lands in the same catalog
        let first = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let second = pool.acquire(Duration::from_secs(1)).await.unwrap();
        for guard in [&first, &second] {
            let (catalog, total): (String, i64) = guard
                .handle()
                .unwrap()
                .query_row(
                    "SELECT current_database(), sum(population) FROM county_data",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .unwrap();
            assert_eq!(catalog, registry::ATTACH_ALIAS);
            assert_eq!(total, 600);
        }

        let write = first
            .handle()
            .unwrap()
            .execute_batch("INSERT INTO county_data VALUES ('WA', 1)");
        assert!(write.is_err());
    }

    #[tokio::test]
    async fn test_wrong_key_on_existing_encrypted_storage_fails() {
        let (_dir, path) = encrypted_db("correct-horse");
        let config = config_for(&path, 1, 1).with_encryption("UNUSED_KEY_ENV", "GCM");

        let err = ConnectionPool::initialize_with_key(
            &path,
            &config,
            Some(SecretString::new("battery-staple".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "EncryptionAttachFailed");
    }

    #[tokio::test]
    async fn test_engine_with_other_options_is_not_shared() {
        let (_dir, path) = seeded_db();
        let plain = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();

        let encrypted = config_for(&path, 1, 1)
            .with_encryption("UNUSED_KEY_ENV", "GCM")
            .with_read_only(false);
        let err = ConnectionPool::initialize_with_key(
            &path,
            &encrypted,
            Some(SecretString::new("k".to_string())),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
        assert_eq!(err.kind(), "ConfigError");

        let writable = config_for(&path, 1, 1).with_read_only(false);
        let err = ConnectionPool::initialize(&path, &writable).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));

        // Matching options still share
        let twin = ConnectionPool::initialize(&path, &config_for(&path, 1, 1))
            .await
            .unwrap();
        assert!(plain.shares_engine_with(&twin));
    }

    #[tokio::test]
    async fn test_invalid_bounds_are_rejected() {
        let (_dir, path) = seeded_db();
        let err = ConnectionPool::initialize(&path, &config_for(&path, 3, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }
}
