//! Core QueryGate functionality
//!
//! This module contains the `QueryGateway` coordinator, which wires the policy,
//! the connection pool, the optional result cache and the executor together.

use std::sync::Arc;
use std::time::Duration;

use cache_system::CacheManager;
use config::AppConfig;
use connection_pool::ConnectionPool;
use query_policy::{Policy, ValidatedQuery, ValidationError};

use crate::debug_log;
use crate::errors::GatewayError;
use crate::executor::{ExecutionResult, QueryExecutor};
use crate::response::ToolResponse;

/// Main QueryGate coordinator: validate, then execute
pub struct QueryGateway {
    policy: Arc<Policy>,
    pool: Arc<ConnectionPool>,
    cache: Option<Arc<CacheManager>>,
    executor: QueryExecutor,
    default_timeout: Duration,
}

impl std::fmt::Debug for QueryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryGateway")
            .field("executor", &self.executor)
            .field("cache", &self.cache)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl QueryGateway {
    /// Build the gateway. A malformed policy or configuration refuses to start.
    pub async fn new(config: AppConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let policy = Arc::new(Policy::from_config(&config.policy)?);

        let pool = ConnectionPool::initialize(&config.database.path, &config.database).await?;

        let cache = if config.cache.enabled {
            Some(Arc::new(CacheManager::from_config(&config.cache)?))
        } else {
            None
        };

        let mut executor = QueryExecutor::new(
            Arc::clone(&pool),
            policy.max_row_cap(),
            config.database.acquire_timeout(),
        )
        .with_profile(config.query.collect_profile);
        if let Some(cache) = &cache {
            executor = executor.with_cache(Arc::clone(cache), &config.cache);
        }

        tracing::info!(
            tables = policy.allowed_tables().count(),
            cache_enabled = cache.is_some(),
            "query gateway ready"
        );

        Ok(Self {
            policy,
            pool,
            cache,
            executor,
            default_timeout: config.query.default_timeout(),
        })
    }

    /// Validate without executing
    pub fn validate(&self, raw_text: &str) -> Result<ValidatedQuery, ValidationError> {
        query_policy::validate(raw_text, &self.policy)
    }

    /// Validate and execute with the configured default timeout
    pub async fn run(&self, raw_text: &str) -> Result<ExecutionResult, GatewayError> {
        self.run_with_timeout(raw_text, self.default_timeout).await
    }

    pub async fn run_with_timeout(
        &self,
        raw_text: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, GatewayError> {
        let validated = match self.validate(raw_text) {
            Ok(validated) => validated,
            Err(e) => {
                debug_log!(error_kind = e.kind(), "query rejected");
                return Err(e.into());
            }
        };
        debug_log!(
            sql = validated.sql(),
            class = %validated.class(),
            cacheable = validated.is_cacheable(),
            "query validated"
        );

        Ok(self.executor.execute(&validated, timeout).await?)
    }

    /// Run and shape the outcome for the tool-call layer
    pub async fn run_tool(&self, raw_text: &str) -> ToolResponse {
        self.run(raw_text).await.into()
    }

    pub async fn run_tool_with_timeout(&self, raw_text: &str, timeout: Duration) -> ToolResponse {
        self.run_with_timeout(raw_text, timeout).await.into()
    }

    /// Check database connectivity through the pool
    pub async fn health_check(&self) -> Result<(), GatewayError> {
        self.executor.ping().await?;
        Ok(())
    }

    /// Shut the pool down; later runs fail with `PoolClosed`
    pub fn close(&self) {
        self.pool.close();
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}
