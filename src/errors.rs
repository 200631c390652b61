//! Error types for the QueryGate crate
//!
//! Every error a caller can see ends up in [`GatewayError`], which maps it to a
//! stable `errorKind` string and a message that never carries driver text.

use cache_system::CacheError;
use config::ConfigError;
use connection_pool::PoolError;
use query_policy::{PolicyError, ValidationError};
use thiserror::Error;

/// Coarse class of a database runtime failure, derived from the driver error
/// without exposing its message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeCategory {
    Binder,
    Catalog,
    Conversion,
    InvalidInput,
    OutOfMemory,
    Interrupted,
    Internal,
}

impl RuntimeCategory {
    /// Classify by the error class prefix DuckDB puts on its messages
    pub fn classify(error: &duckdb::Error) -> Self {
        let message = error.to_string();
        let lowered = message.to_ascii_lowercase();

        if lowered.contains("binder error") {
            RuntimeCategory::Binder
        } else if lowered.contains("catalog error") {
            RuntimeCategory::Catalog
        } else if lowered.contains("conversion error") || lowered.contains("out of range") {
            RuntimeCategory::Conversion
        } else if lowered.contains("invalid input error") || lowered.contains("parser error") {
            RuntimeCategory::InvalidInput
        } else if lowered.contains("out of memory") {
            RuntimeCategory::OutOfMemory
        } else if lowered.contains("interrupt") {
            RuntimeCategory::Interrupted
        } else {
            RuntimeCategory::Internal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeCategory::Binder => "binder",
            RuntimeCategory::Catalog => "catalog",
            RuntimeCategory::Conversion => "conversion",
            RuntimeCategory::InvalidInput => "invalid_input",
            RuntimeCategory::OutOfMemory => "out_of_memory",
            RuntimeCategory::Interrupted => "interrupted",
            RuntimeCategory::Internal => "internal",
        }
    }

    /// Caller-facing description
    pub fn message(&self) -> &'static str {
        match self {
            RuntimeCategory::Binder => "The query references a column or expression that does not exist or has the wrong type",
            RuntimeCategory::Catalog => "The query references an object that does not exist",
            RuntimeCategory::Conversion => "A value could not be converted to the requested type",
            RuntimeCategory::InvalidInput => "The query contains invalid input",
            RuntimeCategory::OutOfMemory => "The query needs more memory than is available",
            RuntimeCategory::Interrupted => "The query was interrupted",
            RuntimeCategory::Internal => "The query failed while executing",
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Query exceeded the {timeout_ms} ms time limit")]
    QueryTimeout { timeout_ms: u64 },

    #[error("{}", category.message())]
    RuntimeError { category: RuntimeCategory },
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Query rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("Query execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Invalid policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl GatewayError {
    /// Stable error kind reported to the tool-call layer
    pub fn error_kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(e) => e.kind(),
            GatewayError::Execution(ExecutionError::Pool(e)) | GatewayError::Pool(e) => e.kind(),
            GatewayError::Execution(ExecutionError::QueryTimeout { .. }) => "QueryTimeout",
            GatewayError::Execution(ExecutionError::RuntimeError { .. }) => "RuntimeError",
            GatewayError::Policy(_) => "PolicyError",
            GatewayError::Config(_) => "ConfigError",
            GatewayError::Cache(_) => "CacheError",
        }
    }

    /// Message safe to hand to the caller
    pub fn sanitized_message(&self) -> String {
        match self {
            GatewayError::Validation(e) => e.to_string(),
            GatewayError::Execution(ExecutionError::Pool(e)) | GatewayError::Pool(e) => {
                pool_message(e)
            }
            GatewayError::Execution(e) => e.to_string(),
            GatewayError::Policy(_) | GatewayError::Config(_) => {
                "The gateway is misconfigured".to_string()
            }
            GatewayError::Cache(_) => "The result cache is unavailable".to_string(),
        }
    }

    /// Hints for the query generator; empty when there is nothing useful to say
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            GatewayError::Validation(e) => e.suggestions(),
            GatewayError::Execution(ExecutionError::QueryTimeout { .. }) => vec![
                "Add filters or aggregate to reduce the work the query does".to_string(),
                "Avoid joins without a join condition".to_string(),
            ],
            GatewayError::Execution(ExecutionError::RuntimeError { category }) => match category {
                RuntimeCategory::Binder | RuntimeCategory::Catalog => {
                    vec!["Check column and table names against the schema".to_string()]
                }
                RuntimeCategory::Conversion => {
                    vec!["Cast values explicitly before comparing them".to_string()]
                }
                _ => Vec::new(),
            },
            GatewayError::Execution(ExecutionError::Pool(PoolError::PoolExhausted { .. }))
            | GatewayError::Pool(PoolError::PoolExhausted { .. }) => {
                vec!["The gateway is busy, retry shortly".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

fn pool_message(error: &PoolError) -> String {
    match error {
        PoolError::PoolExhausted { timeout_ms } => {
            format!("No database connection became available within {} ms", timeout_ms)
        }
        PoolError::PoolClosed => "The gateway is shutting down".to_string(),
        PoolError::EncryptionAttachFailed { .. } => {
            "The encrypted database could not be opened".to_string()
        }
        PoolError::ConnectionCreateFailed(_) => {
            "A database connection could not be created".to_string()
        }
        PoolError::InvalidConfig(_) | PoolError::Config(_) => {
            "The gateway is misconfigured".to_string()
        }
    }
}
