//! # QueryGate
//!
//! A validating gateway between untrusted, machine-generated SQL and a shared
//! DuckDB database. Every query is parsed and checked against a static policy,
//! capped to a row limit, executed on a bounded connection pool under a
//! timeout, and optionally served from an in-process result cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use querygate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig {
//!         database: DatabaseConfig::new("census.duckdb".to_string(), 1, 4, 5_000),
//!         query: QueryConfig::new(30_000),
//!         cache: CacheConfig::new(true, 300, 1024),
//!         policy: PolicyConfig::new(&["county_data"], 1000, 1000),
//!     };
//!
//!     let gateway = QueryGateway::new(config).await?;
//!     let response = gateway
//!         .run_tool("SELECT state, sum(population) FROM county_data GROUP BY state")
//!         .await;
//!     println!("{}", response.to_json());
//!
//!     gateway.close();
//!     Ok(())
//! }
//! ```

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

pub mod core;
pub mod errors;
pub mod executor;
pub mod prelude;
pub mod response;

// Re-export the main public types for convenience
pub use crate::core::QueryGateway;
pub use errors::{ExecutionError, GatewayError, RuntimeCategory};
pub use executor::{ExecutionResult, QueryExecutor, QueryProfile};
pub use response::{FailureResponse, ResultMetadata, SuccessResponse, ToolResponse};

// Re-export centralized config
pub use config::{AppConfig, CacheConfig, DatabaseConfig, PolicyConfig, QueryConfig};

// Re-export internal crates used by the public API
pub use cache_system;
pub use connection_pool;
pub use query_policy;
pub use type_mapping;
