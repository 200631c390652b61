//! Convenience re-exports for common QueryGate usage
//!
//! # Example
//!
//! ```rust
//! use querygate::prelude::*;
//!
//! let policy = Policy::from_config(&PolicyConfig::new(&["county_data"], 100, 100)).unwrap();
//! let validated = validate("SELECT * FROM county_data", &policy).unwrap();
//! assert!(validated.sql().ends_with("LIMIT 100"));
//! ```

// Core QueryGate components
pub use crate::core::QueryGateway;
pub use crate::errors::{ExecutionError, GatewayError};
pub use crate::executor::{ExecutionResult, QueryExecutor};
pub use crate::response::ToolResponse;

// Re-export centralized config
pub use config::{AppConfig, CacheConfig, DatabaseConfig, PolicyConfig, QueryConfig};

// Validation
pub use query_policy::prelude::*;

// Pool and cache
pub use cache_system::prelude::*;
pub use connection_pool::{ConnectionPool, PoolError, PoolGuard, PoolState, PoolStats};

// Common external dependencies
pub use anyhow;
pub use tokio;
