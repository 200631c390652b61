//! Connection Pool - bounded DuckDB connection pool for the query gateway
//!
//! Pools share one engine per storage path through a process-wide registry.
//! Connections are handed out as [`PoolGuard`]s, which return them on drop.

pub mod connection;
pub mod errors;
pub mod pool;
pub mod registry;

// Re-export the main public types for convenience
pub use connection::{ConnectionState, PoolGuard, PooledConnection};
pub use errors::PoolError;
pub use pool::{ConnectionPool, PoolState, PoolStats};
pub use registry::ATTACH_ALIAS;
