//! Cache system for query results
//!
//! An in-process key/value store on `moka` with per-entry TTL. It knows
//! nothing about SQL: keys and payloads are opaque strings, and nothing
//! survives a restart.

pub mod entry;
pub mod errors;
pub mod manager;
pub mod prelude;

// Re-export centralized config
pub use config::CacheConfig;

pub use entry::CacheEntry;
pub use errors::CacheError;
pub use manager::CacheManager;
