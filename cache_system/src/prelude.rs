//! Convenience re-exports for common cache-system usage

// Core cache system components
pub use crate::entry::CacheEntry;
pub use crate::errors::CacheError;
pub use crate::manager::CacheManager;

// Re-export centralized config
pub use config::CacheConfig;
