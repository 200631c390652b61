//! Error types for cache operations

use thiserror::Error;

/// Cache system errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid TTL value: {0} seconds")]
    InvalidTtl(u64),

    #[error("Invalid cache capacity: {0}")]
    InvalidCapacity(usize),
}
