use config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("No database connection became available within {timeout_ms} ms")]
    PoolExhausted { timeout_ms: u64 },

    #[error("Failed to create database connection: {0}")]
    ConnectionCreateFailed(String),

    #[error("Failed to attach encrypted storage at '{path}'")]
    EncryptionAttachFailed { path: String },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PoolError {
    /// Stable error kind reported to the tool-call layer
    pub fn kind(&self) -> &'static str {
        match self {
            PoolError::PoolExhausted { .. } => "PoolExhausted",
            PoolError::ConnectionCreateFailed(_) => "ConnectionCreateFailed",
            PoolError::EncryptionAttachFailed { .. } => "EncryptionAttachFailed",
            PoolError::PoolClosed => "PoolClosed",
            PoolError::InvalidConfig(_) | PoolError::Config(_) => "ConfigError",
        }
    }
}
