//! # Configuration Management for QueryGate
//!
//! This crate provides centralized configuration structures for all QueryGate components:
//! the storage/pool settings, query execution defaults, the result cache and the static
//! query policy.
//!
//! ## TOML File Configuration
//! ```toml
//! [database]
//! path = "data/county_health.duckdb"
//! encryption_key_env = "QUERYGATE_DB_KEY"   # optional
//! encryption_cipher = "GCM"
//! read_only = true
//! min_connections = 2
//! max_connections = 8
//! acquire_timeout_ms = 5000
//! connection_retry_backoff_ms = 100
//!
//! [query]
//! default_timeout_ms = 30000
//! collect_profile = false
//!
//! [cache]
//! enabled = true
//! default_ttl_seconds = 300
//! aggregate_ttl_seconds = 3600
//! max_entries = 1024
//!
//! [policy]
//! allowed_tables = ["county_data", "state_data"]
//! volatile_tables = []
//! allowed_statements = ["select"]
//! disallowed_functions = ["read_csv", "read_parquet", "glob", "getenv"]
//! time_relative_functions = ["now", "current_date", "current_timestamp"]
//! default_row_cap = 1000
//! max_row_cap = 5000
//! cacheable_query_classes = ["aggregate", "detail"]
//! ```
//!
//! Load configuration:
//! ```rust,no_run
//! use config::AppConfig;
//!
//! // Load from QUERYGATE_CONFIG or ./querygate.toml
//! let config = AppConfig::load()?;
//!
//! // Or load from custom path
//! let config = AppConfig::from_file("config/production.toml")?;
//! # Ok::<(), config::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::{env, fmt, path::Path, time::Duration};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./querygate.toml";
const CONFIG_PATH_ENV: &str = "QUERYGATE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Environment variable error: {0}")]
    Env(#[from] env::VarError),
    #[error("Dotenvy error: {0}")]
    Dotenvy(#[from] dotenvy::Error),
    #[error("Secret '{0}' is configured but not set in the environment")]
    MissingSecret(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub policy: PolicyConfig,
}

/// Storage and connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the DuckDB storage file
    pub path: String,
    /// Name of the environment variable holding the storage encryption key
    #[serde(default)]
    pub encryption_key_env: Option<String>,
    #[serde(default = "default_cipher")]
    pub encryption_cipher: String,
    #[serde(default = "default_read_only")]
    pub read_only: bool,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub connection_retry_backoff_ms: u64,
}

/// Query execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_timeout_ms: u64,
    /// Attach a timing profile to every execution result
    #[serde(default)]
    pub collect_profile: bool,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_seconds: u64,
    /// TTL override for aggregate queries (GROUP BY / aggregate projections)
    #[serde(default)]
    pub aggregate_ttl_seconds: Option<u64>,
    /// TTL override for row-level queries
    #[serde(default)]
    pub detail_ttl_seconds: Option<u64>,
    pub max_entries: usize,
}

/// Static query policy, as written in the configuration file.
///
/// This is the loosely-typed form; `query_policy::Policy::from_config` turns it into the
/// immutable record the validator consumes and refuses anything malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub allowed_tables: Vec<String>,
    #[serde(default)]
    pub volatile_tables: Vec<String>,
    pub allowed_statements: Vec<String>,
    pub disallowed_functions: Vec<String>,
    pub time_relative_functions: Vec<String>,
    pub default_row_cap: u64,
    pub max_row_cap: u64,
    pub cacheable_query_classes: Vec<String>,
}

/// A secret value that never shows up in `Debug` or `Display` output
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Access the raw secret. Callers must not log the returned value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

fn default_cipher() -> String {
    "GCM".to_string()
}

fn default_read_only() -> bool {
    true
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl AppConfig {
    /// Load configuration from the TOML file named by QUERYGATE_CONFIG (.env aware) or defaults
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            Self::from_file(&config_path)
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::from_file(DEFAULT_CONFIG_PATH)
        } else {
            Err(ConfigError::Invalid(format!(
                "Config path must be specified as {} (environment or .env) or in {} file",
                CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH
            )))
        }
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Database validations
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Database path cannot be empty".to_string(),
            ));
        }
        if self.database.min_connections == 0 {
            return Err(ConfigError::Invalid(
                "Database min_connections must be greater than 0".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(
                "Database min_connections cannot be greater than max_connections".to_string(),
            ));
        }
        if self.database.acquire_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Database acquire_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(name) = &self.database.encryption_key_env {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "Database encryption_key_env cannot be empty when set".to_string(),
                ));
            }
            if self.database.encryption_cipher.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "Database encryption_cipher cannot be empty when encryption is enabled"
                        .to_string(),
                ));
            }
        }

        // Query validations
        if self.query.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Query default_timeout_ms must be greater than 0".to_string(),
            ));
        }

        // Cache validations
        if self.cache.enabled {
            if self.cache.default_ttl_seconds == 0 {
                return Err(ConfigError::Invalid(
                    "Cache default_ttl_seconds must be greater than 0".to_string(),
                ));
            }
            if self.cache.max_entries == 0 {
                return Err(ConfigError::Invalid(
                    "Cache max_entries must be greater than 0".to_string(),
                ));
            }
        }

        // Policy validations (structure only, semantics are checked by the policy builder)
        if self.policy.allowed_tables.is_empty() {
            return Err(ConfigError::Invalid(
                "Policy allowed_tables cannot be empty".to_string(),
            ));
        }
        if self.policy.allowed_statements.is_empty() {
            return Err(ConfigError::Invalid(
                "Policy allowed_statements cannot be empty".to_string(),
            ));
        }
        if self.policy.default_row_cap == 0 || self.policy.max_row_cap == 0 {
            return Err(ConfigError::Invalid(
                "Policy row caps must be greater than 0".to_string(),
            ));
        }
        if self.policy.default_row_cap > self.policy.max_row_cap {
            return Err(ConfigError::Invalid(
                "Policy default_row_cap cannot be greater than max_row_cap".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Create a new unencrypted, read-only database configuration
    pub fn new(
        path: String,
        min_connections: u32,
        max_connections: u32,
        acquire_timeout_ms: u64,
    ) -> Self {
        Self {
            path,
            encryption_key_env: None,
            encryption_cipher: default_cipher(),
            read_only: default_read_only(),
            min_connections,
            max_connections,
            acquire_timeout_ms,
            connection_retry_backoff_ms: default_retry_backoff_ms(),
        }
    }

    pub fn with_encryption(mut self, key_env: &str, cipher: &str) -> Self {
        self.encryption_key_env = Some(key_env.to_string());
        self.encryption_cipher = cipher.to_string();
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_retry_backoff(mut self, backoff_ms: u64) -> Self {
        self.connection_retry_backoff_ms = backoff_ms;
        self
    }

    /// Resolve the encryption key from the environment.
    ///
    /// Returns `Ok(None)` when encryption is not configured and an error when it is
    /// configured but the variable is missing, so a misconfigured deployment never
    /// silently falls back to opening the storage unencrypted.
    pub fn encryption_key(&self) -> Result<Option<SecretString>, ConfigError> {
        let Some(name) = &self.encryption_key_env else {
            return Ok(None);
        };
        match env::var(name) {
            Ok(value) if !value.is_empty() => Ok(Some(SecretString::new(value))),
            Ok(_) | Err(env::VarError::NotPresent) => Err(ConfigError::MissingSecret(name.clone())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.connection_retry_backoff_ms)
    }
}

impl QueryConfig {
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            default_timeout_ms,
            collect_profile: false,
        }
    }

    pub fn with_profile(mut self, collect_profile: bool) -> Self {
        self.collect_profile = collect_profile;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self::new(30_000)
    }
}

impl CacheConfig {
    /// Create a new cache configuration
    pub fn new(enabled: bool, default_ttl_seconds: u64, max_entries: usize) -> Self {
        Self {
            enabled,
            default_ttl_seconds,
            aggregate_ttl_seconds: None,
            detail_ttl_seconds: None,
            max_entries,
        }
    }

    pub fn with_class_ttls(mut self, aggregate: Option<u64>, detail: Option<u64>) -> Self {
        self.aggregate_ttl_seconds = aggregate;
        self.detail_ttl_seconds = detail;
        self
    }

    /// Get default TTL as Duration
    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(false, 300, 1024)
    }
}

impl PolicyConfig {
    /// Create a read-only policy over the given tables with the standard deny lists
    pub fn new(allowed_tables: &[&str], default_row_cap: u64, max_row_cap: u64) -> Self {
        Self {
            allowed_tables: allowed_tables.iter().map(|t| t.to_string()).collect(),
            volatile_tables: Vec::new(),
            allowed_statements: vec!["select".to_string()],
            disallowed_functions: Self::standard_disallowed_functions(),
            time_relative_functions: Self::standard_time_relative_functions(),
            default_row_cap,
            max_row_cap,
            cacheable_query_classes: vec!["aggregate".to_string(), "detail".to_string()],
        }
    }

    /// File access, extension loading and shell-style functions DuckDB exposes
    pub fn standard_disallowed_functions() -> Vec<String> {
        [
            "read_csv",
            "read_csv_auto",
            "read_parquet",
            "parquet_scan",
            "read_json",
            "read_json_auto",
            "read_ndjson",
            "read_text",
            "read_blob",
            "glob",
            "sniff_csv",
            "getenv",
            "load_extension",
            "install_extension",
            "duckdb_extensions",
            "duckdb_settings",
            "duckdb_secrets",
            "system",
            "shell",
            "query",
            "query_table",
            "sqlite_scan",
            "postgres_scan",
            "mysql_scan",
            "iceberg_scan",
            "delta_scan",
            "httpfs",
            "current_setting",
            "pragma",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn standard_time_relative_functions() -> Vec<String> {
        [
            "now",
            "current_date",
            "current_time",
            "current_timestamp",
            "current_localtime",
            "current_localtimestamp",
            "localtime",
            "localtimestamp",
            "get_current_time",
            "get_current_timestamp",
            "today",
            "transaction_timestamp",
            "random",
            "uuid",
            "gen_random_uuid",
            "setseed",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn with_volatile_tables(mut self, tables: &[&str]) -> Self {
        self.volatile_tables = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_cacheable_classes(mut self, classes: &[&str]) -> Self {
        self.cacheable_query_classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }
}
