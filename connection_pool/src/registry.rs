//! Process-wide engine registry
//!
//! DuckDB allows a single database instance per file inside a process, so
//! every pool opened on the same storage path must share one engine. The
//! registry hands out `Arc<Engine>` and only keeps weak references itself:
//! once the last pool using an engine closes, the engine is released.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use config::SecretString;
use duckdb::{AccessMode, Config, Connection};

use crate::errors::PoolError;

/// Catalog alias under which encrypted storage is attached
pub const ATTACH_ALIAS: &str = "gateway_data";

static ENGINES: OnceLock<Mutex<HashMap<PathBuf, Weak<Engine>>>> = OnceLock::new();

fn engines() -> &'static Mutex<HashMap<PathBuf, Weak<Engine>>> {
    ENGINES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// How an engine reaches its storage
#[derive(Clone)]
pub struct EngineOptions {
    pub read_only: bool,
    pub encryption_key: Option<SecretString>,
    pub encryption_cipher: String,
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("read_only", &self.read_only)
            .field("encrypted", &self.encryption_key.is_some())
            .field("encryption_cipher", &self.encryption_cipher)
            .finish()
    }
}

/// One database instance. The root connection is never handed out; pooled
/// connections are clones of it.
pub struct Engine {
    path: PathBuf,
    root: Mutex<Connection>,
    read_only: bool,
    attach_statement: Option<String>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .field("encrypted", &self.attach_statement.is_some())
            .finish()
    }
}

impl Engine {
    fn open(path: &Path, options: &EngineOptions) -> Result<Self, PoolError> {
        let path_text = path.display().to_string();

        match &options.encryption_key {
            None => {
                let access_mode = if options.read_only {
                    AccessMode::ReadOnly
                } else {
                    AccessMode::ReadWrite
                };
                let flags = Config::default()
                    .access_mode(access_mode)
                    .and_then(|config| config.enable_external_access(false))
                    .map_err(|e| PoolError::ConnectionCreateFailed(e.to_string()))?;
                let root = Connection::open_with_flags(path, flags).map_err(|e| {
                    PoolError::ConnectionCreateFailed(format!("cannot open '{}': {}", path_text, e))
                })?;

                Ok(Self {
                    path: path.to_path_buf(),
                    root: Mutex::new(root),
                    read_only: options.read_only,
                    attach_statement: None,
                })
            }
            Some(key) => {
                let root = Connection::open_in_memory()
                    .map_err(|e| PoolError::ConnectionCreateFailed(e.to_string()))?;
                let statement = attach_statement(
                    &path_text,
                    key,
                    &options.encryption_cipher,
                    options.read_only,
                );
                if let Err(e) = root.execute_batch(&statement) {
                    // The driver message may echo the statement, so only its category is logged.
                    tracing::warn!(path = %path_text, error_kind = error_category(&e), "encrypted attach failed");
                    return Err(PoolError::EncryptionAttachFailed { path: path_text });
                }

                Ok(Self {
                    path: path.to_path_buf(),
                    root: Mutex::new(root),
                    read_only: options.read_only,
                    attach_statement: Some(statement),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypted(&self) -> bool {
        self.attach_statement.is_some()
    }

    /// Whether a pool asking for `options` can run on this engine: same access
    /// mode, and for encrypted storage the same key and cipher.
    fn serves(&self, options: &EngineOptions) -> bool {
        let expected = options.encryption_key.as_ref().map(|key| {
            attach_statement(
                &self.path.display().to_string(),
                key,
                &options.encryption_cipher,
                options.read_only,
            )
        });
        self.read_only == options.read_only && self.attach_statement == expected
    }

    /// Open a new connection on this engine, attached and switched to the
    /// encrypted catalog when the storage is encrypted.
    pub fn connect(&self) -> Result<Connection, PoolError> {
        let connection = {
            let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
            root.try_clone()
                .map_err(|e| PoolError::ConnectionCreateFailed(e.to_string()))?
        };

        if let Some(statement) = &self.attach_statement {
            connection.execute_batch(statement).map_err(|e| {
                tracing::warn!(path = %self.path.display(), error_kind = error_category(&e), "encrypted attach failed");
                PoolError::EncryptionAttachFailed {
                    path: self.path.display().to_string(),
                }
            })?;
        }

        Ok(connection)
    }
}

/// Fetch the live engine for `path` or open a new one.
///
/// A live engine opened with a different access mode or encryption setup is
/// never reused: the request fails with `InvalidConfig`.
pub fn engine_for(path: &Path, options: &EngineOptions) -> Result<Arc<Engine>, PoolError> {
    let key = canonical_path(path)?;
    let mut registry = engines().lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(engine) = registry.get(&key).and_then(Weak::upgrade) {
        if !engine.serves(options) {
            tracing::warn!(path = %key.display(), "engine already open with different options");
            return Err(PoolError::InvalidConfig(format!(
                "'{}' is already open with a different access mode or encryption setup",
                key.display()
            )));
        }
        return Ok(engine);
    }

    let engine = Arc::new(Engine::open(&key, options)?);
    registry.retain(|_, weak| weak.strong_count() > 0);
    registry.insert(key, Arc::downgrade(&engine));
    Ok(engine)
}

/// Whether an engine for `path` is still alive somewhere in the process
pub fn is_registered(path: &Path) -> bool {
    let Ok(key) = canonical_path(path) else {
        return false;
    };
    engines()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .is_some_and(|weak| weak.strong_count() > 0)
}

/// Canonical form of a storage path. A file that does not exist yet is keyed
/// by its canonical parent directory plus its file name.
pub fn canonical_path(path: &Path) -> Result<PathBuf, PoolError> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    let file_name = path.file_name().ok_or_else(|| {
        PoolError::InvalidConfig(format!("'{}' is not a file path", path.display()))
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match parent.canonicalize() {
        Ok(parent) => Ok(parent.join(file_name)),
        Err(_) => std::path::absolute(path).map_err(|e| {
            PoolError::InvalidConfig(format!("cannot resolve '{}': {}", path.display(), e))
        }),
    }
}

fn attach_statement(path: &str, key: &SecretString, cipher: &str, read_only: bool) -> String {
    let mut options = format!(
        "ENCRYPTION_KEY '{}', ENCRYPTION_CIPHER '{}'",
        escape_literal(key.expose()),
        escape_literal(cipher)
    );
    if read_only {
        options.push_str(", READ_ONLY");
    }
    format!(
        "ATTACH IF NOT EXISTS '{}' AS {} ({}); USE {};",
        escape_literal(path),
        ATTACH_ALIAS,
        options,
        ATTACH_ALIAS
    )
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn error_category(error: &duckdb::Error) -> &'static str {
    match error {
        duckdb::Error::DuckDBFailure(_, _) => "engine_failure",
        _ => "driver_failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_statement_escapes_literals() {
        let key = SecretString::new("it's-secret".to_string());
        let statement = attach_statement("/data/o'neil.db", &key, "GCM", true);

        assert_eq!(
            statement,
            "ATTACH IF NOT EXISTS '/data/o''neil.db' AS gateway_data \
             (ENCRYPTION_KEY 'it''s-secret', ENCRYPTION_CIPHER 'GCM', READ_ONLY); USE gateway_data;"
        );
    }

    #[test]
    fn test_attach_statement_read_write() {
        let key = SecretString::new("k".to_string());
        let statement = attach_statement("/data/x.db", &key, "CTR", false);
        assert!(!statement.contains("READ_ONLY"));
        assert!(statement.contains("ENCRYPTION_CIPHER 'CTR'"));
    }

    #[test]
    fn test_options_debug_hides_key() {
        let options = EngineOptions {
            read_only: true,
            encryption_key: Some(SecretString::new("hunter2".to_string())),
            encryption_cipher: "GCM".to_string(),
        };
        let debug = format!("{:?}", options);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("encrypted: true"));
    }

    #[test]
    fn test_live_engine_requires_matching_access_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modes.db");
        drop(Connection::open(&path).unwrap());

        let read_only = EngineOptions {
            read_only: true,
            encryption_key: None,
            encryption_cipher: "GCM".to_string(),
        };
        let read_write = EngineOptions {
            read_only: false,
            ..read_only.clone()
        };

        let engine = engine_for(&path, &read_only).unwrap();
        assert!(matches!(
            engine_for(&path, &read_write),
            Err(PoolError::InvalidConfig(_))
        ));
        assert!(Arc::ptr_eq(&engine, &engine_for(&path, &read_only).unwrap()));
    }

    #[test]
    fn test_canonical_path_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not_yet.db");
        let canonical = canonical_path(&missing).unwrap();

        assert_eq!(canonical.file_name().unwrap(), "not_yet.db");
        assert_eq!(canonical.parent().unwrap(), dir.path().canonicalize().unwrap());
    }
}
