use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 512 * 1024 * 1024;

// ============================================================================
// Keys
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    /// Key under the incident collection namespace.
    pub fn incidents(slot: impl Into<String>) -> Result<Self, KvError> {
        Self::new(KeyNamespace::Incidents, slot)
    }

    #[must_use]
    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    /// Filesystem-safe form of [`raw`](Self::raw).
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!("{}.{}", self.namespace.prefix(), self.key)
    }

    #[must_use]
    pub fn namespace(&self) -> KeyNamespace {
        self.namespace
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        let invalid = |reason: &str| KvError::InvalidKey {
            key: key.chars().take(50).collect(),
            reason: reason.to_string(),
        };

        if key.trim().is_empty() {
            return Err(invalid("key cannot be empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(invalid("key exceeds maximum length"));
        }
        if key.contains("..") {
            return Err(invalid("key cannot contain path traversal sequences"));
        }
        if key.contains(['/', '\\', ':']) {
            return Err(invalid("key cannot contain path separators"));
        }
        if key.chars().any(char::is_control) {
            return Err(invalid("key contains control characters"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Incidents,
}

impl KeyNamespace {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            KeyNamespace::Incidents => "incidents",
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error ({code:?}): {message}")]
    Storage {
        code: StorageErrorCode,
        message: String,
        retryable: bool,
    },
}

impl KvError {
    fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
        }
    }
}

impl From<std::io::Error> for KvError {
    fn from(e: std::io::Error) -> Self {
        let code = match e.kind() {
            std::io::ErrorKind::PermissionDenied => StorageErrorCode::PermissionDenied,
            std::io::ErrorKind::InvalidData => StorageErrorCode::Corrupted,
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => {
                StorageErrorCode::Busy
            }
            _ => StorageErrorCode::IoError,
        };
        Self::storage(code, e.to_string())
    }
}

impl From<tokio::task::JoinError> for KvError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::storage(StorageErrorCode::Unknown, format!("storage task failed: {e}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    Corrupted,
    PermissionDenied,
    Busy,
    Locked,
    IoError,
}

impl StorageErrorCode {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, StorageErrorCode::Busy | StorageErrorCode::Locked)
    }
}

fn check_value_size(value: &[u8]) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

// ============================================================================
// Store trait
// ============================================================================

/// Durable string-keyed byte storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError>;

    /// Replaces the value atomically; readers never observe a partial write.
    async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &KvKey) -> Result<bool, KvError>;
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.entries.read().await.get(&key.raw()).cloned())
    }

    async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
        check_value_size(&value)?;
        self.entries.write().await.insert(key.raw(), value);
        Ok(())
    }

    async fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        Ok(self.entries.write().await.remove(&key.raw()).is_some())
    }
}

// ============================================================================
// File-backed
// ============================================================================

/// One JSON file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, KvError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &KvKey) -> PathBuf {
        self.root.join(format!("{}.json", key.file_stem()))
    }
}

fn write_atomically(path: &Path, value: &[u8]) -> Result<(), KvError> {
    let tmp_path = path.with_extension("tmp");

    let mut file = File::create(&tmp_path)?;
    file.write_all(value)?;
    file.sync_all()?;

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await?
    }

    async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
        check_value_size(&value)?;
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || write_atomically(&path, &value)).await?
    }

    async fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await?
    }
}

// ============================================================================
// SQLite
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteKeyValueStore;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use super::{check_value_size, KeyValueStore, KvError, KvKey, StorageErrorCode};
    use async_trait::async_trait;
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Single-table key-value store. Writes are transactional per key.
    #[derive(Clone)]
    pub struct SqliteKeyValueStore {
        conn: Arc<Mutex<Connection>>,
    }

    impl SqliteKeyValueStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let conn = Connection::open(path).map_err(map_sqlite_error)?;
            Self::init(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
            Self::init(conn)
        }

        fn init(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                ",
            )
            .map_err(map_sqlite_error)?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        }

        async fn with_conn<T, F>(&self, op: F) -> Result<T, KvError>
        where
            T: Send + 'static,
            F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        {
            let conn = Arc::clone(&self.conn);
            tokio::task::spawn_blocking(move || {
                let guard = conn.lock().map_err(|_| KvError::Storage {
                    code: StorageErrorCode::Locked,
                    message: "sqlite connection mutex poisoned".into(),
                    retryable: false,
                })?;
                op(&guard).map_err(map_sqlite_error)
            })
            .await?
        }
    }

    fn map_sqlite_error(e: rusqlite::Error) -> KvError {
        let code = match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                rusqlite::ErrorCode::DatabaseBusy => StorageErrorCode::Busy,
                rusqlite::ErrorCode::DatabaseLocked => StorageErrorCode::Locked,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    StorageErrorCode::Corrupted
                }
                rusqlite::ErrorCode::PermissionDenied | rusqlite::ErrorCode::ReadOnly => {
                    StorageErrorCode::PermissionDenied
                }
                _ => StorageErrorCode::IoError,
            },
            _ => StorageErrorCode::Unknown,
        };
        KvError::Storage {
            code,
            message: e.to_string(),
            retryable: code.is_retryable(),
        }
    }

    #[async_trait]
    impl KeyValueStore for SqliteKeyValueStore {
        async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
            let raw = key.raw();
            self.with_conn(move |conn| {
                conn.query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    params![raw],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()
            })
            .await
        }

        async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
            check_value_size(&value)?;
            let raw = key.raw();
            let now = chrono::Utc::now().timestamp_millis();
            self.with_conn(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO kv_entries (key, value, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    ",
                    params![raw, value, now],
                )
                .map(|_| ())
            })
            .await
        }

        async fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
            let raw = key.raw();
            self.with_conn(move |conn| {
                conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![raw])
                    .map(|deleted| deleted > 0)
            })
            .await
        }
    }
}
