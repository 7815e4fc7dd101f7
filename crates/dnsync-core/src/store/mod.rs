// # Durable Store
//
// File-backed, schema-validated JSON persistence with transactional writes.
//
// ## Layout
//
// One document per [`Schema`] in the data directory:
//
// ```text
// dns-records.json          array of tracked records
// preserved-hostnames.json  array of hostnames
// managed-hostnames.json    array of managed hostname objects
// config.json               runtime configuration
// ```
//
// ## Crash Recovery
//
// - Every write runs inside a [`Transaction`] holding the file's lock
// - Backups are taken before the atomic write-then-rename
// - On open, artifacts of interrupted transactions are restored first
// - A document that fails to parse is moved aside and replaced with an empty one
//
// Reads are served from an in-memory cache populated on open and on
// [`DurableStore::refresh_cache`].

pub mod lock;
pub mod migration;
pub mod schema;
pub mod transaction;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

pub use lock::FileLock;
pub use schema::Schema;
pub use transaction::{Transaction, TransactionManager};

/// Lock attempts before a write gives up with `Error::FileLock`
const LOCK_ATTEMPTS: usize = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// `path` with `suffix` appended to its file name
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Transactional JSON document store
#[derive(Debug)]
pub struct DurableStore {
    dir: PathBuf,
    cache: RwLock<HashMap<Schema, Value>>,
    /// Serializes read-modify-write cycles within this process
    write_guard: Mutex<()>,
    transactions: TransactionManager,
}

impl DurableStore {
    /// Open (or create) the store in `dir`.
    ///
    /// This will:
    /// 1. Create the directory if needed
    /// 2. Restore files left by interrupted transactions
    /// 3. Load and validate every document into the cache
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::config(format!(
                "Failed to create data directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let restored = transaction::recover(&dir).await?;
        if restored > 0 {
            warn!(dir = %dir.display(), restored, "Restored files from interrupted transactions");
        }

        let mut cache = HashMap::new();
        for schema in Schema::ALL {
            cache.insert(schema, load_with_recovery(&dir, schema).await?);
        }
        info!(dir = %dir.display(), "Durable store opened");

        Ok(Self {
            dir,
            cache: RwLock::new(cache),
            write_guard: Mutex::new(()),
            transactions: TransactionManager::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `schema`
    pub fn path(&self, schema: Schema) -> PathBuf {
        self.dir.join(schema.file_name())
    }

    /// Cached document for `schema`
    pub async fn read(&self, schema: Schema) -> Value {
        self.cache
            .read()
            .await
            .get(&schema)
            .cloned()
            .unwrap_or_else(|| schema.empty_value())
    }

    /// Cached document for `schema`, deserialized
    pub async fn read_as<T: DeserializeOwned>(&self, schema: Schema) -> Result<T> {
        Ok(serde_json::from_value(self.read(schema).await)?)
    }

    /// Replace the document for `schema`.
    ///
    /// Invalid values are rejected before anything touches disk, and the
    /// cache is only updated after the transaction committed.
    pub async fn write(&self, schema: Schema, value: Value) -> Result<()> {
        schema.validate(&value)?;
        let _guard = self.write_guard.lock().await;
        self.persist(schema, value).await
    }

    /// Serialize and write `value`
    pub async fn write_as<T: Serialize>(&self, schema: Schema, value: &T) -> Result<()> {
        self.write(schema, serde_json::to_value(value)?).await
    }

    /// Typed read-modify-write of one document in a single transaction.
    ///
    /// `f` runs under the store's write guard. If it fails, nothing is
    /// written. An unchanged document is not rewritten.
    pub async fn modify<T, R, F>(&self, schema: Schema, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let _guard = self.write_guard.lock().await;

        let current = self.read(schema).await;
        let mut doc: T = serde_json::from_value(current.clone())?;
        let out = f(&mut doc)?;

        let updated = serde_json::to_value(&doc)?;
        if updated == current {
            return Ok(out);
        }
        schema.validate(&updated)?;
        self.persist(schema, updated).await?;
        Ok(out)
    }

    /// Re-read every document from disk.
    ///
    /// A document that fails validation keeps its previous cached value and
    /// the first such failure is returned.
    pub async fn refresh_cache(&self) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut first_error = None;

        for schema in Schema::ALL {
            match load(&self.path(schema), schema).await {
                Ok(value) => {
                    self.cache.write().await.insert(schema, value);
                }
                Err(e) => {
                    error!(schema = %schema, error = %e, "Keeping cached document, file on disk is invalid");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("Store cache refreshed");
                Ok(())
            }
        }
    }

    /// Write `value` to disk in a transaction, then update the cache.
    ///
    /// Caller holds the write guard and has validated `value`.
    async fn persist(&self, schema: Schema, value: Value) -> Result<()> {
        let path = self.path(schema);
        let bytes = serde_json::to_vec_pretty(&value)?;

        let lock = FileLock::acquire_with_retry(&path, LOCK_ATTEMPTS, LOCK_RETRY_DELAY).await?;
        let mut tx = self.transactions.begin();

        let result = match tx.write_file(&path, &bytes).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(schema = %schema, error = %rollback_err, "Rollback after failed write also failed");
                }
                Err(e)
            }
        };
        if let Err(e) = result {
            lock.release_logged().await;
            return Err(e);
        }

        self.cache.write().await.insert(schema, value);
        lock.release_logged().await;
        debug!(schema = %schema, txn = %tx.id(), "Document written");
        Ok(())
    }
}

async fn load(path: &Path, schema: Schema) -> Result<Value> {
    if !fs::try_exists(path).await? {
        return Ok(schema.empty_value());
    }
    let content = fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(schema.empty_value());
    }
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| Error::validation(format!("{} is not valid JSON: {}", schema, e)))?;
    schema.validate(&value)?;
    Ok(value)
}

/// Load a document; a corrupt one is moved aside and replaced by an empty value
async fn load_with_recovery(dir: &Path, schema: Schema) -> Result<Value> {
    let path = dir.join(schema.file_name());
    match load(&path, schema).await {
        Ok(value) => Ok(value),
        Err(Error::Validation(msg)) => {
            let aside = sibling_path(
                &path,
                &format!(".corrupt.{}", chrono::Utc::now().timestamp_millis()),
            );
            error!(
                schema = %schema,
                error = %msg,
                moved_to = %aside.display(),
                "Document is corrupted, starting with an empty one"
            );
            fs::rename(&path, &aside).await?;
            Ok(schema.empty_value())
        }
        Err(e) => Err(e),
    }
}
