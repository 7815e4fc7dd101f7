//! File transactions with backup-based rollback
//!
//! Before a transaction first mutates `path` it copies the current bytes to
//! `path.bak.<id>`, or writes the marker `path.bak.<id>.nonexistent` when the
//! file does not exist yet. Backups are synced before the mutation, so a
//! crash at any point leaves the prior content recoverable through
//! [`recover`].
//!
//! Writes go to `path.tmp.<id>` and are renamed into place.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::store::sibling_path;

const BACKUP_INFIX: &str = ".bak.";
const NONEXISTENT_SUFFIX: &str = ".nonexistent";
const TEMP_INFIX: &str = ".tmp.";

/// Issues transactions with process-unique ids
#[derive(Debug, Default)]
pub struct TransactionManager {
    counter: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new transaction
    pub fn begin(&self) -> Transaction {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = format!(
            "{}-{}-{}",
            Utc::now().timestamp_millis(),
            seq,
            std::process::id()
        );
        debug!(txn = %id, "Transaction started");
        Transaction {
            id,
            operations: Vec::new(),
            state: TxState::Active,
        }
    }
}

/// Kind of mutation a transaction applied to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Write,
    Delete,
}

#[derive(Debug)]
struct Operation {
    target: PathBuf,
    backup: PathBuf,
    /// Whether `target` existed before the transaction touched it
    existed: bool,
    kind: OperationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// An in-progress set of file mutations.
///
/// Exactly one of [`commit`](Transaction::commit) and
/// [`rollback`](Transaction::rollback) succeeds, once. Dropping an active
/// transaction rolls it back.
#[derive(Debug)]
pub struct Transaction {
    id: String,
    operations: Vec<Operation>,
    state: TxState,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    pub fn is_committed(&self) -> bool {
        self.state == TxState::Committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.state == TxState::RolledBack
    }

    /// Files touched so far, in order, with the mutation applied to each
    pub fn operations(&self) -> Vec<(&Path, OperationKind)> {
        self.operations
            .iter()
            .map(|op| (op.target.as_path(), op.kind))
            .collect()
    }

    /// Atomically replace `path` with `data`
    pub async fn write_file(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        self.ensure_active("write")?;
        self.backup(path, OperationKind::Write).await?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = sibling_path(path, &format!("{}{}", TEMP_INFIX, self.id));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove `path` if it exists
    pub async fn delete_file(&mut self, path: &Path) -> Result<()> {
        self.ensure_active("delete")?;
        self.backup(path, OperationKind::Delete).await?;

        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Keep every mutation and discard the backups
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_active("commit")?;
        self.state = TxState::Committed;

        for op in &self.operations {
            if let Err(e) = fs::remove_file(&op.backup).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(txn = %self.id, backup = %op.backup.display(), error = %e, "Failed to remove backup after commit");
            }
        }
        debug!(txn = %self.id, files = self.operations.len(), "Transaction committed");
        Ok(())
    }

    /// Restore every touched file to its pre-transaction state.
    ///
    /// Files are restored in reverse order. A missing backup artifact
    /// does not stop the remaining restores; the first such problem is
    /// returned as `Error::TransactionIntegrity` afterwards.
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_active("rollback")?;
        self.state = TxState::RolledBack;

        let mut integrity = None;
        for op in self.operations.iter().rev() {
            if let Err(e) = restore(op).await {
                error!(txn = %self.id, path = %op.target.display(), error = %e, "Rollback could not fully restore file");
                integrity.get_or_insert(e);
            }
        }

        match integrity {
            Some(e) => Err(e),
            None => {
                info!(txn = %self.id, files = self.operations.len(), "Transaction rolled back");
                Ok(())
            }
        }
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        match self.state {
            TxState::Active => Ok(()),
            TxState::Committed => Err(Error::transaction_state(format!(
                "cannot {} transaction {}: already committed",
                action, self.id
            ))),
            TxState::RolledBack => Err(Error::transaction_state(format!(
                "cannot {} transaction {}: already rolled back",
                action, self.id
            ))),
        }
    }

    async fn backup(&mut self, path: &Path, kind: OperationKind) -> Result<()> {
        // The first backup of a path holds its pre-transaction state
        if self.operations.iter().any(|op| op.target == path) {
            return Ok(());
        }

        let existed = fs::try_exists(path).await?;
        let backup = if existed {
            let backup = sibling_path(path, &format!("{}{}", BACKUP_INFIX, self.id));
            fs::copy(path, &backup).await?;
            fs::File::open(&backup).await?.sync_all().await?;
            backup
        } else {
            let marker = sibling_path(
                path,
                &format!("{}{}{}", BACKUP_INFIX, self.id, NONEXISTENT_SUFFIX),
            );
            let mut file = fs::File::create(&marker).await?;
            file.write_all(self.id.as_bytes()).await?;
            file.sync_all().await?;
            marker
        };

        self.operations.push(Operation {
            target: path.to_path_buf(),
            backup,
            existed,
            kind,
        });
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TxState::Active || self.operations.is_empty() {
            return;
        }
        warn!(txn = %self.id, "Active transaction dropped, rolling back");
        self.state = TxState::RolledBack;
        for op in self.operations.iter().rev() {
            if let Err(e) = restore_blocking(op) {
                error!(txn = %self.id, path = %op.target.display(), error = %e, "Rollback on drop failed");
            }
        }
    }
}

async fn restore(op: &Operation) -> Result<()> {
    if op.existed {
        if !fs::try_exists(&op.backup).await? {
            return Err(Error::transaction_integrity(
                &op.target,
                format!("backup {} is missing", op.backup.display()),
            ));
        }
        fs::rename(&op.backup, &op.target).await?;
        return Ok(());
    }

    // The file did not exist before; remove whatever the transaction left
    match fs::remove_file(&op.target).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    match fs::remove_file(&op.backup).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::transaction_integrity(
            &op.target,
            format!("marker {} is missing", op.backup.display()),
        )),
        Err(e) => Err(e.into()),
    }
}

fn restore_blocking(op: &Operation) -> std::io::Result<()> {
    if op.existed {
        return std::fs::rename(&op.backup, &op.target);
    }
    match std::fs::remove_file(&op.target) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    match std::fs::remove_file(&op.backup) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Restore files left mid-transaction by a crashed process.
///
/// Every `*.bak.<id>` backup is moved back over its target, every
/// `*.bak.<id>.nonexistent` marker removes its target, and stray
/// `*.tmp.<id>` files are deleted. Returns the number of files restored.
pub async fn recover(dir: &Path) -> Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut restored = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let artifact = entry.path();

        if let Some(idx) = name.find(BACKUP_INFIX) {
            let target = dir.join(&name[..idx]);
            if name.ends_with(NONEXISTENT_SUFFIX) {
                match fs::remove_file(&target).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                fs::remove_file(&artifact).await?;
            } else {
                fs::rename(&artifact, &target).await?;
            }
            warn!(file = %target.display(), artifact = %name, "Recovered file from interrupted transaction");
            restored += 1;
        } else if name.contains(TEMP_INFIX) {
            debug!(artifact = %name, "Removing leftover temp file");
            fs::remove_file(&artifact).await?;
        }
    }

    if restored > 0 {
        info!(dir = %dir.display(), restored, "Transaction recovery complete");
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".bak.") || n.contains(".tmp."))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_commit_keeps_writes_and_removes_backups() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.json");
        let fresh = dir.path().join("b.json");
        std::fs::write(&existing, b"old").unwrap();

        let manager = TransactionManager::new();
        let mut tx = manager.begin();
        tx.write_file(&existing, b"new").await.unwrap();
        tx.write_file(&fresh, b"created").await.unwrap();
        assert_eq!(artifacts(dir.path()).len(), 2);

        tx.commit().await.unwrap();

        assert_eq!(std::fs::read(&existing).unwrap(), b"new");
        assert_eq!(std::fs::read(&fresh).unwrap(), b"created");
        assert!(artifacts(dir.path()).is_empty());
        assert!(tx.is_committed());
    }

    #[tokio::test]
    async fn test_rollback_restores_exact_bytes_and_absence() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.json");
        let fresh = dir.path().join("b.json");
        let deleted = dir.path().join("c.json");
        std::fs::write(&existing, b"[1, 2,\n 3]").unwrap();
        std::fs::write(&deleted, b"keep me").unwrap();

        let mut tx = TransactionManager::new().begin();
        tx.write_file(&existing, b"[]").await.unwrap();
        tx.write_file(&existing, b"[9]").await.unwrap();
        tx.write_file(&fresh, b"{}").await.unwrap();
        tx.delete_file(&deleted).await.unwrap();
        assert!(!deleted.exists());

        tx.rollback().await.unwrap();

        assert_eq!(std::fs::read(&existing).unwrap(), b"[1, 2,\n 3]");
        assert!(!fresh.exists());
        assert_eq!(std::fs::read(&deleted).unwrap(), b"keep me");
        assert!(artifacts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_double_finish_is_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        let manager = TransactionManager::new();

        let mut tx = manager.begin();
        tx.write_file(&path, b"1").await.unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(tx.commit().await, Err(Error::TransactionState(_))));
        assert!(matches!(tx.rollback().await, Err(Error::TransactionState(_))));
        assert!(matches!(tx.write_file(&path, b"2").await, Err(Error::TransactionState(_))));

        let mut tx = manager.begin();
        tx.rollback().await.unwrap();
        assert!(matches!(tx.rollback().await, Err(Error::TransactionState(_))));
        assert!(matches!(tx.commit().await, Err(Error::TransactionState(_))));
    }

    #[tokio::test]
    async fn test_missing_backup_is_integrity_error_but_restores_rest() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, b"a0").unwrap();
        std::fs::write(&b, b"b0").unwrap();

        let mut tx = TransactionManager::new().begin();
        tx.write_file(&a, b"a1").await.unwrap();
        tx.write_file(&b, b"b1").await.unwrap();
        std::fs::remove_file(sibling_path(&a, &format!(".bak.{}", tx.id()))).unwrap();

        let result = tx.rollback().await;
        assert!(matches!(result, Err(Error::TransactionIntegrity { .. })));
        assert_eq!(std::fs::read(&b).unwrap(), b"b0");
        assert!(tx.is_rolled_back());
    }

    #[tokio::test]
    async fn test_drop_rolls_back_active_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, b"before").unwrap();

        {
            let mut tx = TransactionManager::new().begin();
            tx.write_file(&path, b"after").await.unwrap();
        }

        assert_eq!(std::fs::read(&path).unwrap(), b"before");
        assert!(artifacts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_recover_after_crash() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.json");
        let fresh = dir.path().join("b.json");
        std::fs::write(&existing, b"original").unwrap();

        let mut tx = TransactionManager::new().begin();
        tx.write_file(&existing, b"half-applied").await.unwrap();
        tx.write_file(&fresh, b"half-applied").await.unwrap();
        // Simulated crash: nothing runs after this point
        std::mem::forget(tx);
        std::fs::write(dir.path().join("a.json.tmp.123-0-1"), b"partial").unwrap();

        let restored = recover(dir.path()).await.unwrap();

        assert_eq!(restored, 2);
        assert_eq!(std::fs::read(&existing).unwrap(), b"original");
        assert!(!fresh.exists());
        assert!(artifacts(dir.path()).is_empty());
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        let manager = TransactionManager::new();
        let a = manager.begin();
        let b = manager.begin();
        assert_ne!(a.id(), b.id());
        assert!(!a.id().contains('.'));
    }
}
