//! The redb store handle.

use crate::error::{db_err, StorageError, StorageResult};
use crate::schema;
use redb::{Database, ReadTransaction, WriteTransaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Durable store implementing `EventLog`, `JobQueue` and `FlagStore`
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl RedbStore {
    /// Open or create the database at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or initialized
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(db_err)?;

        let txn = db.begin_write().map_err(db_err)?;
        schema::create_tables(&txn)?;
        txn.commit().map_err(db_err)?;

        info!(path = %path.display(), "store opened");
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Database file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` in one write transaction on the blocking pool. The
    /// transaction commits only if `f` succeeds.
    pub(crate) async fn write_txn<T, E, F>(&self, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StorageError> + Send + 'static,
        F: FnOnce(&WriteTransaction) -> Result<T, E> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(db_err)?;
            let out = f(&txn)?;
            txn.commit().map_err(db_err)?;
            Ok(out)
        })
        .await
        .map_err(|e| {
            E::from(StorageError::Task {
                reason: e.to_string(),
            })
        })?
    }

    /// Run `f` in one read transaction on the blocking pool
    pub(crate) async fn read_txn<T, E, F>(&self, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StorageError> + Send + 'static,
        F: FnOnce(&ReadTransaction) -> Result<T, E> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(db_err)?;
            f(&txn)
        })
        .await
        .map_err(|e| {
            E::from(StorageError::Task {
                reason: e.to_string(),
            })
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notary.redb");
        let store = RedbStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_reopen_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notary.redb");
        drop(RedbStore::open(&path).unwrap());
        assert!(RedbStore::open(&path).is_ok());
    }
}
