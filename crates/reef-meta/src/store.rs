//! [`MetaStore`] implementation wrapping a Fjall keyspace.

use std::path::Path;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use reef_types::{FileKey, ShardPlan};
use tracing::debug;

use crate::{MetaError, PlanStore};

type Result<T> = std::result::Result<T, MetaError>;

/// Durable plan store backed by Fjall.
///
/// Holds a single `plans` keyspace: file key bytes → postcard-encoded
/// [`ShardPlan`].
pub struct MetaStore {
    /// The underlying Fjall database handle.
    #[allow(dead_code)]
    db: Database,
    plans: Keyspace,
    /// Backing directory of a temporary store, removed after the database.
    _tmp: Option<tempfile::TempDir>,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a temporary MetaStore that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tmp: Option<tempfile::TempDir>) -> Result<Self> {
        let plans = db.keyspace("plans", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            plans,
            _tmp: tmp,
        })
    }

    /// Remove the plan for `key`. Removing a missing plan is not an error.
    pub fn delete_plan(&self, key: &FileKey) -> Result<()> {
        self.plans.remove(key.as_str().as_bytes())?;
        debug!(%key, "deleted shard plan");
        Ok(())
    }

    /// List every key with a committed plan.
    pub fn list_keys(&self) -> Result<Vec<FileKey>> {
        let mut keys = Vec::new();
        for guard in self.plans.iter() {
            let k = guard.key()?;
            let raw = std::str::from_utf8(&k).map_err(|_| MetaError::CorruptKey)?;
            // Stored keys are already normalized, so resolving is the identity.
            keys.push(FileKey::resolve(raw).map_err(|_| MetaError::CorruptKey)?);
        }
        Ok(keys)
    }
}

impl PlanStore for MetaStore {
    fn put_plan(&self, key: &FileKey, plan: &ShardPlan) -> Result<()> {
        let value = postcard::to_allocvec(plan)?;
        self.plans.insert(key.as_str().as_bytes(), value.as_slice())?;
        debug!(%key, chunks = plan.chunk_count(), size = plan.original_size, "stored shard plan");
        Ok(())
    }

    fn get_plan(&self, key: &FileKey) -> Result<Option<ShardPlan>> {
        match self.plans.get(key.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}
