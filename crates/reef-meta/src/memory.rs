//! In-memory plan store.

use std::collections::HashMap;
use std::sync::RwLock;

use reef_types::{FileKey, ShardPlan};
use tracing::debug;

use crate::{MetaError, PlanStore};

/// Plan store backed by a `RwLock<HashMap>`. Plans do not survive restart.
#[derive(Default)]
pub struct MemoryPlanStore {
    plans: RwLock<HashMap<FileKey, ShardPlan>>,
}

impl MemoryPlanStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored plans.
    pub fn len(&self) -> usize {
        self.plans.read().expect("lock poisoned").len()
    }

    /// Whether no plan is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlanStore for MemoryPlanStore {
    fn put_plan(&self, key: &FileKey, plan: &ShardPlan) -> Result<(), MetaError> {
        debug!(%key, chunks = plan.chunk_count(), "storing shard plan in memory");
        self.plans
            .write()
            .expect("lock poisoned")
            .insert(key.clone(), plan.clone());
        Ok(())
    }

    fn get_plan(&self, key: &FileKey) -> Result<Option<ShardPlan>, MetaError> {
        Ok(self.plans.read().expect("lock poisoned").get(key).cloned())
    }
}
