//! Concurrent assembly of a [`ShardPlan`].

use std::sync::Mutex;

use reef_types::{Shard, ShardPlan};

use crate::PlanError;

/// Collects one [`Shard`] per chunk from concurrently running transfer tasks.
///
/// Each [`record`](Self::record) takes an exclusive lock for the bounds check
/// and slot assignment. [`build`](Self::build) only succeeds once every slot
/// is filled, so a partially filled plan can never be produced.
#[derive(Debug)]
pub struct ShardPlanBuilder {
    original_size: u64,
    slots: Mutex<Vec<Option<Shard>>>,
}

impl ShardPlanBuilder {
    /// Create a builder for a file of `original_size` bytes in `chunk_count` chunks.
    pub fn new(original_size: u64, chunk_count: usize) -> Self {
        Self {
            original_size,
            slots: Mutex::new(vec![None; chunk_count]),
        }
    }

    /// Record the shard for its chunk index.
    pub fn record(&self, shard: Shard) -> Result<(), PlanError> {
        let mut slots = self.slots.lock().expect("lock poisoned");
        let count = slots.len();
        let index = shard.chunk_index.0;
        let slot = slots
            .get_mut(index)
            .ok_or(PlanError::IndexOutOfRange { index, count })?;
        if slot.is_some() {
            return Err(PlanError::Duplicate { index });
        }
        *slot = Some(shard);
        Ok(())
    }

    /// Number of slots filled so far.
    pub fn recorded(&self) -> usize {
        self.slots
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// Produce the plan, ordered by chunk index.
    pub fn build(&self) -> Result<ShardPlan, PlanError> {
        let slots = self.slots.lock().expect("lock poisoned");
        let mut shards = Vec::with_capacity(slots.len());
        for (index, slot) in slots.iter().enumerate() {
            shards.push(slot.clone().ok_or(PlanError::Missing { index })?);
        }

        let actual: u64 = shards.iter().map(|s| s.size).sum();
        if actual != self.original_size {
            return Err(PlanError::SizeMismatch {
                expected: self.original_size,
                actual,
            });
        }

        Ok(ShardPlan {
            original_size: self.original_size,
            shards,
        })
    }
}
