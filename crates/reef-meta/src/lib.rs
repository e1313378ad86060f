//! Shard plan persistence.
//!
//! Download never re-derives placement; it reads back the plan the upload
//! committed. This crate provides:
//!
//! - [`PlanStore`], the get/put contract keyed by [`FileKey`](reef_types::FileKey)
//! - [`MetaStore`], a durable implementation over a Fjall `plans` keyspace
//! - [`MemoryPlanStore`], an in-memory implementation
//! - [`ShardPlanBuilder`], which collects per-chunk shard records from
//!   concurrent transfer tasks and only yields a plan once every slot is filled

mod builder;
mod error;
mod memory;
mod store;

pub use builder::ShardPlanBuilder;
pub use error::{MetaError, PlanError};
pub use memory::MemoryPlanStore;
pub use store::MetaStore;

use reef_types::{FileKey, ShardPlan};

/// Key to plan mapping.
///
/// `put_plan` replaces any plan previously stored under the same key.
pub trait PlanStore: Send + Sync {
    /// Persist the plan for `key`.
    fn put_plan(&self, key: &FileKey, plan: &ShardPlan) -> Result<(), MetaError>;

    /// Retrieve the plan for `key`, if one was committed.
    fn get_plan(&self, key: &FileKey) -> Result<Option<ShardPlan>, MetaError>;
}
