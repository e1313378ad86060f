//! A [`ChunkStore`] wrapper that adds configurable random IO latency.
//!
//! `SlowStore` wraps any `Arc<dyn ChunkStore>` and sleeps for a random
//! duration before opening a chunk and before every write. The RNG is seeded
//! for reproducible behaviour across test runs.
//!
//! ```ignore
//! let slow = SlowStore::new(inner)
//!     .read_latency(5, 20)
//!     .write_latency(10, 30)
//!     .seed(42);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reef_types::FileKey;

use crate::error::StoreError;
use crate::traits::{ChunkReader, ChunkStore, ChunkWriter};

/// A [`ChunkStore`] wrapper that injects random latency before IO operations.
pub struct SlowStore {
    inner: Arc<dyn ChunkStore>,
    read_latency_ms: (u64, u64),
    write_latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
}

impl SlowStore {
    /// Wrap an existing store with zero latency (pass-through) by default.
    pub fn new(inner: Arc<dyn ChunkStore>) -> Self {
        Self {
            inner,
            read_latency_ms: (0, 0),
            write_latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Set the read latency range in milliseconds (uniform random).
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the per-write latency range in milliseconds (uniform random).
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    fn sample(&self, range: (u64, u64)) -> Duration {
        let (min, max) = range;
        let ms = if max == 0 {
            0
        } else if min >= max {
            min
        } else {
            self.rng.lock().expect("lock poisoned").random_range(min..=max)
        };
        Duration::from_millis(ms)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

struct SlowWriter {
    inner: Box<dyn ChunkWriter>,
    delay: Duration,
}

#[async_trait::async_trait]
impl ChunkWriter for SlowWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        pause(self.delay).await;
        self.inner.write(data).await
    }

    async fn commit(self: Box<Self>) -> Result<u64, StoreError> {
        self.inner.commit().await
    }
}

#[async_trait::async_trait]
impl ChunkStore for SlowStore {
    async fn open_writer(&self, key: &FileKey) -> Result<Box<dyn ChunkWriter>, StoreError> {
        let inner = self.inner.open_writer(key).await?;
        Ok(Box::new(SlowWriter {
            inner,
            delay: self.sample(self.write_latency_ms),
        }))
    }

    async fn open_reader(&self, key: &FileKey) -> Result<ChunkReader, StoreError> {
        pause(self.sample(self.read_latency_ms)).await;
        self.inner.open_reader(key).await
    }

    async fn contains(&self, key: &FileKey) -> Result<bool, StoreError> {
        self.inner.contains(key).await
    }

    async fn delete(&self, key: &FileKey) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }
}
