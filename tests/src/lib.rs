//! Shared test harness for reef integration tests.
//!
//! Provides [`TestCluster`], a gateway over N in-process storage nodes
//! connected through [`LocalTransport`]. Nodes keep chunks either in memory
//! or in [`FileStore`]s under a temporary directory, and any node can be
//! slowed down or taken offline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reef_engine::{DownloadError, EngineError, Gateway, GatewayConfig};
use reef_meta::{MetaStore, PlanStore};
use reef_net::LocalTransport;
use reef_store::{ChunkStore, FileStore, MemoryStore, SlowStore};
use reef_types::{FileKey, NodeIndex, ShardPlan};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Where test nodes keep their chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Disk,
}

/// Builder for a [`TestCluster`].
pub struct ClusterBuilder {
    nodes: usize,
    backend: Backend,
    config: GatewayConfig,
    slow: Vec<(usize, u64)>,
}

impl ClusterBuilder {
    /// Use file-backed chunk stores.
    pub fn on_disk(mut self) -> Self {
        self.backend = Backend::Disk;
        self
    }

    /// Add `ms` of latency to every write on node `i`.
    pub fn slow_node(mut self, i: usize, ms: u64) -> Self {
        self.slow.push((i, ms));
        self
    }

    /// Override the per-chunk transfer timeout.
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.config.transfer_timeout = timeout;
        self
    }

    /// Override the maximum file size.
    pub fn max_file_size(mut self, max: u64) -> Self {
        self.config.max_file_size = max;
        self
    }

    pub fn build(self) -> TestCluster {
        let dir = tempfile::tempdir().expect("temp dir");
        let stores: Vec<Arc<dyn ChunkStore>> = (0..self.nodes)
            .map(|i| {
                let base: Arc<dyn ChunkStore> = match self.backend {
                    Backend::Memory => Arc::new(MemoryStore::new()),
                    Backend::Disk => Arc::new(
                        FileStore::new(dir.path().join(format!("node-{i}"))).expect("file store"),
                    ),
                };
                match self.slow.iter().find(|(n, _)| *n == i) {
                    Some(&(_, ms)) => {
                        Arc::new(SlowStore::new(base).write_latency(ms, ms)) as Arc<dyn ChunkStore>
                    }
                    None => base,
                }
            })
            .collect();

        let plans = Arc::new(MetaStore::open(dir.path().join("plans")).expect("plan store"));
        let transport = Arc::new(LocalTransport::new(stores.clone()));
        let gateway = Gateway::new(self.config.clone(), transport.clone(), plans.clone())
            .expect("gateway");

        TestCluster {
            gateway,
            transport,
            stores,
            plans,
            config: self.config,
            dir,
        }
    }
}

/// A gateway and its storage nodes, all in one process.
pub struct TestCluster {
    gateway: Gateway,
    transport: Arc<LocalTransport>,
    stores: Vec<Arc<dyn ChunkStore>>,
    plans: Arc<MetaStore>,
    config: GatewayConfig,
    dir: TempDir,
}

impl TestCluster {
    /// Start building a cluster of `nodes` nodes splitting files into
    /// `chunks` chunks.
    pub fn builder(nodes: usize, chunks: usize) -> ClusterBuilder {
        ClusterBuilder {
            nodes,
            backend: Backend::Memory,
            config: GatewayConfig {
                chunks,
                ..GatewayConfig::default()
            },
            slow: Vec::new(),
        }
    }

    /// An in-memory cluster with default settings.
    pub fn new(nodes: usize, chunks: usize) -> Self {
        Self::builder(nodes, chunks).build()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn plans(&self) -> &MetaStore {
        &self.plans
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Root of the cluster's on-disk state.
    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Upload `data` under `name`.
    pub async fn upload(&self, name: &str, data: &[u8]) -> Result<ShardPlan, EngineError> {
        self.gateway
            .upload(
                name,
                Arc::new(Bytes::copy_from_slice(data)),
                &CancellationToken::new(),
            )
            .await
    }

    /// Download `name` into memory, returning what reached the sink even on
    /// failure.
    pub async fn download(&self, name: &str) -> (Vec<u8>, Result<u64, DownloadError>) {
        let mut out = Vec::new();
        let result = self
            .gateway
            .download(name, &mut out, &CancellationToken::new())
            .await;
        (out, result)
    }

    /// Make node `i` unreachable.
    pub fn kill_node(&self, i: usize) {
        self.transport.set_down(NodeIndex(i));
    }

    /// Make node `i` reachable again.
    pub fn revive_node(&self, i: usize) {
        self.transport.set_up(NodeIndex(i));
    }

    /// Whether node `i` holds a chunk of `name`.
    pub async fn node_has(&self, i: usize, name: &str) -> bool {
        let key = FileKey::resolve(name).expect("valid name");
        self.stores[i].contains(&key).await.unwrap_or(false)
    }

    /// Number of nodes holding a chunk of `name`.
    pub async fn holders(&self, name: &str) -> usize {
        let mut n = 0;
        for i in 0..self.stores.len() {
            if self.node_has(i, name).await {
                n += 1;
            }
        }
        n
    }

    /// Build a second gateway over the same nodes and plan store, as after a
    /// gateway restart.
    pub fn restart_gateway(&self) -> Gateway {
        Gateway::new(
            self.config.clone(),
            self.transport.clone(),
            self.plans.clone() as Arc<dyn PlanStore>,
        )
        .expect("gateway")
    }
}

/// Generate deterministic test data from a seed.
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}
