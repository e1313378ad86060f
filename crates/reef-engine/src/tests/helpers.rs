//! Shared test utilities for reef-engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reef_meta::{MemoryPlanStore, MetaError, PlanStore};
use reef_net::{ChunkReceipt, LocalTransport, NetError, Transport};
use reef_store::{ChunkStore, MemoryStore};
use reef_types::{Checksum, FileKey, NodeIndex, ShardPlan};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::gateway::{Gateway, GatewayConfig};

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

pub fn config(chunks: usize) -> GatewayConfig {
    GatewayConfig {
        chunks,
        max_file_size: 10 * 1024 * 1024,
        transfer_timeout: Duration::from_secs(10),
    }
}

/// A gateway over `nodes` in-process storage nodes.
pub struct LocalCluster {
    pub gateway: Gateway,
    pub transport: Arc<LocalTransport>,
    pub stores: Vec<Arc<MemoryStore>>,
    pub plans: Arc<MemoryPlanStore>,
}

pub fn local_cluster(nodes: usize, config: GatewayConfig) -> LocalCluster {
    let stores: Vec<Arc<MemoryStore>> = (0..nodes).map(|_| Arc::new(MemoryStore::new())).collect();
    let transport = Arc::new(LocalTransport::new(
        stores
            .iter()
            .map(|s| s.clone() as Arc<dyn ChunkStore>)
            .collect(),
    ));
    let plans = Arc::new(MemoryPlanStore::new());
    let gateway = Gateway::new(config, transport.clone(), plans.clone()).unwrap();
    LocalCluster {
        gateway,
        transport,
        stores,
        plans,
    }
}

/// Upload `data` as `name` and return the plan.
pub async fn upload_bytes(gateway: &Gateway, name: &str, data: &[u8]) -> ShardPlan {
    let source = Arc::new(Bytes::copy_from_slice(data));
    gateway
        .upload(name, source, &CancellationToken::new())
        .await
        .unwrap()
}

/// Download `name` into a fresh buffer.
pub async fn download_bytes(gateway: &Gateway, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let written = gateway
        .download(name, &mut out, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(written, out.len() as u64);
    out
}

// -----------------------------------------------------------------------
// Mock transport
// -----------------------------------------------------------------------

/// How a mock node reacts to a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeBehavior {
    /// Store and serve chunks.
    Normal,
    /// Refuse the connection.
    Down,
    /// Accept the transfer and never answer, until cancelled.
    Stall,
    /// Accept the transfer and never answer, ignoring cancellation.
    Hang,
    /// Accept the bytes, then fail.
    Fail,
    /// Serve chunks with the first byte flipped.
    Corrupt,
}

/// Decrements the active counter when a mock transfer ends, however it ends.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport with per-node failure injection.
pub struct MockTransport {
    behaviors: Mutex<Vec<NodeBehavior>>,
    chunks: Mutex<HashMap<(usize, FileKey), Vec<u8>>>,
    active: AtomicUsize,
    puts: AtomicUsize,
}

impl MockTransport {
    pub fn new(nodes: usize) -> Self {
        Self {
            behaviors: Mutex::new(vec![NodeBehavior::Normal; nodes]),
            chunks: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, node: usize, behavior: NodeBehavior) {
        self.behaviors.lock().unwrap()[node] = behavior;
    }

    /// Transfers currently in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// `put_chunk` calls that reached a node.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn stored_chunks(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    fn behavior(&self, node: NodeIndex) -> Result<NodeBehavior, NetError> {
        self.behaviors
            .lock()
            .unwrap()
            .get(node.0)
            .copied()
            .ok_or(NetError::UnknownNode(node))
    }

    fn enter(&self) -> ActiveGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(&self.active)
    }
}

async fn stall(behavior: NodeBehavior, cancel: &CancellationToken) -> Result<ChunkReceipt, NetError> {
    if behavior == NodeBehavior::Hang {
        std::future::pending::<()>().await;
    }
    cancel.cancelled().await;
    Err(NetError::Cancelled)
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn node_count(&self) -> usize {
        self.behaviors.lock().unwrap().len()
    }

    async fn put_chunk(
        &self,
        node: NodeIndex,
        key: &FileKey,
        size: u64,
        source: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, NetError> {
        let behavior = self.behavior(node)?;
        if behavior == NodeBehavior::Down {
            return Err(NetError::Connect(format!("node {node} is down")));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter();

        match behavior {
            NodeBehavior::Stall | NodeBehavior::Hang => stall(behavior, cancel).await,
            _ => {
                let mut buf = vec![0u8; size as usize];
                source.read_exact(&mut buf).await?;
                if behavior == NodeBehavior::Fail {
                    return Err(NetError::Protocol("injected failure".into()));
                }
                let receipt = ChunkReceipt {
                    bytes: size,
                    checksum: Checksum::from_data(&buf),
                };
                self.chunks
                    .lock()
                    .unwrap()
                    .insert((node.0, key.clone()), buf);
                Ok(receipt)
            }
        }
    }

    async fn get_chunk(
        &self,
        node: NodeIndex,
        key: &FileKey,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, NetError> {
        let behavior = self.behavior(node)?;
        let _guard = self.enter();
        match behavior {
            NodeBehavior::Down => Err(NetError::Connect(format!("node {node} is down"))),
            NodeBehavior::Stall | NodeBehavior::Hang => stall(behavior, cancel).await,
            NodeBehavior::Fail => Err(NetError::Protocol("injected failure".into())),
            NodeBehavior::Normal | NodeBehavior::Corrupt => {
                let mut data = self
                    .chunks
                    .lock()
                    .unwrap()
                    .get(&(node.0, key.clone()))
                    .cloned()
                    .ok_or_else(|| NetError::Rejected {
                        code: reef_net::RejectCode::NotFound,
                        reason: key.to_string(),
                    })?;
                if behavior == NodeBehavior::Corrupt && !data.is_empty() {
                    data[0] ^= 0xFF;
                }
                sink.write_all(&data).await?;
                Ok(ChunkReceipt {
                    bytes: data.len() as u64,
                    checksum: Checksum::from_data(&data),
                })
            }
        }
    }
}

// -----------------------------------------------------------------------
// Counting plan store
// -----------------------------------------------------------------------

/// Plan store that counts writes.
#[derive(Default)]
pub struct CountingPlanStore {
    inner: MemoryPlanStore,
    puts: AtomicUsize,
}

impl CountingPlanStore {
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl PlanStore for CountingPlanStore {
    fn put_plan(&self, key: &FileKey, plan: &ShardPlan) -> Result<(), MetaError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_plan(key, plan)
    }

    fn get_plan(&self, key: &FileKey) -> Result<Option<ShardPlan>, MetaError> {
        self.inner.get_plan(key)
    }
}

/// A gateway over a mock transport, with write-counting plans.
pub fn mock_gateway(
    nodes: usize,
    config: GatewayConfig,
) -> (Gateway, Arc<MockTransport>, Arc<CountingPlanStore>) {
    let transport = Arc::new(MockTransport::new(nodes));
    let plans = Arc::new(CountingPlanStore::default());
    let gateway = Gateway::new(config, transport.clone(), plans.clone()).unwrap();
    (gateway, transport, plans)
}
