//! Integration test: state that outlives a gateway.

use reef_integration_tests::{TestCluster, test_data_seeded};
use reef_store::{ChunkStore, FileStore};
use reef_types::FileKey;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_restarted_gateway_serves_existing_files() {
    let c = TestCluster::builder(3, 3).on_disk().build();
    let data = test_data_seeded(50_000, 11);
    c.upload("archive.tar", &data).await.unwrap();

    let gateway = c.restart_gateway();
    let mut out = Vec::new();
    gateway
        .download("archive.tar", &mut out, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out, data);
}

#[tokio::test]
async fn test_chunks_survive_node_restart() {
    let c = TestCluster::builder(3, 3).on_disk().build();
    let data = test_data_seeded(9000, 12);
    let plan = c.upload("kept.bin", &data).await.unwrap();
    let key = FileKey::resolve("kept.bin").unwrap();

    // Reopen each node's directory as a fresh store.
    for shard in &plan.shards {
        let store = FileStore::new(c.dir().join(format!("node-{}", shard.node_index.0))).unwrap();
        let mut reader = store.open_reader(&key).await.unwrap();
        let mut chunk = Vec::new();
        reader.read_to_end(&mut chunk).await.unwrap();

        let start = shard.chunk_index.0 * 3000;
        assert_eq!(chunk, &data[start..start + 3000]);
    }
}
