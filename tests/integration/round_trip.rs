//! Integration test: upload and download through the full stack.
//!
//! Gateway → LocalTransport → NodeService → ChunkStore and back, with the
//! shard plan in a fjall store.

use reef_integration_tests::{TestCluster, test_data_seeded};
use reef_meta::PlanStore;
use reef_types::FileKey;

#[tokio::test]
async fn test_round_trip_many_sizes() {
    let c = TestCluster::new(3, 3);

    for (i, size) in [3usize, 4, 5, 4095, 4096, 4097, 12_288, 100_001].into_iter().enumerate() {
        let data = test_data_seeded(size, i as u32 + 1);
        let name = format!("file-{size}.bin");
        let plan = c.upload(&name, &data).await.unwrap();
        assert_eq!(plan.original_size, size as u64);

        let (got, result) = c.download(&name).await;
        assert_eq!(result.unwrap(), size as u64);
        assert_eq!(got, data, "mismatch for {name}");
    }
}

#[tokio::test]
async fn test_round_trip_on_disk() {
    let c = TestCluster::builder(4, 3).on_disk().build();
    let data = test_data_seeded(250_000, 7);

    c.upload("photo.jpg", &data).await.unwrap();
    assert_eq!(c.holders("photo.jpg").await, 3);

    let (got, result) = c.download("photo.jpg").await;
    result.unwrap();
    assert_eq!(got, data);
}

#[tokio::test]
async fn test_each_chunk_on_its_own_node() {
    let c = TestCluster::new(6, 4);
    for i in 0..20u32 {
        let name = format!("doc-{i}.txt");
        let plan = c.upload(&name, &test_data_seeded(1000, i + 1)).await.unwrap();

        let mut nodes: Vec<usize> = plan.shards.iter().map(|s| s.node_index.0).collect();
        nodes.sort_unstable();
        nodes.dedup();
        assert_eq!(nodes.len(), 4, "chunks of {name} share a node");
        assert_eq!(c.holders(&name).await, 4);
    }
}

#[tokio::test]
async fn test_plan_persisted_once_per_upload() {
    let c = TestCluster::new(3, 3);
    let plan = c.upload("a.txt", &test_data_seeded(900, 3)).await.unwrap();

    let key = FileKey::resolve("a.txt").unwrap();
    assert_eq!(c.plans().get_plan(&key).unwrap(), Some(plan));
    assert_eq!(c.plans().list_keys().unwrap(), vec![key]);
}

#[tokio::test]
async fn test_overwrite_replaces_content() {
    let c = TestCluster::builder(3, 3).on_disk().build();
    c.upload("same", &test_data_seeded(3000, 1)).await.unwrap();
    let newer = test_data_seeded(6001, 2);
    c.upload("same", &newer).await.unwrap();

    let (got, result) = c.download("same").await;
    result.unwrap();
    assert_eq!(got, newer);
}

#[tokio::test]
async fn test_slow_node_still_completes() {
    let c = TestCluster::builder(3, 3).slow_node(1, 5).build();
    let data = test_data_seeded(20_000, 9);

    c.upload("slow.bin", &data).await.unwrap();
    let (got, result) = c.download("slow.bin").await;
    result.unwrap();
    assert_eq!(got, data);
}

#[tokio::test]
async fn test_concurrent_clients() {
    use std::sync::Arc;

    let c = Arc::new(TestCluster::builder(5, 3).on_disk().build());
    let mut handles = Vec::new();
    for i in 0..16u32 {
        let c = Arc::clone(&c);
        handles.push(tokio::spawn(async move {
            let data = test_data_seeded(5000 + i as usize * 313, i + 1);
            let name = format!("client-{i}");
            c.upload(&name, &data).await.unwrap();
            let (got, result) = c.download(&name).await;
            result.unwrap();
            assert_eq!(got, data);
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(c.plans().list_keys().unwrap().len(), 16);
}
