//! Integration test: storage node failures.
//!
//! An upload is all-or-nothing: one unreachable or stalled node fails it and
//! no plan is written. A download stops at the first unreachable chunk and
//! reports how far it got.

use std::time::Duration;

use reef_engine::EngineError;
use reef_integration_tests::{TestCluster, test_data_seeded};
use reef_meta::PlanStore;
use reef_net::NetError;
use reef_types::FileKey;

#[tokio::test]
async fn test_upload_to_dead_node_writes_no_plan() {
    let c = TestCluster::new(3, 3);
    c.kill_node(1);

    let err = c.upload("doc.pdf", &test_data_seeded(3000, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Transfer { .. }), "got {err}");

    let key = FileKey::resolve("doc.pdf").unwrap();
    assert!(c.plans().get_plan(&key).unwrap().is_none());
    assert!(!c.node_has(1, "doc.pdf").await);

    let (got, result) = c.download("doc.pdf").await;
    let err = result.unwrap_err();
    assert!(matches!(err.source, EngineError::PlanNotFound { .. }));
    assert!(got.is_empty());
}

#[tokio::test]
async fn test_failed_upload_leaves_previous_plan_in_place() {
    let c = TestCluster::new(3, 3);
    let original = test_data_seeded(3000, 1);
    c.upload("keep", &original).await.unwrap();

    c.kill_node(2);
    assert!(c.upload("keep", &test_data_seeded(4500, 2)).await.is_err());

    let key = FileKey::resolve("keep").unwrap();
    let plan = c.plans().get_plan(&key).unwrap().unwrap();
    assert_eq!(plan.original_size, 3000);
}

#[tokio::test]
async fn test_failed_reupload_overwrites_committed_chunks() {
    // Chunks are stored under the file key, so sibling chunks that commit
    // before the slow node times out replace the previous version's chunks.
    // The old plan survives but no longer matches what the nodes hold.
    let c = TestCluster::builder(3, 3)
        .slow_node(0, 100)
        .transfer_timeout(Duration::from_millis(500))
        .build();
    let original = test_data_seeded(3000, 1);
    c.upload("keep", &original).await.unwrap();

    // 40 000-byte chunks: ten frames, about a second on node 0.
    let err = c.upload("keep", &test_data_seeded(120_000, 2)).await.unwrap_err();
    match err {
        EngineError::TimedOut { node, .. } => assert_eq!(node.0, 0),
        other => panic!("expected timeout, got {other}"),
    }

    let key = FileKey::resolve("keep").unwrap();
    let plan = c.plans().get_plan(&key).unwrap().unwrap();
    assert_eq!(plan.original_size, 3000);

    let (_, result) = c.download("keep").await;
    let err = result.unwrap_err();
    match err.source {
        EngineError::Transfer { node, source, .. } => {
            assert_ne!(node.0, 0);
            assert!(
                matches!(source, NetError::SizeMismatch { expected: 1000, actual: 40_000 }),
                "got {source}"
            );
        }
        other => panic!("expected transfer error, got {other}"),
    }
}

#[tokio::test]
async fn test_revived_node_accepts_uploads() {
    let c = TestCluster::new(3, 3);
    c.kill_node(0);
    assert!(c.upload("retry", &test_data_seeded(3000, 4)).await.is_err());

    c.revive_node(0);
    let data = test_data_seeded(3000, 4);
    c.upload("retry", &data).await.unwrap();
    let (got, result) = c.download("retry").await;
    result.unwrap();
    assert_eq!(got, data);
}

#[tokio::test]
async fn test_download_truncates_at_dead_node() {
    let c = TestCluster::new(4, 4);
    let data = test_data_seeded(4000, 5);
    let plan = c.upload("parts", &data).await.unwrap();

    let victim = plan.shards[2].node_index.0;
    c.kill_node(victim);

    let (got, result) = c.download("parts").await;
    let err = result.unwrap_err();
    assert_eq!(err.bytes_written, 2000);
    assert_eq!(got, &data[..2000]);
    match err.source {
        EngineError::Transfer { chunk, node, .. } => {
            assert_eq!(chunk.0, 2);
            assert_eq!(node.0, victim);
        }
        other => panic!("expected transfer error, got {other}"),
    }
}

#[tokio::test]
async fn test_stalled_node_times_out() {
    let c = TestCluster::builder(3, 3)
        .slow_node(0, 2_000)
        .transfer_timeout(Duration::from_millis(300))
        .build();

    // Many frames per chunk, each delayed on node 0.
    let err = c.upload("stalled", &test_data_seeded(60_000, 6)).await.unwrap_err();
    match err {
        EngineError::TimedOut { node, .. } => assert_eq!(node.0, 0),
        other => panic!("expected timeout, got {other}"),
    }

    let key = FileKey::resolve("stalled").unwrap();
    assert!(c.plans().get_plan(&key).unwrap().is_none());
    // The aborted chunk was never committed on the slow node.
    assert!(!c.node_has(0, "stalled").await);
}

#[tokio::test]
async fn test_upload_too_large() {
    let c = TestCluster::builder(3, 3).max_file_size(1024).build();
    let err = c.upload("big", &test_data_seeded(1025, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::TooLarge { .. }));
    assert_eq!(c.holders("big").await, 0);
}
