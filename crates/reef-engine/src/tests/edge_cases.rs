//! Edge-case tests: rejected inputs, configuration limits, layout math.

use std::sync::Arc;

use bytes::Bytes;
use reef_meta::MemoryPlanStore;
use reef_types::{ChunkIndex, KeyError};
use tokio_util::sync::CancellationToken;

use super::helpers::{MockTransport, config, local_cluster, mock_gateway, test_data};
use crate::error::EngineError;
use crate::gateway::{Gateway, GatewayConfig};
use crate::layout::ChunkLayout;

async fn try_upload(gateway: &Gateway, name: &str, data: Vec<u8>) -> Result<(), EngineError> {
    gateway
        .upload(name, Arc::new(Bytes::from(data)), &CancellationToken::new())
        .await
        .map(|_| ())
}

#[tokio::test]
async fn test_empty_file_rejected() {
    let (gateway, transport, plans) = mock_gateway(3, config(3));
    let err = try_upload(&gateway, "empty", Vec::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSize { size: 0, chunks: 3 }));
    assert_eq!(transport.puts(), 0);
    assert_eq!(plans.puts(), 0);
}

#[tokio::test]
async fn test_file_smaller_than_chunk_count_rejected() {
    let (gateway, transport, _) = mock_gateway(3, config(3));
    let err = try_upload(&gateway, "tiny", vec![1, 2]).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSize { size: 2, chunks: 3 }));
    assert_eq!(transport.puts(), 0);
}

#[tokio::test]
async fn test_file_equal_to_chunk_count_accepted() {
    let cluster = local_cluster(3, config(3));
    let plan = cluster
        .gateway
        .upload("three", Arc::new(Bytes::from_static(b"abc")), &CancellationToken::new())
        .await
        .unwrap();
    assert!(plan.shards.iter().all(|s| s.size == 1));
}

#[tokio::test]
async fn test_too_large_rejected() {
    let cfg = GatewayConfig {
        max_file_size: 1000,
        ..config(3)
    };
    let (gateway, transport, _) = mock_gateway(3, cfg);
    let err = try_upload(&gateway, "huge", test_data(1001)).await.unwrap_err();
    assert!(matches!(err, EngineError::TooLarge { size: 1001, max: 1000 }));
    assert_eq!(transport.puts(), 0);

    // Exactly at the limit is fine.
    try_upload(&gateway, "limit", test_data(1000)).await.unwrap();
}

#[tokio::test]
async fn test_invalid_identity() {
    let (gateway, _, plans) = mock_gateway(3, config(3));
    let err = try_upload(&gateway, "", test_data(100)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidIdentity(KeyError::Empty)));

    let long = "x".repeat(300);
    let err = try_upload(&gateway, &long, test_data(100)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidIdentity(KeyError::TooLong { .. })
    ));
    assert_eq!(plans.puts(), 0);

    let mut sink = Vec::new();
    let err = gateway
        .download("", &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.source, EngineError::InvalidIdentity(_)));
}

#[tokio::test]
async fn test_insufficient_nodes_at_construction() {
    let transport = Arc::new(MockTransport::new(2));
    let plans = Arc::new(MemoryPlanStore::new());
    let err = Gateway::new(config(3), transport, plans).err().unwrap();
    assert!(matches!(
        err,
        EngineError::InsufficientNodes {
            required: 3,
            available: 2
        }
    ));
}

#[tokio::test]
async fn test_zero_chunks_is_invalid_config() {
    let transport = Arc::new(MockTransport::new(2));
    let plans = Arc::new(MemoryPlanStore::new());
    let err = Gateway::new(config(0), transport, plans).err().unwrap();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_download_missing_plan() {
    let cluster = local_cluster(3, config(3));
    let mut sink = Vec::new();
    let err = cluster
        .gateway
        .download("never-uploaded", &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.source, EngineError::PlanNotFound { .. }));
    assert_eq!(err.bytes_written, 0);
    assert!(sink.is_empty());

    assert!(matches!(
        cluster.gateway.plan("never-uploaded"),
        Err(EngineError::PlanNotFound { .. })
    ));
}

#[tokio::test]
async fn test_download_detects_corrupt_plan_order() {
    use reef_meta::PlanStore;
    use reef_types::FileKey;

    let cluster = local_cluster(3, config(3));
    let mut plan = super::helpers::upload_bytes(&cluster.gateway, "swap", &test_data(300)).await;
    plan.shards.swap(0, 1);
    let key = FileKey::resolve("swap").unwrap();
    cluster.plans.put_plan(&key, &plan).unwrap();

    let mut sink = Vec::new();
    let err = cluster
        .gateway
        .download("swap", &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.source, EngineError::CorruptPlan { .. }));
    assert_eq!(err.bytes_written, 0);
}

#[test]
fn test_layout_conserves_bytes() {
    for total in [3u64, 4, 5, 99, 100, 101, 1_000_003] {
        for chunks in 1..=7usize {
            if total < chunks as u64 {
                continue;
            }
            let layout = ChunkLayout::new(total, chunks).unwrap();
            let ranges = layout.ranges();
            assert_eq!(ranges.len(), chunks);
            assert_eq!(ranges.iter().map(|r| r.size).sum::<u64>(), total);

            let mut offset = 0;
            for (i, r) in ranges.iter().enumerate() {
                assert_eq!(r.index, ChunkIndex(i));
                assert_eq!(r.offset, offset);
                assert!(r.size > 0);
                offset += r.size;
            }
        }
    }
}

#[test]
fn test_layout_residual_on_last_chunk() {
    let layout = ChunkLayout::new(10, 3).unwrap();
    assert_eq!(layout.chunk_size(), 3);
    assert_eq!(layout.residual(), 1);
    let sizes: Vec<u64> = layout.ranges().iter().map(|r| r.size).collect();
    assert_eq!(sizes, vec![3, 3, 4]);
}

#[test]
fn test_layout_rejects_degenerate_sizes() {
    assert!(ChunkLayout::new(0, 3).is_err());
    assert!(ChunkLayout::new(2, 3).is_err());
    assert!(ChunkLayout::new(10, 0).is_err());
}
