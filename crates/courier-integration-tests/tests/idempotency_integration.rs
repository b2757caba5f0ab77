//! Idempotency store behavior at the submission seam.

use std::time::Duration;

use courier_gateway::{IdempotencyRecord, MemorySnapshotStore, SnapshotStore};

#[tokio::test]
async fn replayed_snapshot_is_returned_verbatim() -> anyhow::Result<()> {
    let store = MemorySnapshotStore::with_default_ttl();
    let response = serde_json::json!({
        "submission_id": "0b0cf11e-7f15-4e4f-b7a6-1f9d3a9a2b6c",
        "recipient_id": "user-123",
        "template_key": "ORDER_CONFIRMATION"
    });

    store
        .put("K1", &IdempotencyRecord::new(response.clone()))
        .await?;

    // Any number of replays return the stored response unchanged.
    for _ in 0..3 {
        let replay = store.get("K1").await?.expect("record should be cached");
        assert_eq!(replay.response_snapshot, response);
    }

    Ok(())
}

#[tokio::test]
async fn expired_keys_behave_like_fresh_submissions() -> anyhow::Result<()> {
    let store = MemorySnapshotStore::new(Duration::from_secs(0));
    let response = serde_json::json!({ "submission_id": "abc" });

    store.put("K1", &IdempotencyRecord::new(response)).await?;
    assert!(store.get("K1").await?.is_none());

    Ok(())
}
