//! Queue manager flows against a live Redis.
//!
//! All tests here are ignored by default and assume an empty local Redis
//! at redis://127.0.0.1:6379 (run with `--ignored` and docker compose up).

use payment_broker::cache::{init_cache_pool, CachePoolConfig, RedisPool};
use payment_broker::queue::item::MAX_RETRIES;
use payment_broker::queue::QueueManager;
use uuid::Uuid;

async fn test_pool() -> RedisPool {
    let config = CachePoolConfig {
        redis_url: std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        ..Default::default()
    };
    init_cache_pool(config).await.expect("redis must be running")
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn enqueue_is_idempotent_per_correlation_id() {
    let queue = QueueManager::new(test_pool().await);
    queue.purge_all().await.unwrap();

    let id = Uuid::new_v4();
    assert!(queue.enqueue(id, 1000).await.unwrap());
    assert!(!queue.enqueue(id, 1000).await.unwrap());

    let taken = queue.take_batch(10).await;
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].item.correlation_id, id);

    queue.purge_all().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn take_batch_moves_items_into_processing() {
    let queue = QueueManager::new(test_pool().await);
    queue.purge_all().await.unwrap();

    for _ in 0..3 {
        queue.enqueue(Uuid::new_v4(), 250).await.unwrap();
    }

    let first = queue.take_batch(2).await;
    assert_eq!(first.len(), 2);

    // The remaining item is still claimable; the first two are in-flight.
    let second = queue.take_batch(10).await;
    assert_eq!(second.len(), 1);
    assert!(queue.take_batch(10).await.is_empty());

    queue.purge_all().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn failed_item_lands_in_retry_schedule_not_main_queue() {
    let queue = QueueManager::new(test_pool().await);
    queue.purge_all().await.unwrap();

    queue.enqueue(Uuid::new_v4(), 500).await.unwrap();
    let taken = queue.take_batch(1).await;
    assert_eq!(taken.len(), 1);

    queue.reschedule(&taken).await.unwrap();

    // First backoff is five seconds out, so nothing is due yet.
    assert!(queue.take_due().await.is_empty());
    assert!(queue.take_batch(10).await.is_empty());

    queue.purge_all().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn exhausted_item_is_dead_lettered() {
    let queue = QueueManager::new(test_pool().await);
    queue.purge_all().await.unwrap();

    let id = Uuid::new_v4();
    queue.enqueue(id, 500).await.unwrap();
    let mut taken = queue.take_batch(1).await;

    // Fabricate an item at the retry cap by rewriting the parsed count;
    // reschedule must dead-letter instead of requeueing.
    taken[0].item.retry_count = MAX_RETRIES;
    queue.reschedule(&taken).await.unwrap();

    assert!(queue.take_due().await.is_empty());
    assert!(!queue.is_processed(id).await.unwrap());

    queue.purge_all().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn finalize_success_sets_processed_marker() {
    let queue = QueueManager::new(test_pool().await);
    queue.purge_all().await.unwrap();

    let id = Uuid::new_v4();
    queue.enqueue(id, 750).await.unwrap();
    let taken = queue.take_batch(1).await;

    queue.finalize_success(&taken).await;

    assert!(queue.is_processed(id).await.unwrap());
    // The enqueue marker is gone, so the same payment may re-enter the
    // queue (the processed-marker and ledger suppress actual redelivery).
    assert!(queue.enqueue(id, 750).await.unwrap());

    queue.purge_all().await.unwrap();
}
