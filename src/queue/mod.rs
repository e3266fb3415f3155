//! Queue manager
//!
//! Authoritative FIFO, deferred-retry schedule, and in-flight tracking for
//! payments, built on the coordination store. Multi-step take operations
//! run as server-side scripts: a pipeline of separate pop commands is not
//! atomic under concurrent workers and would double-deliver.

pub mod item;

use chrono::Utc;
use redis::Script;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::keys::{
    FailedKey, ProcessedKey, QueueItemKey, FAILED_TTL, MAIN_QUEUE, MARKER_SCAN_PATTERNS,
    PROCESSED_TTL, PROCESSING, QUEUE_ITEM_TTL, RETRY_QUEUE,
};
use crate::cache::RedisPool;
use item::{QueueItem, TakenItem};

/// Marker + push in one atomic unit; returns 1 only when the marker was
/// newly set and the item actually enqueued.
const ENQUEUE_SCRIPT: &str = r#"
local created = redis.call('SET', KEYS[1], '1', 'NX', 'EX', ARGV[2])
if not created then
  return 0
end
redis.call('LPUSH', KEYS[2], ARGV[1])
return 1
"#;

/// Move up to ARGV[1] items from the tail of the main queue into the
/// processing list.
const TAKE_BATCH_SCRIPT: &str = r#"
local moved = {}
for i = 1, tonumber(ARGV[1]) do
  local item = redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
  if not item then
    break
  end
  moved[#moved + 1] = item
end
return moved
"#;

/// Read, remove, and claim every retry entry due at or before ARGV[1].
const TAKE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
if #due == 0 then
  return due
end
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for i = 1, #due do
  redis.call('LPUSH', KEYS[2], due[i])
end
return due
"#;

pub struct QueueManager {
    pool: RedisPool,
    enqueue_script: Script,
    take_batch_script: Script,
    take_due_script: Script,
    /// Raw processing items observed by the previous reclaim scan; an item
    /// seen by two consecutive scans has outlived any live batch deadline
    /// and is treated as orphaned.
    reclaim_seen: Mutex<HashSet<String>>,
}

impl QueueManager {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            enqueue_script: Script::new(ENQUEUE_SCRIPT),
            take_batch_script: Script::new(TAKE_BATCH_SCRIPT),
            take_due_script: Script::new(TAKE_DUE_SCRIPT),
            reclaim_seen: Mutex::new(HashSet::new()),
        }
    }

    /// Idempotent insert into the main queue. Returns whether the payment
    /// was newly enqueued; a second call with the same correlation id
    /// within the marker TTL is a no-op.
    pub async fn enqueue(&self, correlation_id: Uuid, amount_cents: i64) -> CacheResult<bool> {
        let item = QueueItem::new(correlation_id, amount_cents);
        let raw = item.serialize().map_err(CacheError::from)?;
        let marker = QueueItemKey(&correlation_id.to_string()).to_string();

        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let inserted: i32 = self
            .enqueue_script
            .key(&marker)
            .key(MAIN_QUEUE)
            .arg(&raw)
            .arg(QUEUE_ITEM_TTL.as_secs())
            .invoke_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        Ok(inserted == 1)
    }

    /// Atomically claim up to `limit` items from the main queue. A store
    /// error yields an empty batch; the caller simply retries next tick.
    pub async fn take_batch(&self, limit: usize) -> Vec<TakenItem> {
        match self.run_take(&self.take_batch_script, MAIN_QUEUE, limit as i64).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "take_batch failed, returning empty batch");
                Vec::new()
            }
        }
    }

    /// Atomically claim every retry item whose schedule has come due.
    pub async fn take_due(&self) -> Vec<TakenItem> {
        let now_ms = Utc::now().timestamp_millis();
        match self.run_take(&self.take_due_script, RETRY_QUEUE, now_ms).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "take_due failed, returning empty batch");
                Vec::new()
            }
        }
    }

    async fn run_take(
        &self,
        script: &Script,
        source_key: &str,
        arg: i64,
    ) -> CacheResult<Vec<TakenItem>> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let raws: Vec<String> = script
            .key(source_key)
            .key(PROCESSING)
            .arg(arg)
            .invoke_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        let mut taken = Vec::with_capacity(raws.len());
        for raw in raws {
            match QueueItem::parse(&raw) {
                Ok(item) => taken.push(TakenItem { raw, item }),
                Err(e) => {
                    // A corrupt entry can never be delivered; drop it from
                    // the processing list instead of looping on it forever.
                    warn!(error = %e, raw = %raw, "dropping unparseable queue item");
                    let _: Result<i64, _> = redis::cmd("LREM")
                        .arg(PROCESSING)
                        .arg(1)
                        .arg(&raw)
                        .query_async(&mut *conn)
                        .await;
                }
            }
        }

        Ok(taken)
    }

    /// Post-commit bookkeeping for delivered payments: release the
    /// in-flight claim, drop the enqueue marker, and set the
    /// processed-marker. Best-effort by contract; the ledger row is the
    /// source of truth, so store errors are logged and swallowed.
    pub async fn finalize_success(&self, items: &[TakenItem]) {
        if items.is_empty() {
            return;
        }

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "finalize_success could not reach the store");
                return;
            }
        };

        let mut pipe = redis::pipe();
        for taken in items {
            let id = taken.item.correlation_id.to_string();
            pipe.cmd("LREM").arg(PROCESSING).arg(1).arg(&taken.raw).ignore();
            pipe.cmd("DEL").arg(QueueItemKey(&id).to_string()).ignore();
            pipe.cmd("SET")
                .arg(ProcessedKey(&id).to_string())
                .arg("1")
                .arg("EX")
                .arg(PROCESSED_TTL.as_secs())
                .ignore();
        }

        if let Err(e) = pipe.query_async::<_, ()>(&mut *conn).await {
            error!(error = %e, count = items.len(), "finalize_success bookkeeping failed");
        }
    }

    /// Route failed deliveries back through the retry schedule, or
    /// dead-letter the ones that exhausted their budget.
    pub async fn reschedule(&self, items: &[TakenItem]) -> CacheResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;

        let mut pipe = redis::pipe();
        for taken in items {
            let id = taken.item.correlation_id.to_string();
            pipe.cmd("LREM").arg(PROCESSING).arg(1).arg(&taken.raw).ignore();

            match taken.item.next_attempt(now_ms) {
                Some(next) => {
                    let raw = next.serialize().map_err(CacheError::from)?;
                    debug!(
                        correlation_id = %id,
                        retry_count = next.retry_count,
                        next_retry_at = next.next_retry_at,
                        "rescheduling payment"
                    );
                    pipe.cmd("ZADD")
                        .arg(RETRY_QUEUE)
                        .arg(next.next_retry_at)
                        .arg(raw)
                        .ignore();
                }
                None => {
                    warn!(correlation_id = %id, "retry budget exhausted, dead-lettering");
                    pipe.cmd("DEL").arg(QueueItemKey(&id).to_string()).ignore();
                    pipe.cmd("SET")
                        .arg(FailedKey(&id).to_string())
                        .arg("1")
                        .arg("EX")
                        .arg(FAILED_TTL.as_secs())
                        .ignore();
                }
            }
        }

        pipe.query_async::<_, ()>(&mut *conn)
            .await
            .map_err(CacheError::from)
    }

    /// Administrative wipe: queues, in-flight list, and every per-payment
    /// marker.
    pub async fn purge_all(&self) -> CacheResult<()> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;

        let _: () = redis::cmd("DEL")
            .arg(MAIN_QUEUE)
            .arg(RETRY_QUEUE)
            .arg(PROCESSING)
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        for pattern in MARKER_SCAN_PATTERNS {
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(500)
                    .query_async(&mut *conn)
                    .await
                    .map_err(CacheError::from)?;

                if !keys.is_empty() {
                    let _: () = redis::cmd("DEL")
                        .arg(&keys)
                        .query_async(&mut *conn)
                        .await
                        .map_err(CacheError::from)?;
                }

                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Recover in-flight items orphaned by a crashed worker.
    ///
    /// Mark-and-sweep across reclaim ticks: anything still sitting in the
    /// processing list since the previous scan has outlived every live
    /// batch deadline, so it is pushed back into the retry schedule with
    /// its retry count preserved and made immediately due.
    pub async fn reclaim_stale(&self) -> CacheResult<usize> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;

        let current: Vec<String> = redis::cmd("LRANGE")
            .arg(PROCESSING)
            .arg(0)
            .arg(-1)
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        let orphans: Vec<String> = {
            let mut seen = self.reclaim_seen.lock().expect("reclaim set poisoned");
            let orphans = current
                .iter()
                .filter(|raw| seen.contains(*raw))
                .cloned()
                .collect();
            *seen = current.iter().cloned().collect();
            orphans
        };

        let now_ms = Utc::now().timestamp_millis();
        let mut reclaimed = 0usize;
        for raw in orphans {
            let removed: i64 = redis::cmd("LREM")
                .arg(PROCESSING)
                .arg(1)
                .arg(&raw)
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;

            // Another replica may have reclaimed it first; only the one
            // that actually removed the claim may requeue.
            if removed > 0 {
                let _: () = redis::cmd("ZADD")
                    .arg(RETRY_QUEUE)
                    .arg(now_ms)
                    .arg(&raw)
                    .query_async(&mut *conn)
                    .await
                    .map_err(CacheError::from)?;
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            warn!(count = reclaimed, "reclaimed orphaned in-flight payments");
        }

        Ok(reclaimed)
    }

    /// Whether a processed-marker exists for this payment
    pub async fn is_processed(&self, correlation_id: Uuid) -> CacheResult<bool> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(ProcessedKey(&correlation_id.to_string()).to_string())
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        Ok(exists)
    }

    /// Mark a payment processed (post-commit dedup). Best-effort.
    pub async fn mark_processed(&self, correlation_id: Uuid) {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "could not set processed-marker");
                return;
            }
        };

        let result: Result<(), _> = redis::cmd("SET")
            .arg(ProcessedKey(&correlation_id.to_string()).to_string())
            .arg("1")
            .arg("EX")
            .arg(PROCESSED_TTL.as_secs())
            .query_async(&mut *conn)
            .await;

        if let Err(e) = result {
            warn!(error = %e, correlation_id = %correlation_id, "could not set processed-marker");
        }
    }
}
