//! Shared-store key layout
//!
//! Every key the broker writes into Redis is named here. The queue
//! collections and the health keys are fixed singletons; the per-payment
//! markers and the summary hashes are built through typed key builders.

use std::fmt;
use std::time::Duration;

use crate::processors::types::ProcessorKind;

/// Main FIFO of fresh work (list, push-head / pop-tail)
pub const MAIN_QUEUE: &str = "payment_queue";

/// Retry schedule (sorted set scored by next-eligible epoch millis)
pub const RETRY_QUEUE: &str = "payment_retry_queue";

/// In-flight items currently owned by a worker (list)
pub const PROCESSING: &str = "payment_processing";

/// Cached cluster-wide health verdict (JSON string)
pub const HEALTH_STATUS: &str = "health_status";

/// Prober election lease
pub const HEALTH_CHECK_LOCK: &str = "health_check_lock";

/// Enqueue dedup marker lifetime
pub const QUEUE_ITEM_TTL: Duration = Duration::from_secs(3600);

/// Post-commit dedup marker lifetime
pub const PROCESSED_TTL: Duration = Duration::from_secs(3600);

/// Terminal-failure marker lifetime
pub const FAILED_TTL: Duration = Duration::from_secs(86400);

/// Cached health verdict lifetime
pub const HEALTH_STATUS_TTL: Duration = Duration::from_secs(15);

/// Prober lease lifetime
pub const HEALTH_LOCK_TTL: Duration = Duration::from_secs(4);

/// Dedup marker set at enqueue time
#[derive(Debug, Clone)]
pub struct QueueItemKey<'a>(pub &'a str);

impl fmt::Display for QueueItemKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue_item:{}", self.0)
    }
}

/// Dedup marker set after a ledger commit
#[derive(Debug, Clone)]
pub struct ProcessedKey<'a>(pub &'a str);

impl fmt::Display for ProcessedKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment_processed:{}", self.0)
    }
}

/// Terminal marker set after retry exhaustion
#[derive(Debug, Clone)]
pub struct FailedKey<'a>(pub &'a str);

impl fmt::Display for FailedKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment_failed:{}", self.0)
    }
}

/// Per-processor summary counter hash (`total_requests`, `total_amount`)
#[derive(Debug, Clone)]
pub struct SummaryKey(pub ProcessorKind);

impl fmt::Display for SummaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "summary:processor:{}", self.0)
    }
}

/// Patterns matched by `purge_all` when sweeping per-payment markers
pub const MARKER_SCAN_PATTERNS: &[&str] =
    &["queue_item:*", "payment_processed:*", "payment_failed:*"];
