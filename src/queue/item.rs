//! Queue item representation and retry policy

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Retries stop after this many reschedules; the payment is then
/// dead-lettered behind a failed-marker.
pub const MAX_RETRIES: u32 = 10;

/// Retry backoff: `min(300, 2^r * 5)` seconds, anchored on the
/// pre-increment retry count, so consecutive delays run
/// 5, 10, 20, 40, 80, 160, 300, 300, ...
pub fn backoff(retry_count: u32) -> Duration {
    let exp = 1u64 << retry_count.min(16);
    Duration::from_secs(std::cmp::min(300, exp.saturating_mul(5)))
}

/// One unit of queued work. The serialized JSON form is the item's
/// identity inside the Redis lists, so a taken item keeps its raw string
/// alongside the parsed fields for exact removal later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub correlation_id: Uuid,
    pub amount: f64,
    pub retry_count: u32,
    pub next_retry_at: i64,
}

impl QueueItem {
    pub fn new(correlation_id: Uuid, amount_cents: i64) -> Self {
        Self {
            correlation_id,
            amount: amount_cents as f64 / 100.0,
            retry_count: 0,
            next_retry_at: 0,
        }
    }

    pub fn amount_cents(&self) -> i64 {
        (self.amount * 100.0).round() as i64
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Successor item scheduled for the next attempt. `None` once the
    /// retry budget is exhausted.
    pub fn next_attempt(&self, now_ms: i64) -> Option<QueueItem> {
        if self.retry_count >= MAX_RETRIES {
            return None;
        }

        let delay = backoff(self.retry_count);
        Some(QueueItem {
            correlation_id: self.correlation_id,
            amount: self.amount,
            retry_count: self.retry_count + 1,
            next_retry_at: now_ms + delay.as_millis() as i64,
        })
    }
}

/// A queue item pulled out of Redis: parsed fields plus the exact raw
/// string needed for `LREM`.
#[derive(Debug, Clone)]
pub struct TakenItem {
    pub raw: String,
    pub item: QueueItem,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_id() -> Uuid {
        Uuid::parse_str("33333333-3333-3333-3333-333333333333").unwrap()
    }

    #[test]
    fn backoff_schedule_doubles_then_caps() {
        let expected = [5, 10, 20, 40, 80, 160, 300, 300, 300, 300];
        for (r, secs) in expected.iter().enumerate() {
            assert_eq!(backoff(r as u32), Duration::from_secs(*secs), "r={}", r);
        }
    }

    #[test]
    fn backoff_does_not_overflow_on_large_counts() {
        assert_eq!(backoff(63), Duration::from_secs(300));
        assert_eq!(backoff(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn exhaustion_schedule_totals_about_1515_seconds() {
        let total: u64 = (0..MAX_RETRIES).map(|r| backoff(r).as_secs()).sum();
        assert_eq!(total, 1515);
    }

    #[test]
    fn item_serde_uses_camel_case_field_names() {
        let item = QueueItem::new(test_id(), 1000);
        let json: serde_json::Value = serde_json::from_str(&item.serialize().unwrap()).unwrap();

        assert_eq!(json["correlationId"], "33333333-3333-3333-3333-333333333333");
        assert_eq!(json["amount"], 10.0);
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["nextRetryAt"], 0);
    }

    #[test]
    fn raw_form_round_trips() {
        let item = QueueItem {
            correlation_id: test_id(),
            amount: 5.5,
            retry_count: 3,
            next_retry_at: 1_700_000_000_000,
        };

        let raw = item.serialize().unwrap();
        assert_eq!(QueueItem::parse(&raw).unwrap(), item);
    }

    #[test]
    fn amount_cents_is_exact_for_two_decimals() {
        let item = QueueItem::new(test_id(), 550);
        assert_eq!(item.amount, 5.5);
        assert_eq!(item.amount_cents(), 550);
    }

    #[test]
    fn next_attempt_increments_and_schedules() {
        let item = QueueItem::new(test_id(), 100);
        let next = item.next_attempt(1_000_000).unwrap();

        assert_eq!(next.retry_count, 1);
        assert_eq!(next.next_retry_at, 1_000_000 + 5_000);

        let after = next.next_attempt(2_000_000).unwrap();
        assert_eq!(after.retry_count, 2);
        assert_eq!(after.next_retry_at, 2_000_000 + 10_000);
    }

    #[test]
    fn next_attempt_stops_at_retry_cap() {
        let mut item = QueueItem::new(test_id(), 100);
        item.retry_count = MAX_RETRIES;
        assert!(item.next_attempt(0).is_none());

        item.retry_count = MAX_RETRIES - 1;
        assert!(item.next_attempt(0).is_some());
    }
}
