//! Retry policy contract: backoff schedule, retry bound, item identity

use payment_broker::queue::item::{backoff, QueueItem, MAX_RETRIES};
use std::time::Duration;
use uuid::Uuid;

fn fresh_item() -> QueueItem {
    QueueItem::new(
        Uuid::parse_str("55555555-5555-5555-5555-555555555555").unwrap(),
        1000,
    )
}

#[test]
fn delay_before_retry_r_matches_schedule() {
    // An item that has failed r times was rescheduled with backoff(r - 1).
    for r in 1..=MAX_RETRIES {
        let expected = Duration::from_secs(std::cmp::min(300, (1u64 << (r - 1)) * 5));
        assert_eq!(backoff(r - 1), expected, "delay before retry {}", r);
    }
}

#[test]
fn lifetime_attempt_count_is_bounded() {
    // Initial attempt plus one per reschedule; next_attempt refuses once the
    // budget is spent, so the lifetime attempt count caps at MAX_RETRIES + 1.
    let mut item = fresh_item();
    let mut attempts = 1u32;

    let mut now_ms = 0i64;
    while let Some(next) = item.next_attempt(now_ms) {
        attempts += 1;
        now_ms = next.next_retry_at;
        item = next;
    }

    assert_eq!(attempts, MAX_RETRIES + 1);
    assert_eq!(item.retry_count, MAX_RETRIES);
}

#[test]
fn reschedule_chain_preserves_payment_fields() {
    let original = fresh_item();
    let rescheduled = original
        .next_attempt(1_000)
        .and_then(|item| item.next_attempt(10_000))
        .unwrap();

    assert_eq!(rescheduled.correlation_id, original.correlation_id);
    assert_eq!(rescheduled.amount, original.amount);
    assert_eq!(rescheduled.retry_count, 2);
}

#[test]
fn raw_identity_is_stable_across_serialization() {
    // LREM matches on the exact raw string, so serializing the same item
    // twice must produce identical bytes.
    let item = fresh_item();
    assert_eq!(item.serialize().unwrap(), item.serialize().unwrap());

    let reparsed = QueueItem::parse(&item.serialize().unwrap()).unwrap();
    assert_eq!(reparsed.serialize().unwrap(), item.serialize().unwrap());
}
