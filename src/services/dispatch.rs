//! Payment dispatch engine
//!
//! Two entry points. The intake path runs per inbound payment: it tries
//! immediate delivery under a tight deadline and hands anything that fails
//! to the queue. The drain tick runs in a background worker: it claims a
//! batch from the queues, delivers everything concurrently under one
//! shared deadline, commits successes to the ledger in a single idempotent
//! batch, and reschedules failures with backoff.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::transaction_repository::{NewTransaction, TransactionRepository};
use crate::error::AppResult;
use crate::processors::client::ProcessorChannel;
use crate::processors::types::{ProcessorKind, ProcessorPaymentRequest};
use crate::queue::item::{QueueItem, TakenItem};
use crate::queue::QueueManager;
use crate::services::health_monitor::HealthMonitor;
use crate::services::summary::SummaryService;

/// Terminal result of the intake path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Delivered synchronously and committed
    Accepted(ProcessorKind),
    /// Handed to the queue for asynchronous delivery
    Queued,
    /// A payment with this correlation id was already committed
    Duplicate,
}

pub struct DispatchEngine {
    queue: Arc<QueueManager>,
    ledger: TransactionRepository,
    summary: SummaryService,
    health: Arc<HealthMonitor>,
    channel: Arc<dyn ProcessorChannel>,
    intake_deadline: Duration,
    drain_deadline: Duration,
    batch_size: usize,
}

impl DispatchEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<QueueManager>,
        ledger: TransactionRepository,
        summary: SummaryService,
        health: Arc<HealthMonitor>,
        channel: Arc<dyn ProcessorChannel>,
        intake_deadline: Duration,
        drain_deadline: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            ledger,
            summary,
            health,
            channel,
            intake_deadline,
            drain_deadline,
            batch_size,
        }
    }

    // =========================================================================
    // Intake path
    // =========================================================================

    /// Accept one payment: duplicate pre-check, synchronous delivery
    /// attempt, queue on failure.
    pub async fn intake(&self, correlation_id: Uuid, amount_cents: i64) -> AppResult<IntakeOutcome> {
        if self.is_known_duplicate(correlation_id).await {
            debug!(correlation_id = %correlation_id, "duplicate payment suppressed at intake");
            return Ok(IntakeOutcome::Duplicate);
        }

        let order = self.health.snapshot().try_order();
        let body = ProcessorPaymentRequest::new(
            correlation_id,
            amount_cents as f64 / 100.0,
            Utc::now(),
        );

        for kind in order {
            match self
                .channel
                .submit_payment(kind, &body, self.intake_deadline)
                .await
            {
                Ok(()) => return self.commit_intake(correlation_id, amount_cents, kind).await,
                Err(e) => {
                    debug!(processor = %kind, correlation_id = %correlation_id, error = %e,
                        "intake delivery attempt failed");
                }
            }
        }

        match self.queue.enqueue(correlation_id, amount_cents).await {
            Ok(inserted) => {
                debug!(correlation_id = %correlation_id, newly_enqueued = inserted, "payment queued");
                Ok(IntakeOutcome::Queued)
            }
            // Fail closed: we could not persist intent anywhere.
            Err(e) => Err(e.into()),
        }
    }

    /// Both duplicate checks fail open: a store error must not reject a
    /// possibly-new payment, the ledger's unique index catches the rest.
    async fn is_known_duplicate(&self, correlation_id: Uuid) -> bool {
        match self.queue.is_processed(correlation_id).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "processed-marker check failed, continuing");
            }
        }

        match self.ledger.exists(correlation_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "ledger duplicate check failed, continuing");
                false
            }
        }
    }

    async fn commit_intake(
        &self,
        correlation_id: Uuid,
        amount_cents: i64,
        processor: ProcessorKind,
    ) -> AppResult<IntakeOutcome> {
        let tx = NewTransaction {
            correlation_id,
            amount_cents,
            processor,
            processed_at: Utc::now(),
        };

        match self.ledger.insert(&tx).await {
            Ok(true) => {
                self.summary
                    .record_committed(&[(processor, amount_cents)])
                    .await;
                self.queue.mark_processed(correlation_id).await;
                info!(correlation_id = %correlation_id, processor = %processor,
                    "payment accepted synchronously");
                Ok(IntakeOutcome::Accepted(processor))
            }
            Ok(false) => {
                // Concurrent replica won the insert; counters stay put.
                self.queue.mark_processed(correlation_id).await;
                Ok(IntakeOutcome::Accepted(processor))
            }
            Err(e) => {
                // The processor took the money-moving call but the ledger is
                // down. Queue the payment so the drain loop commits it once
                // the ledger returns; downstream idempotency absorbs the
                // second delivery.
                error!(correlation_id = %correlation_id, error = %e,
                    "ledger commit failed after delivery, queueing for redelivery");
                self.queue.enqueue(correlation_id, amount_cents).await?;
                Ok(IntakeOutcome::Queued)
            }
        }
    }

    // =========================================================================
    // Drain loop
    // =========================================================================

    /// One drain tick. Returns the number of items taken; the worker loops
    /// without delay while this stays non-zero.
    pub async fn drain_tick(&self) -> usize {
        let (mut batch, due) = tokio::join!(
            self.queue.take_batch(self.batch_size),
            self.queue.take_due(),
        );
        batch.extend(due);

        if batch.is_empty() {
            return 0;
        }
        let taken = batch.len();

        let order = self.health.snapshot().try_order();
        let deadline = Instant::now() + self.drain_deadline;

        let mut deliveries: JoinSet<(TakenItem, Option<ProcessorKind>)> = JoinSet::new();
        for item in batch {
            let channel = self.channel.clone();
            let order = order.clone();
            let call_deadline = self.drain_deadline;
            deliveries.spawn(async move {
                let outcome = tokio::time::timeout_at(
                    deadline,
                    deliver_item(channel, &order, &item.item, call_deadline),
                )
                .await
                .unwrap_or(None);
                (item, outcome)
            });
        }

        let mut successes: Vec<(TakenItem, ProcessorKind)> = Vec::new();
        let mut failures: Vec<TakenItem> = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((item, Some(processor))) => successes.push((item, processor)),
                Ok((item, None)) => failures.push(item),
                Err(e) => {
                    // The claim stays in the processing list and will be
                    // reclaimed; nothing is lost, only delayed.
                    error!(error = %e, "delivery task failed to join");
                }
            }
        }

        if !successes.is_empty() {
            self.commit_batch(&mut successes, &mut failures).await;
        }

        if !failures.is_empty() {
            if let Err(e) = self.queue.reschedule(&failures).await {
                error!(error = %e, count = failures.len(), "reschedule failed, items stay in-flight");
            }
        }

        taken
    }

    /// Commit delivered payments in one idempotent batch. On a ledger
    /// failure every delivered item is demoted to a failure so it retries;
    /// an item must never be marked processed without a ledger row.
    async fn commit_batch(
        &self,
        successes: &mut Vec<(TakenItem, ProcessorKind)>,
        failures: &mut Vec<TakenItem>,
    ) {
        let processed_at = Utc::now();
        let transactions: Vec<NewTransaction> = successes
            .iter()
            .map(|(item, processor)| NewTransaction {
                correlation_id: item.item.correlation_id,
                amount_cents: item.item.amount_cents(),
                processor: *processor,
                processed_at,
            })
            .collect();

        let inserted: HashSet<Uuid> = match self.ledger.create_many(&transactions).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                error!(error = %e, count = successes.len(),
                    "ledger batch insert failed, rescheduling delivered payments");
                failures.extend(successes.drain(..).map(|(item, _)| item));
                return;
            }
        };

        let increments: Vec<(ProcessorKind, i64)> = successes
            .iter()
            .filter(|(item, _)| inserted.contains(&item.item.correlation_id))
            .map(|(item, processor)| (*processor, item.item.amount_cents()))
            .collect();
        self.summary.record_committed(&increments).await;

        let finalized: Vec<TakenItem> =
            successes.iter().map(|(item, _)| item.clone()).collect();
        self.queue.finalize_success(&finalized).await;

        debug!(
            delivered = successes.len(),
            newly_committed = increments.len(),
            "drain batch committed"
        );
    }

    /// Orphan recovery passthrough for the worker's slow timer
    pub async fn reclaim_stale(&self) -> usize {
        match self.queue.reclaim_stale().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "stale reclaim failed");
                0
            }
        }
    }
}

/// Deliver one queued item under the two-tier preference policy. Returns
/// the accepting processor, or `None` when every candidate failed (an
/// empty try order fails immediately without network calls).
async fn deliver_item(
    channel: Arc<dyn ProcessorChannel>,
    order: &[ProcessorKind],
    item: &QueueItem,
    call_deadline: Duration,
) -> Option<ProcessorKind> {
    if order.is_empty() {
        return None;
    }

    let body = ProcessorPaymentRequest::new(item.correlation_id, item.amount, Utc::now());
    for kind in order {
        match channel.submit_payment(*kind, &body, call_deadline).await {
            Ok(()) => return Some(*kind),
            Err(e) => {
                debug!(processor = %kind, correlation_id = %item.correlation_id, error = %e,
                    "drain delivery attempt failed");
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::error::{ProcessorError, ProcessorResult};
    use crate::processors::types::ProcessorStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Channel whose default processor always refuses and whose fallback
    /// always accepts, counting calls per processor.
    struct SplitChannel {
        default_calls: AtomicUsize,
        fallback_calls: AtomicUsize,
    }

    impl SplitChannel {
        fn new() -> Self {
            Self {
                default_calls: AtomicUsize::new(0),
                fallback_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProcessorChannel for SplitChannel {
        async fn submit_payment(
            &self,
            kind: ProcessorKind,
            _request: &ProcessorPaymentRequest,
            _deadline: Duration,
        ) -> ProcessorResult<()> {
            match kind {
                ProcessorKind::Default => {
                    self.default_calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProcessorError::Rejected {
                        processor: kind,
                        status: 500,
                    })
                }
                ProcessorKind::Fallback => {
                    self.fallback_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        }

        async fn probe_health(&self, _kind: ProcessorKind) -> ProcessorResult<ProcessorStatus> {
            Ok(ProcessorStatus {
                failing: false,
                min_response_time: 1,
            })
        }
    }

    fn item(amount_cents: i64) -> QueueItem {
        QueueItem::new(Uuid::new_v4(), amount_cents)
    }

    #[tokio::test]
    async fn delivery_falls_back_when_default_refuses() {
        let channel = Arc::new(SplitChannel::new());
        let order = [ProcessorKind::Default, ProcessorKind::Fallback];

        let accepted = deliver_item(
            channel.clone(),
            &order,
            &item(1000),
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(accepted, Some(ProcessorKind::Fallback));
        assert_eq!(channel.default_calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_honors_restricted_try_order() {
        let channel = Arc::new(SplitChannel::new());

        // Health says only the fallback is usable: the default must not be
        // called at all.
        let accepted = deliver_item(
            channel.clone(),
            &[ProcessorKind::Fallback],
            &item(500),
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(accepted, Some(ProcessorKind::Fallback));
        assert_eq!(channel.default_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_try_order_fails_without_network_calls() {
        let channel = Arc::new(SplitChannel::new());

        let accepted =
            deliver_item(channel.clone(), &[], &item(500), Duration::from_millis(100)).await;

        assert_eq!(accepted, None);
        assert_eq!(channel.default_calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.fallback_calls.load(Ordering::SeqCst), 0);
    }
}
