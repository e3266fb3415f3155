//! Summary aggregation service
//!
//! The fast path reads the per-processor counter hashes out of the
//! coordination store in one round-trip and never blocks on the ledger; a
//! failed or slow read degrades to zeros rather than an error. The slow
//! path rebuilds the counters from the ledger's GROUP BY aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::keys::SummaryKey;
use crate::cache::RedisPool;
use crate::database::transaction_repository::{decimal_to_cents, TransactionRepository};
use crate::error::AppResult;
use crate::processors::types::ProcessorKind;

/// Counter hash fields
const FIELD_REQUESTS: &str = "total_requests";
const FIELD_AMOUNT: &str = "total_amount";

/// Deadline for the counter fast path
const READ_DEADLINE: Duration = Duration::from_millis(50);

/// Aggregate for one processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSummary {
    pub total_requests: i64,
    pub total_amount: f64,
}

/// Point-in-time summary of accepted payments grouped by processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentsSummary {
    pub default: ProcessorSummary,
    pub fallback: ProcessorSummary,
}

#[derive(Clone)]
pub struct SummaryService {
    pool: RedisPool,
    ledger: TransactionRepository,
}

impl SummaryService {
    pub fn new(pool: RedisPool, ledger: TransactionRepository) -> Self {
        Self { pool, ledger }
    }

    /// Serve the summary from the counters. Date filters are advisory on
    /// this path; they are accepted for interface compatibility but the
    /// counters aggregate the full ledger (rebuild for precise history).
    pub async fn get(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> PaymentsSummary {
        if from.is_some() || to.is_some() {
            info!(?from, ?to, "date filter on summary served from counters");
        }

        match tokio::time::timeout(READ_DEADLINE, self.read_counters()).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                warn!(error = %e, "summary counter read failed, serving zeros");
                PaymentsSummary::default()
            }
            Err(_) => {
                warn!("summary counter read timed out, serving zeros");
                PaymentsSummary::default()
            }
        }
    }

    async fn read_counters(&self) -> CacheResult<PaymentsSummary> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;

        let (default_raw, fallback_raw): (HashMap<String, i64>, HashMap<String, i64>) =
            redis::pipe()
            .cmd("HGETALL")
            .arg(SummaryKey(ProcessorKind::Default).to_string())
            .cmd("HGETALL")
            .arg(SummaryKey(ProcessorKind::Fallback).to_string())
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        Ok(PaymentsSummary {
            default: parse_counter_hash(&default_raw),
            fallback: parse_counter_hash(&fallback_raw),
        })
    }

    /// Apply counter increments for freshly committed ledger rows. Only
    /// newly inserted rows may be passed in; duplicates suppressed by the
    /// ledger's conflict clause must never reach this point.
    pub async fn record_committed(&self, entries: &[(ProcessorKind, i64)]) {
        if entries.is_empty() {
            return;
        }

        let mut requests = [0i64; 2];
        let mut cents = [0i64; 2];
        for (kind, amount_cents) in entries {
            let idx = *kind as usize;
            requests[idx] += 1;
            cents[idx] += amount_cents;
        }

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "summary increment could not reach the store");
                return;
            }
        };

        let mut pipe = redis::pipe();
        for kind in ProcessorKind::ALL {
            let idx = kind as usize;
            if requests[idx] == 0 {
                continue;
            }
            let key = SummaryKey(kind).to_string();
            pipe.cmd("HINCRBY").arg(&key).arg(FIELD_REQUESTS).arg(requests[idx]).ignore();
            pipe.cmd("HINCRBY").arg(&key).arg(FIELD_AMOUNT).arg(cents[idx]).ignore();
        }

        if let Err(e) = pipe.query_async::<_, ()>(&mut *conn).await {
            warn!(error = %e, "summary increment failed; counters drift until rebuild");
        }
    }

    /// Drop the counters (used by purge; rebuild repopulates them)
    pub async fn clear(&self) -> CacheResult<()> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let _: () = redis::cmd("DEL")
            .arg(SummaryKey(ProcessorKind::Default).to_string())
            .arg(SummaryKey(ProcessorKind::Fallback).to_string())
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        Ok(())
    }

    /// Rebuild the counters from the ledger. Administrative; this is the
    /// one summary path that waits on the ledger.
    pub async fn rebuild(&self) -> AppResult<PaymentsSummary> {
        self.clear().await?;

        let rows = self.ledger.summary(None, None).await?;

        let mut summary = PaymentsSummary::default();
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        for row in rows {
            let kind: ProcessorKind = match row.processor.parse() {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(processor = %row.processor, error = %e, "unknown processor in ledger");
                    continue;
                }
            };

            let cents = decimal_to_cents(&row.total_amount);
            let key = SummaryKey(kind).to_string();
            let _: () = redis::pipe()
                .cmd("HSET").arg(&key).arg(FIELD_REQUESTS).arg(row.total_requests).ignore()
                .cmd("HSET").arg(&key).arg(FIELD_AMOUNT).arg(cents).ignore()
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;

            let entry = ProcessorSummary {
                total_requests: row.total_requests,
                total_amount: cents as f64 / 100.0,
            };
            match kind {
                ProcessorKind::Default => summary.default = entry,
                ProcessorKind::Fallback => summary.fallback = entry,
            }
        }

        info!(
            default_requests = summary.default.total_requests,
            fallback_requests = summary.fallback.total_requests,
            "summary counters rebuilt from ledger"
        );

        Ok(summary)
    }
}

fn parse_counter_hash(fields: &HashMap<String, i64>) -> ProcessorSummary {
    ProcessorSummary {
        total_requests: fields.get(FIELD_REQUESTS).copied().unwrap_or(0),
        total_amount: fields.get(FIELD_AMOUNT).copied().unwrap_or(0) as f64 / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serializes_to_public_shape() {
        let summary = PaymentsSummary {
            default: ProcessorSummary {
                total_requests: 1,
                total_amount: 10.0,
            },
            fallback: ProcessorSummary::default(),
        };

        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["default"]["totalRequests"], 1);
        assert_eq!(json["default"]["totalAmount"], 10.0);
        assert_eq!(json["fallback"]["totalRequests"], 0);
        assert_eq!(json["fallback"]["totalAmount"], 0.0);
    }

    #[test]
    fn counter_hash_parsing_zero_fills_missing_fields() {
        assert_eq!(
            parse_counter_hash(&HashMap::new()),
            ProcessorSummary::default()
        );

        let partial = HashMap::from([("total_requests".to_string(), 7)]);
        let parsed = parse_counter_hash(&partial);
        assert_eq!(parsed.total_requests, 7);
        assert_eq!(parsed.total_amount, 0.0);
    }

    #[test]
    fn counter_hash_converts_cents() {
        let fields = HashMap::from([
            ("total_requests".to_string(), 3),
            ("total_amount".to_string(), 1650),
        ]);
        let parsed = parse_counter_hash(&fields);
        assert_eq!(parsed.total_requests, 3);
        assert_eq!(parsed.total_amount, 16.5);
    }

    #[test]
    fn unknown_hash_fields_are_ignored() {
        let fields = HashMap::from([
            ("total_requests".to_string(), 2),
            ("legacy_field".to_string(), 99),
        ]);
        assert_eq!(parse_counter_hash(&fields).total_requests, 2);
    }
}
