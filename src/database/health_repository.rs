use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::database::error::DatabaseError;
use crate::processors::types::{ProcessorKind, ProcessorStatus};

/// Observability mirror of the processor-health verdict.
///
/// The authoritative copy lives in the coordination store; these rows only
/// exist so the last verdict survives in the ledger for inspection.
#[derive(Clone)]
pub struct HealthRepository {
    pool: PgPool,
}

impl HealthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_status(
        &self,
        processor: ProcessorKind,
        status: &ProcessorStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO processor_health (processor_name, is_failing, min_response_time, last_checked_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (processor_name) DO UPDATE
             SET is_failing = EXCLUDED.is_failing,
                 min_response_time = EXCLUDED.min_response_time,
                 last_checked_at = EXCLUDED.last_checked_at",
        )
        .bind(processor.as_str())
        .bind(status.failing)
        .bind(status.min_response_time as i64)
        .bind(checked_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }
}
