use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::processors::types::ProcessorKind;

/// Payment about to be committed. Amounts are carried as integer cents and
/// widened to `NUMERIC(10,2)` at the query boundary.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub correlation_id: Uuid,
    pub amount_cents: i64,
    pub processor: ProcessorKind,
    pub processed_at: DateTime<Utc>,
}

/// Integer cents -> scale-2 decimal (`1990 -> 19.90`)
pub fn cents_to_decimal(cents: i64) -> BigDecimal {
    BigDecimal::new(cents.into(), 2)
}

/// Scale-2 decimal -> integer cents (`19.90 -> 1990`)
pub fn decimal_to_cents(amount: &BigDecimal) -> i64 {
    (amount * BigDecimal::from(100))
        .with_scale(0)
        .to_i64()
        .unwrap_or(0)
}

/// Per-processor aggregate over the ledger
#[derive(Debug, Clone, FromRow)]
pub struct SummaryRow {
    pub processor: String,
    pub total_requests: i64,
    pub total_amount: BigDecimal,
}

/// Repository for the payments ledger
#[derive(Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent single insert. Returns whether a row was actually
    /// written; a duplicate correlation id is swallowed by the conflict
    /// clause and reported as `false`.
    pub async fn insert(&self, tx: &NewTransaction) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO transactions (correlation_id, amount, processor, processed_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (correlation_id) DO NOTHING",
        )
        .bind(tx.correlation_id)
        .bind(cents_to_decimal(tx.amount_cents))
        .bind(tx.processor.as_str())
        .bind(tx.processed_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Batch insert for a drain tick. Returns the correlation ids that were
    /// newly written; ids already present in the ledger are absent from the
    /// result, which is what gates the summary-counter increments.
    pub async fn create_many(
        &self,
        transactions: &[NewTransaction],
    ) -> Result<Vec<Uuid>, DatabaseError> {
        if transactions.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(transactions.len());
        let mut amounts = Vec::with_capacity(transactions.len());
        let mut processors = Vec::with_capacity(transactions.len());
        let mut processed_ats = Vec::with_capacity(transactions.len());
        for tx in transactions {
            ids.push(tx.correlation_id);
            amounts.push(cents_to_decimal(tx.amount_cents));
            processors.push(tx.processor.as_str().to_string());
            processed_ats.push(tx.processed_at);
        }

        let inserted: Vec<(Uuid,)> = sqlx::query_as(
            "INSERT INTO transactions (correlation_id, amount, processor, processed_at)
             SELECT * FROM UNNEST($1::uuid[], $2::numeric[], $3::varchar[], $4::timestamptz[])
             ON CONFLICT (correlation_id) DO NOTHING
             RETURNING correlation_id",
        )
        .bind(&ids)
        .bind(&amounts)
        .bind(&processors)
        .bind(&processed_ats)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(inserted.into_iter().map(|(id,)| id).collect())
    }

    /// Whether a payment with this correlation id has been committed
    pub async fn exists(&self, correlation_id: Uuid) -> Result<bool, DatabaseError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT correlation_id FROM transactions WHERE correlation_id = $1")
                .bind(correlation_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        Ok(row.is_some())
    }

    /// GROUP BY aggregate used to rebuild the summary counters
    pub async fn summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<SummaryRow>, DatabaseError> {
        sqlx::query_as::<_, SummaryRow>(
            "SELECT processor,
                    COUNT(*) AS total_requests,
                    COALESCE(SUM(amount), 0) AS total_amount
             FROM transactions
             WHERE ($1::timestamptz IS NULL OR processed_at >= $1)
               AND ($2::timestamptz IS NULL OR processed_at <= $2)
             GROUP BY processor",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Administrative wipe of the ledger
    pub async fn purge(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM transactions")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_round_trip() {
        let decimal = cents_to_decimal(1990);
        assert_eq!(decimal.to_string(), "19.90");
        assert_eq!(decimal_to_cents(&decimal), 1990);
    }

    #[test]
    fn zero_and_small_amounts() {
        assert_eq!(cents_to_decimal(0).to_string(), "0.00");
        assert_eq!(cents_to_decimal(5).to_string(), "0.05");
        assert_eq!(decimal_to_cents(&cents_to_decimal(5)), 5);
    }

    #[test]
    fn decimal_to_cents_handles_whole_numbers() {
        let ten = BigDecimal::from(10);
        assert_eq!(decimal_to_cents(&ten), 1000);
    }
}
