//! Payment intake and summary endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::api::ApiState;
use crate::error::AppError;
use crate::middleware::logging::get_request_id_from_headers;
use crate::services::dispatch::IntakeOutcome;
use crate::services::summary::PaymentsSummary;

/// Largest amount representable in the ledger's NUMERIC(10,2) column
const MAX_AMOUNT_CENTS: i64 = 9_999_999_999;

/// Inbound payment payload. Fields are optional so missing and ill-typed
/// cases produce field-level validation errors instead of a bare 400.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestBody {
    pub correlation_id: Option<String>,
    pub amount: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// `POST /payments`
///
/// 200 when delivered synchronously (or suppressed as a duplicate), 202
/// when queued for asynchronous delivery, 400 on invalid payloads, 500
/// when the payment could not be persisted anywhere.
pub async fn create_payment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<PaymentRequestBody>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let request_id = get_request_id_from_headers(&headers);

    let Json(body) = payload.map_err(|e| {
        tag_request(
            AppError::validation("body", format!("malformed JSON payload: {}", e)),
            &request_id,
        )
    })?;

    let (correlation_id, amount_cents) =
        validate_payment(&body).map_err(|e| tag_request(e, &request_id))?;

    let outcome = state
        .dispatch
        .intake(correlation_id, amount_cents)
        .await
        .map_err(|e| tag_request(e, &request_id))?;

    let (status, message) = match outcome {
        IntakeOutcome::Accepted(processor) => (
            StatusCode::OK,
            format!("payment accepted by {} processor", processor),
        ),
        // Idempotent POST: a replayed correlation id succeeds silently.
        IntakeOutcome::Duplicate => (StatusCode::OK, "payment already accepted".to_string()),
        IntakeOutcome::Queued => (
            StatusCode::ACCEPTED,
            "payment queued for processing".to_string(),
        ),
    };

    Ok((status, Json(MessageResponse { message })))
}

/// Stamp the layer-assigned request id onto an outgoing error
pub(crate) fn tag_request(err: AppError, request_id: &Option<String>) -> AppError {
    match request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    }
}

fn validate_payment(body: &PaymentRequestBody) -> Result<(Uuid, i64), AppError> {
    let raw_id = body
        .correlation_id
        .as_deref()
        .ok_or_else(|| AppError::validation("correlationId", "field is required"))?;

    let correlation_id = Uuid::parse_str(raw_id)
        .map_err(|_| AppError::validation("correlationId", "must be a UUID"))?;

    let amount = body
        .amount
        .ok_or_else(|| AppError::validation("amount", "field is required"))?;

    if !amount.is_finite() || amount < 0.0 {
        return Err(AppError::validation(
            "amount",
            "must be a non-negative number",
        ));
    }

    let amount_cents = (amount * 100.0).round() as i64;
    if amount_cents > MAX_AMOUNT_CENTS {
        return Err(AppError::validation("amount", "exceeds the supported range"));
    }

    Ok((correlation_id, amount_cents))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// `GET /payments-summary`
///
/// Always answers 200; the service degrades to zeros internally rather
/// than erroring. Date bounds are parsed leniently because they are
/// advisory on the counter fast path.
pub async fn payments_summary(
    State(state): State<ApiState>,
    Query(query): Query<SummaryQuery>,
) -> Json<PaymentsSummary> {
    let from = parse_bound(query.from.as_deref());
    let to = parse_bound(query.to.as_deref());

    Json(state.summary.get(from, to).await)
}

fn parse_bound(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            debug!(raw = %raw, error = %e, "ignoring unparseable summary bound");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(correlation_id: Option<&str>, amount: Option<f64>) -> PaymentRequestBody {
        PaymentRequestBody {
            correlation_id: correlation_id.map(|s| s.to_string()),
            amount,
        }
    }

    #[test]
    fn valid_payment_converts_to_cents() {
        let parsed = validate_payment(&body(
            Some("11111111-1111-1111-1111-111111111111"),
            Some(19.9),
        ))
        .unwrap();

        assert_eq!(parsed.1, 1990);
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(validate_payment(&body(None, Some(1.0))).is_err());
        assert!(
            validate_payment(&body(Some("11111111-1111-1111-1111-111111111111"), None)).is_err()
        );
    }

    #[test]
    fn malformed_uuid_is_rejected() {
        assert!(validate_payment(&body(Some("not-a-uuid"), Some(1.0))).is_err());
    }

    #[test]
    fn negative_and_non_finite_amounts_are_rejected() {
        let id = "11111111-1111-1111-1111-111111111111";
        assert!(validate_payment(&body(Some(id), Some(-0.01))).is_err());
        assert!(validate_payment(&body(Some(id), Some(f64::NAN))).is_err());
        assert!(validate_payment(&body(Some(id), Some(f64::INFINITY))).is_err());
    }

    #[test]
    fn amounts_round_to_two_fractional_digits() {
        let id = "11111111-1111-1111-1111-111111111111";
        let parsed = validate_payment(&body(Some(id), Some(10.009))).unwrap();
        assert_eq!(parsed.1, 1001);
    }

    #[test]
    fn oversized_amount_is_rejected() {
        let id = "11111111-1111-1111-1111-111111111111";
        assert!(validate_payment(&body(Some(id), Some(1e12))).is_err());
        assert!(validate_payment(&body(Some(id), Some(99_999_999.99))).is_ok());
    }

    #[test]
    fn summary_bounds_parse_leniently() {
        assert!(parse_bound(Some("2025-07-01T00:00:00Z")).is_some());
        assert!(parse_bound(Some("2025-07-01T00:00:00.000Z")).is_some());
        assert!(parse_bound(Some("yesterday")).is_none());
        assert!(parse_bound(None).is_none());
    }
}
