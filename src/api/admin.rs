//! Administrative endpoints: purge and counter rebuild

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::info;

use crate::api::payments::{tag_request, MessageResponse};
use crate::api::ApiState;
use crate::error::AppError;
use crate::middleware::logging::get_request_id_from_headers;

/// `POST /purge-payments`
///
/// Clears every queue collection, every per-payment marker, the summary
/// counters, and the ledger rows. A purge that left ledger rows behind
/// would let the next rebuild resurrect the counters it just cleared.
pub async fn purge_payments(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers);

    state
        .queue
        .purge_all()
        .await
        .map_err(|e| tag_request(e.into(), &request_id))?;
    state
        .summary
        .clear()
        .await
        .map_err(|e| tag_request(e.into(), &request_id))?;
    let removed = state
        .ledger
        .purge()
        .await
        .map_err(|e| tag_request(e.into(), &request_id))?;

    info!(ledger_rows = removed, "payments purged");

    Ok(Json(MessageResponse {
        message: "payments purged".to_string(),
    }))
}

/// `POST /rebuild-summary-cache`
///
/// Recomputes the summary counters from the ledger. This is the supported
/// recovery path after a purge or counter drift.
pub async fn rebuild_summary_cache(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers);

    let summary = state
        .summary
        .rebuild()
        .await
        .map_err(|e| tag_request(e, &request_id))?;

    info!(
        default_requests = summary.default.total_requests,
        fallback_requests = summary.fallback.total_requests,
        "summary cache rebuilt"
    );

    Ok(Json(MessageResponse {
        message: "summary cache rebuilt".to_string(),
    }))
}
