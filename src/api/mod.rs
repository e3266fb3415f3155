//! Public HTTP API

pub mod admin;
pub mod payments;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::error;

use crate::cache::RedisPool;
use crate::database::transaction_repository::TransactionRepository;
use crate::queue::QueueManager;
use crate::services::dispatch::DispatchEngine;
use crate::services::summary::SummaryService;

/// Shared state for all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub dispatch: Arc<DispatchEngine>,
    pub summary: SummaryService,
    pub queue: Arc<QueueManager>,
    pub ledger: TransactionRepository,
    pub db_pool: PgPool,
    pub cache_pool: RedisPool,
}

/// Application routes
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/payments", post(payments::create_payment))
        .route("/payments-summary", get(payments::payments_summary))
        .route("/purge-payments", post(admin::purge_payments))
        .route("/rebuild-summary-cache", post(admin::rebuild_summary_cache))
        .route("/healthz", get(healthz))
        .with_state(state)
}

const DEPENDENCY_CHECK_DEADLINE: Duration = Duration::from_secs(2);

/// Service health probe: verifies both backing stores still answer
async fn healthz(State(state): State<ApiState>) -> Result<&'static str, (StatusCode, String)> {
    let (ledger, cache) = tokio::join!(
        timeout(
            DEPENDENCY_CHECK_DEADLINE,
            crate::database::health_check(&state.db_pool),
        ),
        timeout(
            DEPENDENCY_CHECK_DEADLINE,
            crate::cache::health_check(&state.cache_pool),
        ),
    );

    let ledger_ok = matches!(ledger, Ok(Ok(())));
    let cache_ok = matches!(cache, Ok(Ok(())));

    if ledger_ok && cache_ok {
        Ok("OK")
    } else {
        error!(ledger_ok, cache_ok, "health probe failed");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    }
}
