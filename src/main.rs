use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use payment_broker::api::{self, ApiState};
use payment_broker::cache::{init_cache_pool, CachePoolConfig};
use payment_broker::config::AppConfig;
use payment_broker::database::health_repository::HealthRepository;
use payment_broker::database::transaction_repository::TransactionRepository;
use payment_broker::database::{close_ledger_pool, init_ledger_pool};
use payment_broker::logging::init_tracing;
use payment_broker::middleware::logging::{request_logging_middleware, UuidRequestId};
use payment_broker::processors::client::{HttpProcessorGateway, ProcessorChannel};
use payment_broker::queue::QueueManager;
use payment_broker::services::dispatch::DispatchEngine;
use payment_broker::services::health_monitor::HealthMonitor;
use payment_broker::services::summary::SummaryService;
use payment_broker::workers::DrainWorker;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;

    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "🚀 Starting payment broker"
    );

    // Ledger pool
    info!("📊 Initializing ledger connection pool...");
    let db_pool = init_ledger_pool(&config.database).await.map_err(|e| {
        error!("Failed to initialize ledger pool: {}", e);
        anyhow::anyhow!(e.to_string())
    })?;
    info!("✅ Ledger pool initialized");

    // Coordination store pool
    info!("🔄 Initializing coordination store pool...");
    let cache_pool = init_cache_pool(CachePoolConfig::from_config(&config.cache))
        .await
        .map_err(|e| {
            error!("Failed to initialize coordination pool: {}", e);
            anyhow::anyhow!(e.to_string())
        })?;
    info!("✅ Coordination store pool initialized");

    // Processor gateway
    let gateway: Arc<dyn ProcessorChannel> = Arc::new(
        HttpProcessorGateway::new(&config.processors)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?,
    );
    info!(
        default_url = %config.processors.default_url,
        fallback_url = %config.processors.fallback_url,
        "✅ Processor gateway initialized"
    );

    let ledger = TransactionRepository::new(db_pool.clone());
    let queue = Arc::new(QueueManager::new(cache_pool.clone()));
    let summary = SummaryService::new(cache_pool.clone(), ledger.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Health monitor: single elected prober, shared verdict
    let health = Arc::new(HealthMonitor::new(
        cache_pool.clone(),
        gateway.clone(),
        HealthRepository::new(db_pool.clone()),
        config.processors.health_interval(),
    ));
    let health_handle = tokio::spawn(health.clone().run(shutdown_rx.clone()));

    // Dispatch engine + drain worker
    let dispatch = Arc::new(DispatchEngine::new(
        queue.clone(),
        ledger.clone(),
        summary.clone(),
        health.clone(),
        gateway,
        config.processors.intake_deadline(),
        config.processors.drain_deadline(),
        config.worker.batch_size,
    ));

    let drain_worker = DrainWorker::new(dispatch.clone(), &config.worker);
    let drain_handle = tokio::spawn(drain_worker.run(shutdown_rx.clone()));
    info!(
        batch_size = config.worker.batch_size,
        "✅ Drain worker started"
    );

    // Routes
    let state = ApiState {
        dispatch,
        summary,
        queue,
        ledger,
        db_pool: db_pool.clone(),
        cache_pool: cache_pool.clone(),
    };
    let app: Router = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!();
    println!("  payment-broker listening on http://{}", addr);
    println!();
    println!("  POST /payments               - accept a payment");
    println!("  GET  /payments-summary       - aggregated summary");
    println!("  POST /purge-payments         - administrative purge");
    println!("  POST /rebuild-summary-cache  - rebuild counters from ledger");
    println!("  GET  /healthz                - service health probe");
    println!();

    info!(address = %addr, "🚀 Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await?;

    // Teardown: stop accepting, let the workers drain one final cycle,
    // then close the stores.
    let _ = shutdown_tx.send(true);
    for (name, handle) in [("drain", drain_handle), ("health", health_handle)] {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(10), handle).await {
            error!(worker = name, error = %e, "timed out waiting for worker shutdown");
        }
    }

    // bb8 has no explicit close; the Redis connections drop with the last
    // pool handle on exit.
    close_ledger_pool(&db_pool).await;

    info!("👋 Server shutdown complete");

    Ok(())
}
