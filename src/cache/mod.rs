//! Redis coordination layer for the payment broker
//!
//! All cross-replica state lives here: the payment queues, the dedup and
//! terminal markers, the summary counters, and the shared health verdict.
//! The module owns the connection pool; the queue and summary services
//! build their operations on top of it.

pub mod error;
pub mod keys;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{error, info, warn};

use error::CacheError;

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Redis pool configuration
#[derive(Debug, Clone)]
pub struct CachePoolConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for CachePoolConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl CachePoolConfig {
    pub fn from_config(config: &crate::config::CacheConfig) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            max_connections: config.max_connections,
            ..Default::default()
        }
    }
}

/// Initialize the Redis connection pool
pub async fn init_cache_pool(config: CachePoolConfig) -> Result<RedisPool, CacheError> {
    info!(
        max_connections = config.max_connections,
        redis_url = %config.redis_url,
        "Initializing Redis coordination pool"
    );

    let manager = RedisConnectionManager::new(config.redis_url.clone()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CacheError::ConnectionError(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

    // The broker degrades gracefully without Redis, so a failed first ping
    // is not fatal.
    if let Err(e) = test_connection(&pool).await {
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    info!("Redis coordination pool initialized");
    Ok(pool)
}

/// Test Redis connection
async fn test_connection(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool.get().await.map_err(CacheError::from)?;

    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

    Ok(())
}

/// Health check for the Redis connection pool
pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
    test_connection(pool).await
}
