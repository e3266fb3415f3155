//! Processor health monitor
//!
//! One elected prober per cluster: every tick a replica first tries to
//! adopt the cached verdict from the coordination store, and only when the
//! cache is empty does it race for the probe lease. The winner probes both
//! processors in parallel, shares the verdict with a short TTL, and
//! mirrors it into the ledger for observability. Everyone else reads the
//! local snapshot without I/O.

use chrono::Utc;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::error::CacheError;
use crate::cache::keys::{HEALTH_CHECK_LOCK, HEALTH_LOCK_TTL, HEALTH_STATUS, HEALTH_STATUS_TTL};
use crate::cache::RedisPool;
use crate::database::health_repository::HealthRepository;
use crate::processors::client::ProcessorChannel;
use crate::processors::types::{HealthSnapshot, ProcessorKind, ProcessorStatus};

pub struct HealthMonitor {
    snapshot: RwLock<HealthSnapshot>,
    pool: RedisPool,
    channel: Arc<dyn ProcessorChannel>,
    mirror: HealthRepository,
    interval: std::time::Duration,
}

impl HealthMonitor {
    pub fn new(
        pool: RedisPool,
        channel: Arc<dyn ProcessorChannel>,
        mirror: HealthRepository,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            // Cold start treats both processors as failing: a replica with
            // no verdict queues work instead of blindly calling.
            snapshot: RwLock::new(HealthSnapshot::default()),
            pool,
            channel,
            mirror,
            interval,
        }
    }

    /// Current local snapshot, readable without I/O
    pub fn snapshot(&self) -> HealthSnapshot {
        *self.snapshot.read().expect("health snapshot poisoned")
    }

    fn store_snapshot(&self, snapshot: HealthSnapshot) {
        *self.snapshot.write().expect("health snapshot poisoned") = snapshot;
    }

    /// Monitor loop; runs until the shutdown signal flips
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "health monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health monitor stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.tick().await;
                }
            }
        }

        info!("health monitor stopped");
    }

    /// One monitor tick: adopt the shared verdict, or win the lease and
    /// probe.
    pub async fn tick(&self) {
        match self.read_cached_verdict().await {
            Ok(Some(cached)) => {
                self.store_snapshot(cached);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                // Without the store there is no lease to win either; keep
                // the last local snapshot until the TTL story resumes.
                warn!(error = %e, "could not read cached health verdict");
                return;
            }
        }

        match self.acquire_lease().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("health probe lease held elsewhere");
                return;
            }
            Err(e) => {
                warn!(error = %e, "could not acquire health probe lease");
                return;
            }
        }

        let (default_status, fallback_status) = tokio::join!(
            self.probe(ProcessorKind::Default),
            self.probe(ProcessorKind::Fallback),
        );

        let snapshot = HealthSnapshot {
            default: default_status,
            fallback: fallback_status,
            last_checked_at: Some(Utc::now()),
        };
        self.store_snapshot(snapshot);

        if let Err(e) = self.publish_verdict(&snapshot).await {
            warn!(error = %e, "could not publish health verdict");
        }

        self.mirror_to_ledger(&snapshot).await;

        info!(
            default_failing = snapshot.default.failing,
            fallback_failing = snapshot.fallback.failing,
            "health verdict refreshed"
        );
    }

    async fn probe(&self, kind: ProcessorKind) -> ProcessorStatus {
        match self.channel.probe_health(kind).await {
            Ok(status) => status,
            Err(e) => {
                debug!(processor = %kind, error = %e, "health probe failed");
                ProcessorStatus::unreachable()
            }
        }
    }

    async fn read_cached_verdict(&self) -> Result<Option<HealthSnapshot>, CacheError> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(HEALTH_STATUS)
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        match raw {
            Some(json) => {
                let snapshot: HealthSnapshot =
                    serde_json::from_str(&json).map_err(CacheError::from)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn acquire_lease(&self) -> Result<bool, CacheError> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let granted: Option<String> = redis::cmd("SET")
            .arg(HEALTH_CHECK_LOCK)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(HEALTH_LOCK_TTL.as_secs())
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        Ok(granted.is_some())
    }

    async fn publish_verdict(&self, snapshot: &HealthSnapshot) -> Result<(), CacheError> {
        let json = serde_json::to_string(snapshot).map_err(CacheError::from)?;
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let _: () = redis::cmd("SET")
            .arg(HEALTH_STATUS)
            .arg(json)
            .arg("EX")
            .arg(HEALTH_STATUS_TTL.as_secs())
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        Ok(())
    }

    /// Best-effort observability mirror into the ledger
    async fn mirror_to_ledger(&self, snapshot: &HealthSnapshot) {
        let checked_at = snapshot.last_checked_at.unwrap_or_else(Utc::now);
        for kind in ProcessorKind::ALL {
            if let Err(e) = self
                .mirror
                .upsert_status(kind, &snapshot.status(kind), checked_at)
                .await
            {
                warn!(processor = %kind, error = %e, "health mirror write failed");
            }
        }
    }
}
