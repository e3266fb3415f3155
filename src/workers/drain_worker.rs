//! Background drain worker
//!
//! Continuously pulls claimed work through the dispatch engine. While the
//! queues produce items the loop runs back-to-back; when a tick comes back
//! empty it idles briefly. A slow timer sweeps the in-flight list for
//! items orphaned by a crashed replica.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

use crate::config::WorkerConfig;
use crate::services::dispatch::DispatchEngine;

pub struct DrainWorker {
    engine: Arc<DispatchEngine>,
    idle_delay: Duration,
    reclaim_interval: Duration,
}

impl DrainWorker {
    pub fn new(engine: Arc<DispatchEngine>, config: &WorkerConfig) -> Self {
        Self {
            engine,
            idle_delay: config.idle_delay(),
            reclaim_interval: Duration::from_secs(config.reclaim_interval_secs),
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            idle_delay_ms = self.idle_delay.as_millis() as u64,
            reclaim_interval_secs = self.reclaim_interval.as_secs(),
            "drain worker started"
        );

        let mut next_reclaim = Instant::now() + self.reclaim_interval;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let taken = self.engine.drain_tick().await;

            if Instant::now() >= next_reclaim {
                self.engine.reclaim_stale().await;
                next_reclaim = Instant::now() + self.reclaim_interval;
            }

            if taken > 0 {
                // More work is likely waiting; loop immediately.
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.idle_delay) => {}
            }
        }

        // Drain one final cycle so in-flight claims settle before the
        // process exits.
        self.engine.drain_tick().await;
        info!("drain worker stopped");
    }
}
