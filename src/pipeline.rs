// Ingest path shared by HTTP, WebSocket and the simulator:
// aggregate, then fan the result out on the broadcast channel without waiting for anyone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::aggregator::{Aggregator, Ingested, PersistOutcome};
use crate::error::IngestError;
use crate::log_throttle::LogThrottle;
use crate::models::{AggregatedResult, ScrapEvent};

/// Rate limit for "no receivers" log (avoid logging every event when nobody is subscribed).
const NO_RECEIVERS_WARN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub ingested_total: AtomicU64,
    pub rejected_total: AtomicU64,
    pub persist_failed_total: AtomicU64,
}

impl PipelineStats {
    pub fn ingested(&self) -> u64 {
        self.ingested_total.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }

    pub fn persist_failed(&self) -> u64 {
        self.persist_failed_total.load(Ordering::Relaxed)
    }
}

pub struct Pipeline {
    aggregator: Arc<Aggregator>,
    tx: broadcast::Sender<AggregatedResult>,
    stats: Arc<PipelineStats>,
    no_receivers_log: LogThrottle,
}

impl Pipeline {
    pub fn new(aggregator: Arc<Aggregator>, tx: broadcast::Sender<AggregatedResult>) -> Self {
        Self {
            aggregator,
            tx,
            stats: Arc::new(PipelineStats::default()),
            no_receivers_log: LogThrottle::new(NO_RECEIVERS_WARN_INTERVAL),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AggregatedResult> {
        self.tx.subscribe()
    }

    /// Aggregate one event and publish the result. Validation errors go back to the caller;
    /// delivery problems never do.
    pub fn process(&self, event: &ScrapEvent) -> Result<Ingested, IngestError> {
        let ingested = match self.aggregator.ingest_event(event) {
            Ok(i) => i,
            Err(e) => {
                self.stats.rejected_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    machine_id = %event.machine_id,
                    operation = "ingest",
                    "Sample rejected"
                );
                return Err(e);
            }
        };
        self.stats.ingested_total.fetch_add(1, Ordering::Relaxed);
        if matches!(ingested.persistence, PersistOutcome::Failed(_)) {
            self.stats
                .persist_failed_total
                .fetch_add(1, Ordering::Relaxed);
        }

        if self.tx.send(ingested.result.clone()).is_err()
            && let Some(suppressed) = self.no_receivers_log.check()
        {
            tracing::debug!(
                operation = "broadcast_aggregate",
                suppressed,
                "No subscribers; broadcast channel has no receivers"
            );
        }
        Ok(ingested)
    }
}
