// Windowed aggregator: one trailing 60s window per (machine, scrap index).
// Each key lives in its own DashMap entry, so ingest for one key is linearized while
// different keys run in parallel.

mod window;

pub use window::{WindowState, WindowStats, round2};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{IngestError, PersistError};
use crate::log_throttle::LogThrottle;
use crate::models::{
    AggregatedResult, AggregationKey, RawSample, ScrapEvent, ScrapRecord, parse_timestamp_ms,
};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

const PERSIST_FAILED_WARN_INTERVAL: Duration = Duration::from_secs(10);

/// Persistence collaborator. `submit` must not block; failures are reported, not retried.
pub trait RecordSink: Send + Sync {
    fn submit(&self, record: ScrapRecord) -> Result<(), PersistError>;
}

/// Secondary outcome of `ingest`: what happened to the raw sample on its way to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Queued,
    Disabled,
    Failed(PersistError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub result: AggregatedResult,
    pub persistence: PersistOutcome,
}

pub struct Aggregator {
    windows: DashMap<AggregationKey, WindowState>,
    window_ms: i64,
    sink: Option<Arc<dyn RecordSink>>,
    /// Server time, used only to stamp key activity. Windows follow sample time.
    clock: Arc<dyn Clock>,
    persist_failed_log: LogThrottle,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl Aggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window_ms: window.as_millis() as i64,
            sink: None,
            clock: Arc::new(SystemClock),
            persist_failed_log: LogThrottle::new(PERSIST_FAILED_WARN_INTERVAL),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn ingest_event(&self, event: &ScrapEvent) -> Result<Ingested, IngestError> {
        self.ingest(
            &event.machine_id,
            event.scrap_index,
            event.value,
            &event.timestamp,
        )
    }

    /// Add one sample and return the aggregate over `(occurred_at - window, occurred_at]`.
    /// Invalid input is rejected before any state is touched or anything is persisted.
    pub fn ingest(
        &self,
        machine_id: &str,
        metric_index: i64,
        value: f64,
        occurred_at: &str,
    ) -> Result<Ingested, IngestError> {
        if machine_id.is_empty() {
            return Err(IngestError::InvalidSample("machineId must be non-empty".into()));
        }
        let metric_index = u32::try_from(metric_index)
            .ok()
            .filter(|&i| i >= 1)
            .ok_or_else(|| {
                IngestError::InvalidSample(format!("scrapIndex must be >= 1, got {}", metric_index))
            })?;
        if !value.is_finite() || value < 0.0 {
            return Err(IngestError::InvalidSample(format!(
                "value must be a finite number >= 0, got {}",
                value
            )));
        }
        let occurred_at_ms = parse_timestamp_ms(occurred_at)
            .map_err(|e| IngestError::InvalidSample(e.to_string()))?;

        let persistence = self.persist(ScrapRecord {
            machine_id: machine_id.to_string(),
            scrap_index: metric_index,
            value,
            timestamp_ms: occurred_at_ms,
        });

        let key = AggregationKey::new(machine_id, metric_index);
        let seen_ms = self.clock.now_ms();
        let stats = {
            let mut window = self.windows.entry(key).or_insert_with(WindowState::new);
            window.touch(seen_ms);
            window.push(
                RawSample {
                    value,
                    occurred_at_ms,
                },
                self.window_ms,
            )
        };

        Ok(Ingested {
            result: AggregatedResult {
                machine_id: machine_id.to_string(),
                scrap_index: metric_index,
                sum: stats.sum,
                avg: stats.avg(),
                timestamp: occurred_at.to_string(),
            },
            persistence,
        })
    }

    fn persist(&self, record: ScrapRecord) -> PersistOutcome {
        let Some(sink) = &self.sink else {
            return PersistOutcome::Disabled;
        };
        match sink.submit(record) {
            Ok(()) => PersistOutcome::Queued,
            Err(e) => {
                if let Some(suppressed) = self.persist_failed_log.check() {
                    tracing::warn!(
                        error = %e,
                        operation = "persist_sample",
                        suppressed,
                        "Failed to hand sample to record writer; aggregating anyway"
                    );
                }
                PersistOutcome::Failed(e)
            }
        }
    }

    /// Number of keys with window state.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    /// Samples currently held for `key`; None if the key was never seen.
    pub fn window_len(&self, key: &AggregationKey) -> Option<usize> {
        self.windows.get(key).map(|w| w.len())
    }

    /// Current stats for `key` without ingesting.
    pub fn stats(&self, key: &AggregationKey) -> Option<WindowStats> {
        self.windows.get(key).map(|w| w.stats())
    }

    /// Newest sample time seen for `key` (event time).
    pub fn latest_sample_ms(&self, key: &AggregationKey) -> Option<i64> {
        self.windows.get(key).and_then(|w| w.latest_ms())
    }

    /// Drop keys that have not ingested anything for `idle_ms` of server time, however old
    /// or new their sample timestamps are. Returns removed count.
    pub fn evict_idle(&self, idle_ms: i64) -> usize {
        let now_ms = self.clock.now_ms();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| w.last_seen_ms().is_some_and(|t| now_ms - t < idle_ms));
        before.saturating_sub(self.windows.len())
    }
}
