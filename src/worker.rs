// Background tasks: the record writer (batches raw samples into SQLite) and the housekeeping
// worker (app stats, retention pruning, idle window eviction).
// The aggregator hands records to the writer through a bounded channel and never waits on it.

use crate::aggregator::{Aggregator, RecordSink};
use crate::error::PersistError;
use crate::models::ScrapRecord;
use crate::pipeline::PipelineStats;
use crate::scrap_repo::ScrapRepo;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use tracing::Instrument;

/// Channel capacity for the record writer (samples are dropped, not awaited, when full).
pub fn writer_channel_capacity(flush_rate: u64) -> usize {
    (flush_rate as usize * 4).max(256)
}

/// Non-blocking `RecordSink` over the writer channel.
#[derive(Clone)]
pub struct ChannelRecordSink(pub mpsc::Sender<ScrapRecord>);

impl RecordSink for ChannelRecordSink {
    fn submit(&self, record: ScrapRecord) -> Result<(), PersistError> {
        self.0.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PersistError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => PersistError::ChannelClosed,
        })
    }
}

/// Writer config: batching for the dedicated record writer task.
pub struct RecordWriterConfig {
    pub flush_rate: u64,
    pub flush_interval_secs: u64,
}

/// Spawns the task that receives records and flushes them to the DB.
/// Flushes when buffer len >= flush_rate, or every flush_interval_secs, or when channel closes.
/// On shutdown (or when every sender is dropped) it drains what is queued, flushes and exits.
pub fn spawn_record_writer(
    mut write_rx: mpsc::Receiver<ScrapRecord>,
    repo: Arc<ScrapRepo>,
    config: RecordWriterConfig,
    records_saved_total: Arc<AtomicU64>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let flush_interval = Duration::from_secs(config.flush_interval_secs);
    tokio::spawn(async move {
        let mut buffer: Vec<ScrapRecord> = Vec::new();
        let mut flush_tick = interval(flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = write_rx.recv() => {
                    match result {
                        Some(record) => {
                            buffer.push(record);
                            if buffer.len() >= config.flush_rate as usize
                                && let Err(e) = flush_buffer(&repo, &mut buffer, &records_saved_total).await
                            {
                                tracing::warn!(error = %e, "record writer: save_records failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    if let Err(e) = flush_buffer(&repo, &mut buffer, &records_saved_total).await {
                        tracing::warn!(error = %e, "record writer: save_records failed");
                    }
                }
                _ = &mut shutdown_rx => {
                    write_rx.close();
                    while let Ok(record) = write_rx.try_recv() {
                        buffer.push(record);
                    }
                    break;
                }
            }
        }
        if let Err(e) = flush_buffer(&repo, &mut buffer, &records_saved_total).await {
            tracing::warn!(error = %e, "record writer: final flush failed");
        }
        tracing::debug!("Record writer shutting down");
    })
}

// A failed batch is dropped, not retried; the in-memory aggregates are unaffected.
async fn flush_buffer(
    repo: &ScrapRepo,
    buffer: &mut Vec<ScrapRecord>,
    records_saved_total: &AtomicU64,
) -> anyhow::Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    let n = buffer.len();
    let result = repo.save_records(buffer).await;
    buffer.clear();
    result?;
    records_saved_total.fetch_add(n as u64, Ordering::Relaxed);
    tracing::debug!(
        operation = "save_records",
        records_count = n,
        "Records saved"
    );
    Ok(())
}

/// Handles and counters the housekeeping worker reports on or acts upon.
pub struct WorkerDeps {
    pub aggregator: Arc<Aggregator>,
    pub repo: Arc<ScrapRepo>,
    pub pipeline_stats: Arc<PipelineStats>,
    pub records_saved_total: Arc<AtomicU64>,
    pub ws_clients: Arc<AtomicUsize>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// Housekeeping timing. All intervals are real time.
pub struct WorkerConfig {
    pub stats_log_interval_secs: u64,
    pub prune_interval_secs: u64,
    /// Window keys silent this long are dropped. None keeps them for the process lifetime.
    pub idle_key_ttl_secs: Option<u64>,
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        aggregator,
        repo,
        pipeline_stats,
        records_saved_total,
        ws_clients,
        mut shutdown_rx,
    } = deps;
    let WorkerConfig {
        stats_log_interval_secs,
        prune_interval_secs,
        idle_key_ttl_secs,
    } = config;

    let worker_span = tracing::span!(tracing::Level::DEBUG, "worker", stats_log_interval_secs);
    tokio::spawn(async move {
        let mut stats_log_tick = interval(Duration::from_secs(stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut prune_tick = interval(Duration::from_secs(prune_interval_secs));
        prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Checking a few times per TTL is plenty; an hour apart when eviction is off.
        let evict_every = idle_key_ttl_secs.map_or(3600, |ttl| (ttl / 4).max(1));
        let mut evict_tick = interval(Duration::from_secs(evict_every));
        evict_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut records_pruned_total: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::debug!("Worker shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        ws_clients = ws_clients.load(Ordering::Relaxed),
                        window_keys = aggregator.key_count(),
                        ingested_total = pipeline_stats.ingested(),
                        rejected_total = pipeline_stats.rejected(),
                        persist_failed_total = pipeline_stats.persist_failed(),
                        records_saved_total = records_saved_total.load(Ordering::Relaxed),
                        records_pruned_total = records_pruned_total,
                        "app stats"
                    );
                }
                _ = prune_tick.tick() => {
                    match repo.prune_old_data().await {
                        Ok(n) => {
                            tracing::debug!(operation = "prune_old_data", rows = n, "Old records pruned");
                            records_pruned_total += n;
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                operation = "prune_old_data",
                                "Failed to prune old records"
                            );
                        }
                    }
                }
                _ = evict_tick.tick() => {
                    if let Some(ttl) = idle_key_ttl_secs {
                        let removed = aggregator.evict_idle((ttl * 1000) as i64);
                        if removed > 0 {
                            tracing::debug!(operation = "evict_idle", keys = removed, "Idle window keys evicted");
                        }
                    }
                }
            }
        }
    }.instrument(worker_span))
}
