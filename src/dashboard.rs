// Process-wide viewer state: latest aggregate per key plus the rolling chart history.
// A feed task folds the broadcast stream in; a ticker task advances the history once per
// tick interval, independent of how fast samples arrive.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::time::{Duration, interval};

use crate::clock::Clock;
use crate::history_cache::RollingHistoryCache;
use crate::models::{AggregatedResult, AggregationKey, MachineGroup, MachineHistory, Selection};
use crate::view::{LatestTable, available_indices, available_machines, project};

/// Everything the feed writes and the ticker drains, behind one lock.
#[derive(Debug, Default)]
struct LiveState {
    table: LatestTable,
    /// Latest aggregate per key received since the previous tick.
    pending: BTreeMap<AggregationKey, AggregatedResult>,
    /// Server time each key last received an aggregate.
    last_seen_ms: HashMap<AggregationKey, i64>,
}

pub struct Dashboard {
    live: Mutex<LiveState>,
    history: RollingHistoryCache,
    clock: Arc<dyn Clock>,
}

impl Dashboard {
    pub fn new(history: RollingHistoryCache, clock: Arc<dyn Clock>) -> Self {
        Self {
            live: Mutex::new(LiveState::default()),
            history,
            clock,
        }
    }

    fn live(&self) -> std::sync::MutexGuard<'_, LiveState> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, result: AggregatedResult) {
        let now_ms = self.clock.now_ms();
        let key = result.key();
        let mut live = self.live();
        live.last_seen_ms.insert(key.clone(), now_ms);
        live.pending.insert(key, result.clone());
        live.table.upsert(result);
    }

    /// Latest aggregate per key, first-arrival order.
    pub fn latest(&self) -> Vec<AggregatedResult> {
        self.live().table.entries().to_vec()
    }

    pub fn groups(&self, selection: &Selection) -> Vec<MachineGroup> {
        project(self.live().table.entries(), selection)
    }

    /// Values offered by the filter bar.
    pub fn filters(&self) -> (Vec<String>, Vec<u32>) {
        let live = self.live();
        (
            available_machines(live.table.entries()),
            available_indices(live.table.entries()),
        )
    }

    pub fn history(&self, machine_id: &str) -> Option<Arc<MachineHistory>> {
        self.history.get_history(machine_id)
    }

    /// One history step using everything received since the previous tick.
    pub fn tick(&self) -> usize {
        let pending: Vec<AggregatedResult> =
            std::mem::take(&mut self.live().pending).into_values().collect();
        self.history.tick(&pending, self.clock.now())
    }

    /// Forget keys that received nothing for `idle_ms` of server time, and machines left with
    /// no keys at all. Returns (entries removed, machines removed).
    pub fn evict_idle(&self, idle_ms: i64) -> (usize, usize) {
        let now_ms = self.clock.now_ms();
        let mut live = self.live();
        let LiveState {
            table,
            pending,
            last_seen_ms,
        } = &mut *live;
        last_seen_ms.retain(|_, t| now_ms - *t < idle_ms);
        let entries_removed = table.retain(|e| last_seen_ms.contains_key(&e.key()));
        pending.retain(|key, _| last_seen_ms.contains_key(key));
        let machines: Vec<String> = available_machines(table.entries());
        drop(live);
        let machines_removed = self
            .history
            .retain_machines(|id| machines.iter().any(|m| m == id));
        (entries_removed, machines_removed)
    }
}

/// Folds the aggregate stream into the dashboard until the channel closes.
pub fn spawn_feed(
    dashboard: Arc<Dashboard>,
    mut rx: broadcast::Receiver<AggregatedResult>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(result) => dashboard.record(result),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "dashboard feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Dashboard feed shutting down");
    })
}

pub struct TickerConfig {
    pub tick_interval_ms: u64,
    /// Evict idle keys on every tick when set.
    pub idle_key_ttl_ms: Option<i64>,
}

/// Ticks the history on a fixed cadence. Runs until aborted.
pub fn spawn_ticker(dashboard: Arc<Dashboard>, config: TickerConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_millis(config.tick_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let machines = dashboard.tick();
            tracing::trace!(machines, "history tick");
            if let Some(idle_ms) = config.idle_key_ttl_ms {
                let (entries, machines) = dashboard.evict_idle(idle_ms);
                if entries > 0 || machines > 0 {
                    tracing::debug!(entries, machines, "evicted idle dashboard state");
                }
            }
        }
    })
}
