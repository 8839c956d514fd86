// Rolling chart history: one point per tick per tracked index, capped at `max_points`.
// Silent indices carry their previous value forward so charts stay continuous.
//
// Ticks are serialized by `tick_lock`. Each machine's history is an Arc that the tick
// replaces wholesale (copy-on-write), so a reader sees either the pre- or post-tick state.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::clock::tick_label;
use crate::models::{AggregatedResult, MachineHistory};

pub const DEFAULT_MAX_POINTS: usize = 60;
pub const DEFAULT_TRACKED_INDICES: [u32; 3] = [1, 2, 3];

/// Fresh (sum, avg) per scrap index for one machine on one tick.
pub type TickValues = BTreeMap<u32, (f64, f64)>;

pub struct RollingHistoryCache {
    machines: RwLock<HashMap<String, Arc<MachineHistory>>>,
    tick_lock: Mutex<()>,
    tracked_indices: Vec<u32>,
    max_points: usize,
}

impl Default for RollingHistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_INDICES.to_vec(), DEFAULT_MAX_POINTS)
    }
}

impl RollingHistoryCache {
    pub fn new(tracked_indices: Vec<u32>, max_points: usize) -> Self {
        Self {
            machines: RwLock::new(HashMap::new()),
            tick_lock: Mutex::new(()),
            tracked_indices,
            max_points: max_points.max(1),
        }
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Advance every known machine by one point. Machines referenced by `snapshot` are
    /// created on first sight. Returns the number of machines ticked.
    pub fn tick(&self, snapshot: &[AggregatedResult], now: DateTime<Utc>) -> usize {
        let label = tick_label(now);
        let fresh = group_tick_values(snapshot);

        let _guard = self.tick_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut machines = self
            .machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for machine_id in fresh.keys() {
            if !machines.contains_key(*machine_id) {
                tracing::debug!(machine_id = %machine_id, "history: new machine");
                machines.insert(
                    machine_id.to_string(),
                    Arc::new(MachineHistory::seeded(&self.tracked_indices)),
                );
            }
        }

        for (machine_id, history) in machines.iter_mut() {
            append_tick(
                Arc::make_mut(history),
                &label,
                fresh.get(machine_id.as_str()),
                self.max_points,
            );
        }

        let ticked = machines.len();
        *self.machines.write().unwrap_or_else(PoisonError::into_inner) = machines;
        ticked
    }

    /// None for a machine never seen by `tick` (first-tick case for callers).
    pub fn get_history(&self, machine_id: &str) -> Option<Arc<MachineHistory>> {
        self.machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(machine_id)
            .cloned()
    }

    /// Known machine ids, sorted.
    pub fn machines(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Keep only machines for which `keep` returns true. Returns removed count.
    pub fn retain_machines(&self, keep: impl Fn(&str) -> bool) -> usize {
        let _guard = self.tick_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut machines = self.machines.write().unwrap_or_else(PoisonError::into_inner);
        let before = machines.len();
        machines.retain(|id, _| keep(id));
        before - machines.len()
    }
}

/// Latest (sum, avg) per machine and index; later entries in `snapshot` win.
fn group_tick_values(snapshot: &[AggregatedResult]) -> BTreeMap<&str, TickValues> {
    let mut out: BTreeMap<&str, TickValues> = BTreeMap::new();
    for r in snapshot {
        out.entry(r.machine_id.as_str())
            .or_default()
            .insert(r.scrap_index, (r.sum, r.avg));
    }
    out
}

/// One tick for one machine: shared label, fresh or carried-forward value per index, then
/// lock-step trim to `max_points`. An index seen for the first time is zero-filled back to
/// the current label count so every series stays aligned with `labels`.
pub fn append_tick(
    history: &mut MachineHistory,
    label: &str,
    fresh: Option<&TickValues>,
    max_points: usize,
) {
    if let Some(values) = fresh {
        let width = history.labels.len();
        for idx in values.keys() {
            history.sum.entry(*idx).or_insert_with(|| vec![0.0; width]);
            history.avg.entry(*idx).or_insert_with(|| vec![0.0; width]);
        }
    }

    history.labels.push(label.to_string());
    for (idx, series) in history.sum.iter_mut() {
        let value = fresh
            .and_then(|v| v.get(idx))
            .map(|(sum, _)| *sum)
            .unwrap_or_else(|| series.last().copied().unwrap_or(0.0));
        series.push(value);
    }
    for (idx, series) in history.avg.iter_mut() {
        let value = fresh
            .and_then(|v| v.get(idx))
            .map(|(_, avg)| *avg)
            .unwrap_or_else(|| series.last().copied().unwrap_or(0.0));
        series.push(value);
    }

    let excess = history.labels.len().saturating_sub(max_points);
    if excess > 0 {
        history.labels.drain(..excess);
        for series in history.sum.values_mut().chain(history.avg.values_mut()) {
            series.drain(..excess);
        }
    }
}
