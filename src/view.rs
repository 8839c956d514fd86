// Filter/group view over the latest aggregate per key.
//
// `project` is pure. `LatestTable` folds the aggregate stream into one entry per key, and
// `DashboardView` holds the latest of (data, machine filter, index filter) and re-projects
// whenever any of them changes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{AggregatedResult, AggregationKey, MachineGroup, Selection};

/// Filter by selection, group by machine (arrival order kept), sort groups by machine id.
pub fn project(all_latest: &[AggregatedResult], selection: &Selection) -> Vec<MachineGroup> {
    let mut groups: BTreeMap<&str, MachineGroup> = BTreeMap::new();
    for entry in all_latest.iter().filter(|e| selection.matches(e)) {
        let group = groups
            .entry(entry.machine_id.as_str())
            .or_insert_with(|| MachineGroup {
                machine_id: entry.machine_id.clone(),
                total_sum: 0.0,
                last_update: entry.timestamp.clone(),
                entries: Vec::new(),
            });
        group.total_sum += entry.sum;
        if entry.timestamp > group.last_update {
            group.last_update = entry.timestamp.clone();
        }
        group.entries.push(entry.clone());
    }
    // BTreeMap<&str> iterates in byte order.
    groups.into_values().collect()
}

/// Distinct machine ids, sorted.
pub fn available_machines(all_latest: &[AggregatedResult]) -> Vec<String> {
    all_latest
        .iter()
        .map(|e| e.machine_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct scrap indices, ascending.
pub fn available_indices(all_latest: &[AggregatedResult]) -> Vec<u32> {
    all_latest
        .iter()
        .map(|e| e.scrap_index)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Latest aggregate per key, in first-arrival order.
#[derive(Debug, Default, Clone)]
pub struct LatestTable {
    entries: Vec<AggregatedResult>,
    positions: HashMap<AggregationKey, usize>,
}

impl LatestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for the same key in place, or append a new one.
    pub fn upsert(&mut self, result: AggregatedResult) {
        let key = result.key();
        match self.positions.get(&key) {
            Some(&pos) => self.entries[pos] = result,
            None => {
                self.positions.insert(key, self.entries.len());
                self.entries.push(result);
            }
        }
    }

    pub fn entries(&self) -> &[AggregatedResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries for which `keep` is false; order of the survivors is preserved.
    pub fn retain(&mut self, keep: impl Fn(&AggregatedResult) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| keep(e));
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key(), i))
            .collect();
        before - self.entries.len()
    }
}

/// Derived groups plus the inputs they came from. Every setter re-projects synchronously and
/// returns whether the groups changed, so a presenter can skip redundant redraws.
#[derive(Debug, Default, Clone)]
pub struct DashboardView {
    data: Vec<AggregatedResult>,
    selection: Selection,
    groups: Vec<MachineGroup>,
}

impl DashboardView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_data(&mut self, data: &[AggregatedResult]) -> bool {
        self.data = data.to_vec();
        self.recompute()
    }

    pub fn set_machines(&mut self, machines: impl IntoIterator<Item = String>) -> bool {
        self.selection.machines = machines.into_iter().collect();
        self.recompute()
    }

    pub fn set_indices(&mut self, indices: impl IntoIterator<Item = u32>) -> bool {
        self.selection.indices = indices.into_iter().collect();
        self.recompute()
    }

    pub fn toggle_machine(&mut self, machine_id: &str, checked: bool) -> bool {
        self.selection.toggle_machine(machine_id, checked);
        self.recompute()
    }

    pub fn select_index(&mut self, index: Option<u32>) -> bool {
        self.selection.select_index(index);
        self.recompute()
    }

    pub fn set_selection(&mut self, selection: Selection) -> bool {
        self.selection = selection;
        self.recompute()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn groups(&self) -> &[MachineGroup] {
        &self.groups
    }

    pub fn machines(&self) -> Vec<String> {
        available_machines(&self.data)
    }

    pub fn indices(&self) -> Vec<u32> {
        available_indices(&self.data)
    }

    fn recompute(&mut self) -> bool {
        let next = project(&self.data, &self.selection);
        if next == self.groups {
            return false;
        }
        self.groups = next;
        true
    }
}
