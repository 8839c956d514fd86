// Dashboard selection and derived per-machine groups

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::AggregatedResult;

/// Machine-set / index-set filter. An empty set matches everything on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default)]
    pub machines: BTreeSet<String>,
    #[serde(default)]
    pub indices: BTreeSet<u32>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(
        machines: impl IntoIterator<Item = impl Into<String>>,
        indices: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            machines: machines.into_iter().map(Into::into).collect(),
            indices: indices.into_iter().collect(),
        }
    }

    pub fn matches(&self, entry: &AggregatedResult) -> bool {
        let machine_ok = self.machines.is_empty() || self.machines.contains(&entry.machine_id);
        let index_ok = self.indices.is_empty() || self.indices.contains(&entry.scrap_index);
        machine_ok && index_ok
    }

    /// Checkbox semantics: add when checked, remove when unchecked.
    pub fn toggle_machine(&mut self, machine_id: &str, checked: bool) {
        if checked {
            self.machines.insert(machine_id.to_string());
        } else {
            self.machines.remove(machine_id);
        }
    }

    /// Single-select index dropdown. `None` selects all indices.
    pub fn select_index(&mut self, index: Option<u32>) {
        self.indices.clear();
        if let Some(idx) = index {
            self.indices.insert(idx);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineGroup {
    pub machine_id: String,
    pub total_sum: f64,
    pub last_update: String,
    pub entries: Vec<AggregatedResult>,
}
