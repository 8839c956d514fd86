// Rolling chart history for one machine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Labels plus one sum and one avg series per tracked scrap index.
/// All series share the label cadence: `labels.len() == series.len()` for every index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineHistory {
    pub labels: Vec<String>,
    pub sum: BTreeMap<u32, Vec<f64>>,
    pub avg: BTreeMap<u32, Vec<f64>>,
}

impl MachineHistory {
    /// Empty history with an empty series for each index.
    pub fn seeded(indices: &[u32]) -> Self {
        let mut history = Self::default();
        for &idx in indices {
            history.sum.insert(idx, Vec::new());
            history.avg.insert(idx, Vec::new());
        }
        history
    }

    /// Number of ticks currently held.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn tracked_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.sum.keys().copied()
    }

    pub fn sum_series(&self, index: u32) -> Option<&[f64]> {
        self.sum.get(&index).map(Vec::as_slice)
    }

    pub fn avg_series(&self, index: u32) -> Option<&[f64]> {
        self.avg.get(&index).map(Vec::as_slice)
    }

    /// True when every series has exactly as many points as there are labels.
    pub fn is_aligned(&self) -> bool {
        let n = self.labels.len();
        self.sum.len() == self.avg.len()
            && self.sum.values().all(|s| s.len() == n)
            && self.avg.values().all(|s| s.len() == n)
    }
}
