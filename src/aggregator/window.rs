// Trailing time window for one aggregation key

use std::collections::VecDeque;

use crate::models::RawSample;

/// Sum and count over the surviving samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub sum: f64,
    pub count: usize,
}

impl WindowStats {
    /// Mean rounded to 2 decimals; 0 for an empty window.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        round2(self.sum / self.count as f64)
    }
}

/// Samples kept in arrival order. Appends at the tail; eviction filters against the cutoff
/// of the sample just pushed, so in-order input only ever loses a prefix.
#[derive(Debug, Clone, Default)]
pub struct WindowState {
    samples: VecDeque<RawSample>,
    latest_ms: Option<i64>,
    last_seen_ms: Option<i64>,
}

impl WindowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `sample`, drop everything at or before `sample - window_ms`, return the stats.
    pub fn push(&mut self, sample: RawSample, window_ms: i64) -> WindowStats {
        self.samples.push_back(sample);
        self.latest_ms = Some(
            self.latest_ms
                .map_or(sample.occurred_at_ms, |t| t.max(sample.occurred_at_ms)),
        );
        let cutoff = sample.occurred_at_ms - window_ms;
        while self
            .samples
            .front()
            .is_some_and(|s| s.occurred_at_ms <= cutoff)
        {
            self.samples.pop_front();
        }
        // Out-of-order arrivals can leave stale samples behind the head.
        self.samples.retain(|s| s.occurred_at_ms > cutoff);
        self.stats()
    }

    pub fn stats(&self) -> WindowStats {
        WindowStats {
            sum: self.samples.iter().map(|s| s.value).sum(),
            count: self.samples.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Newest sample time ever pushed. Event time, so it says nothing about idleness.
    pub fn latest_ms(&self) -> Option<i64> {
        self.latest_ms
    }

    /// Record that the key received a sample at server time `seen_ms`.
    pub fn touch(&mut self, seen_ms: i64) {
        self.last_seen_ms = Some(seen_ms);
    }

    /// Server time of the last ingest for this key (idle-key eviction).
    pub fn last_seen_ms(&self) -> Option<i64> {
        self.last_seen_ms
    }

    pub fn samples(&self) -> impl Iterator<Item = &RawSample> {
        self.samples.iter()
    }
}

/// Round half away from zero to 2 decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(value: f64, at: i64) -> RawSample {
        RawSample {
            value,
            occurred_at_ms: at,
        }
    }

    #[test]
    fn round2_half_away_from_zero() {
        assert_eq!(round2(2.5), 2.5);
        assert_eq!(round2(1.005_000_1), 1.01);
        assert_eq!(round2(3.333_333), 3.33);
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(0.125), 0.13);
    }

    #[test]
    fn empty_window_avg_is_zero() {
        let stats = WindowState::new().stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.avg(), 0.0);
    }

    #[test]
    fn sample_exactly_at_cutoff_is_evicted() {
        let mut w = WindowState::new();
        w.push(s(1.0, 0), 60_000);
        w.push(s(2.0, 59_999), 60_000);
        let stats = w.push(s(4.0, 60_000), 60_000);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.sum, 6.0);
    }

    #[test]
    fn out_of_order_sample_is_kept_without_resorting() {
        let mut w = WindowState::new();
        w.push(s(1.0, 100_000), 60_000);
        let stats = w.push(s(2.0, 90_000), 60_000);
        assert_eq!(stats.count, 2);
        let order: Vec<i64> = w.samples().map(|s| s.occurred_at_ms).collect();
        assert_eq!(order, vec![100_000, 90_000]);
        assert_eq!(w.latest_ms(), Some(100_000));

        // Stale sample behind the head is still filtered out by a later cutoff.
        let stats = w.push(s(3.0, 155_000), 60_000);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.sum, 4.0);
    }

    #[test]
    fn touch_tracks_server_time_not_event_time() {
        let mut w = WindowState::new();
        assert_eq!(w.last_seen_ms(), None);
        w.push(s(1.0, 1_000), 60_000);
        w.touch(9_000_000);
        assert_eq!(w.latest_ms(), Some(1_000));
        assert_eq!(w.last_seen_ms(), Some(9_000_000));
    }
}
