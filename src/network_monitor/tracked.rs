// Tracked identifiers and per-identifier counter history. Pure; the monitor wraps
// it in a mutex and feeds it snapshots.

use crate::models::{RawCounterSample, SpeedEvent};
use std::collections::{HashMap, HashSet};

/// Samples further apart than this yield no rate.
pub const MAX_SAMPLE_GAP_MS: i64 = 5000;

/// Bytes added to a cumulative counter between two reads, modulo 2^64.
/// `prev = u64::MAX - 5, cur = 10` gives 16.
pub fn counter_delta(prev: u64, cur: u64) -> u64 {
    cur.wrapping_sub(prev)
}

/// `diff * 8 * 1000 / dt_ms`, truncating, saturated to `i64::MAX`. 0 when `dt_ms <= 0`.
pub fn bits_per_second(diff: u64, dt_ms: i64) -> i64 {
    if dt_ms <= 0 {
        return 0;
    }
    let bps = diff as u128 * 8 * 1000 / dt_ms as u128;
    i64::try_from(bps).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_update_ms: i64,
    pub initialized: bool,
}

impl PreviousStats {
    fn fresh(now_ms: i64) -> Self {
        Self {
            rx_bytes: 0,
            tx_bytes: 0,
            last_update_ms: now_ms,
            initialized: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct TrackedSet {
    tracked: HashSet<String>,
    previous: HashMap<String, PreviousStats>,
}

impl TrackedSet {
    /// Replaces the whole set; every identifier starts over uninitialized.
    pub fn replace(&mut self, identifiers: impl IntoIterator<Item = String>, now_ms: i64) {
        self.tracked = identifiers.into_iter().collect();
        self.previous = self
            .tracked
            .iter()
            .map(|id| (id.clone(), PreviousStats::fresh(now_ms)))
            .collect();
    }

    /// Adds new identifiers (uninitialized) and drops missing ones with their history.
    /// Identifiers present in both keep their history. Returns (added, removed) counts.
    pub fn update(
        &mut self,
        identifiers: impl IntoIterator<Item = String>,
        now_ms: i64,
    ) -> (usize, usize) {
        let next: HashSet<String> = identifiers.into_iter().collect();
        let before = self.tracked.len();
        self.tracked.retain(|id| next.contains(id));
        self.previous.retain(|id, _| next.contains(id));
        let removed = before - self.tracked.len();
        let mut added = 0;
        for id in next {
            if self.tracked.insert(id.clone()) {
                self.previous.insert(id, PreviousStats::fresh(now_ms));
                added += 1;
            }
        }
        (added, removed)
    }

    pub fn is_tracked(&self, identifier: &str) -> bool {
        self.tracked.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &String> {
        self.tracked.iter()
    }

    pub fn previous(&self, identifier: &str) -> Option<&PreviousStats> {
        self.previous.get(identifier)
    }

    /// Applies one tick's samples (keyed by identifier). Untracked identifiers and
    /// tracked ones without a sample are ignored.
    pub fn apply_snapshot(
        &mut self,
        samples: &HashMap<String, RawCounterSample>,
        now_ms: i64,
    ) -> Vec<SpeedEvent> {
        let mut events = Vec::new();
        for id in &self.tracked {
            let Some(sample) = samples.get(id) else {
                continue;
            };
            if let Some(event) = Self::apply_one(&mut self.previous, id, *sample, now_ms) {
                events.push(event);
            }
        }
        events
    }

    fn apply_one(
        previous: &mut HashMap<String, PreviousStats>,
        id: &str,
        sample: RawCounterSample,
        now_ms: i64,
    ) -> Option<SpeedEvent> {
        let Some(prev) = previous.get_mut(id) else {
            previous.insert(
                id.to_string(),
                PreviousStats {
                    rx_bytes: sample.rx_bytes,
                    tx_bytes: sample.tx_bytes,
                    last_update_ms: now_ms,
                    initialized: false,
                },
            );
            return None;
        };

        let dt = now_ms - prev.last_update_ms;
        let (prev_rx, prev_tx) = (prev.rx_bytes, prev.tx_bytes);
        prev.rx_bytes = sample.rx_bytes;
        prev.tx_bytes = sample.tx_bytes;
        prev.last_update_ms = now_ms;

        if dt <= 0 || dt > MAX_SAMPLE_GAP_MS {
            return None;
        }
        if !prev.initialized {
            prev.initialized = true;
            return None;
        }

        Some(SpeedEvent {
            identifier: id.to_string(),
            rx_bps: bits_per_second(counter_delta(prev_rx, sample.rx_bytes), dt),
            tx_bps: bits_per_second(counter_delta(prev_tx, sample.tx_bytes), dt),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: &str, rx: u64, tx: u64) -> HashMap<String, RawCounterSample> {
        HashMap::from([(id.to_string(), RawCounterSample::new(rx, tx))])
    }

    #[test]
    fn wraparound_delta() {
        assert_eq!(counter_delta(u64::MAX - 5, 10), 16);
        assert_eq!(counter_delta(100, 250), 150);
        assert_eq!(counter_delta(7, 7), 0);
    }

    #[test]
    fn bps_is_truncating_integer_math() {
        assert_eq!(bits_per_second(125_000, 1000), 1_000_000);
        assert_eq!(bits_per_second(1, 3), 2666);
        assert_eq!(bits_per_second(10, 5000), 16);
        assert_eq!(bits_per_second(10, 0), 0);
        assert_eq!(bits_per_second(10, -5), 0);
        assert_eq!(bits_per_second(u64::MAX, 1), i64::MAX);
    }

    #[test]
    fn bps_matches_formula_over_valid_range() {
        for dt in [1i64, 7, 250, 999, 1000, 4999, 5000] {
            for diff in [0u64, 1, 1500, 125_000, 10_000_000_000] {
                assert_eq!(
                    bits_per_second(diff, dt),
                    (diff as i128 * 8000 / dt as i128) as i64
                );
            }
        }
    }

    #[test]
    fn first_valid_tick_initializes_second_emits() {
        let mut set = TrackedSet::default();
        set.replace(["aabbccddeeff".to_string()], 0);

        assert!(set.apply_snapshot(&snap("aabbccddeeff", 1_000, 500), 1000).is_empty());
        assert!(set.previous("aabbccddeeff").unwrap().initialized);

        let events = set.apply_snapshot(&snap("aabbccddeeff", 126_000, 500), 2000);
        assert_eq!(
            events,
            vec![SpeedEvent {
                identifier: "aabbccddeeff".into(),
                rx_bps: 1_000_000,
                tx_bps: 0,
            }]
        );
    }

    #[test]
    fn invalid_interval_skips_emission_but_advances_counters() {
        let mut set = TrackedSet::default();
        set.replace(["m".to_string()], 0);
        set.apply_snapshot(&snap("m", 100, 100), 1000);

        // Gap too large.
        assert!(set.apply_snapshot(&snap("m", 200, 200), 7000).is_empty());
        let prev = *set.previous("m").unwrap();
        assert_eq!((prev.rx_bytes, prev.last_update_ms), (200, 7000));

        // Clock went backwards.
        assert!(set.apply_snapshot(&snap("m", 300, 300), 6000).is_empty());
        assert_eq!(set.previous("m").unwrap().rx_bytes, 300);

        // Same instant.
        assert!(set.apply_snapshot(&snap("m", 400, 400), 6000).is_empty());

        // Back to normal: rate from the last advanced counters.
        let events = set.apply_snapshot(&snap("m", 1400, 400), 7000);
        assert_eq!(events[0].rx_bps, 8000);
        assert_eq!(events[0].tx_bps, 0);
    }

    #[test]
    fn missing_history_is_seeded_without_emission() {
        let mut set = TrackedSet::default();
        set.replace(["m".to_string()], 0);
        set.previous.clear();
        assert!(set.apply_snapshot(&snap("m", 50, 60), 100).is_empty());
        let prev = *set.previous("m").unwrap();
        assert_eq!((prev.rx_bytes, prev.tx_bytes, prev.initialized), (50, 60, false));
    }

    #[test]
    fn untracked_samples_are_ignored() {
        let mut set = TrackedSet::default();
        set.replace(["a".to_string()], 0);
        assert!(set.apply_snapshot(&snap("b", 1, 1), 100).is_empty());
        assert!(set.previous("b").is_none());
    }

    #[test]
    fn update_keeps_history_for_survivors() {
        let mut set = TrackedSet::default();
        set.replace(["a".to_string(), "b".to_string()], 0);
        set.apply_snapshot(&snap("a", 10, 10), 1000);

        let (added, removed) = set.update(["a".to_string(), "c".to_string()], 1500);
        assert_eq!((added, removed), (1, 1));
        assert!(set.is_tracked("a") && set.is_tracked("c") && !set.is_tracked("b"));
        assert!(set.previous("b").is_none());
        assert!(set.previous("a").unwrap().initialized);
        let c = *set.previous("c").unwrap();
        assert_eq!((c.last_update_ms, c.initialized), (1500, false));
    }
}
