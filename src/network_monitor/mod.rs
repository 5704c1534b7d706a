// Telemetry sampler: reads cumulative counters on a timer, turns deltas into
// bits/sec for the tracked identifiers, and broadcasts one SpeedEvent per identifier.

mod tracked;

pub use tracked::{
    MAX_SAMPLE_GAP_MS, PreviousStats, TrackedSet, bits_per_second, counter_delta,
};

use crate::models::{RawCounterSample, SpeedEvent, normalize_identifier};
use crate::scheduler::{Priority, Scheduler};
use crate::stats_provider::RawStatsProvider;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace, warn};

/// Timer name, and the resource key that keeps ticks from overlapping.
pub const MONITOR_TASK: &str = "network_monitor";

/// Speed events buffered per subscriber before it lags.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    provider: Arc<dyn RawStatsProvider>,
    scheduler: Scheduler,
    tracked: Mutex<TrackedSet>,
    tx: broadcast::Sender<SpeedEvent>,
    running: AtomicBool,
    interval_ms: AtomicU64,
    epoch: Instant,
    events_emitted_total: AtomicU64,
}

/// Keys counters by identifier. When several interfaces share an identifier the one
/// whose name sorts first wins; interfaces without an identifier are skipped.
pub fn samples_by_identifier(
    counters: &HashMap<String, RawCounterSample>,
    identifiers: &HashMap<String, String>,
) -> HashMap<String, RawCounterSample> {
    let mut names: Vec<&String> = identifiers.keys().collect();
    names.sort();
    let mut out = HashMap::with_capacity(names.len());
    for name in names {
        if let Some(sample) = counters.get(name) {
            out.entry(identifiers[name].clone()).or_insert(*sample);
        }
    }
    out
}

impl NetworkMonitor {
    pub fn new(provider: Arc<dyn RawStatsProvider>, scheduler: Scheduler, interval_ms: u64) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                provider,
                scheduler,
                tracked: Mutex::new(TrackedSet::default()),
                tx,
                running: AtomicBool::new(false),
                interval_ms: AtomicU64::new(interval_ms),
                epoch: Instant::now(),
                events_emitted_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeedEvent> {
        self.inner.tx.subscribe()
    }

    /// Replaces the tracked set. Identifiers are normalized.
    pub fn initialize_stats<I, S>(&self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = identifiers
            .into_iter()
            .map(|s| normalize_identifier(s.as_ref()))
            .collect();
        let now = self.inner.now_ms();
        let mut tracked = self.inner.tracked();
        tracked.replace(ids, now);
        debug!(tracked = tracked.len(), "tracked identifiers initialized");
    }

    /// Diffs the tracked set against `identifiers`; survivors keep their counter history.
    pub fn update_tracked_macs<I, S>(&self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = identifiers
            .into_iter()
            .map(|s| normalize_identifier(s.as_ref()))
            .collect();
        let now = self.inner.now_ms();
        let (added, removed) = self.inner.tracked().update(ids, now);
        if added > 0 || removed > 0 {
            debug!(added, removed, "tracked identifiers updated");
        }
    }

    pub fn is_tracked(&self, identifier: &str) -> bool {
        self.inner
            .tracked()
            .is_tracked(&normalize_identifier(identifier))
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.tracked().len()
    }

    pub fn events_emitted_total(&self) -> u64 {
        self.inner.events_emitted_total.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn interval_ms(&self) -> u64 {
        self.inner.interval_ms.load(Ordering::Relaxed)
    }

    /// Starts periodic sampling. Returns false (and does nothing) if already running.
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.arm();
        info!(interval_ms = self.interval_ms(), "network monitoring started");
        true
    }

    /// Stops periodic sampling. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.inner.scheduler.cancel_repeating(MONITOR_TASK);
        info!("network monitoring stopped");
        true
    }

    /// Changes the sampling interval; re-arms the timer when running.
    pub fn set_interval(&self, interval_ms: u64) {
        let previous = self.inner.interval_ms.swap(interval_ms, Ordering::Relaxed);
        if previous != interval_ms && self.is_running() {
            self.arm();
        }
    }

    /// Runs one sampling tick now, after any timer tick in progress. Returns the
    /// number of speed events emitted.
    pub async fn tick(&self) -> usize {
        let resource = self.inner.scheduler.locks().acquire(MONITOR_TASK);
        let _guard = resource.lock().await;
        self.inner.tick().await
    }

    fn arm(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule_repeating(
            MONITOR_TASK,
            self.interval_ms(),
            Priority::Normal,
            move || {
                let weak = weak.clone();
                async move {
                    // Already serialized under MONITOR_TASK by the scheduler.
                    if let Some(inner) = weak.upgrade() {
                        inner.tick().await;
                    }
                    Ok(())
                }
            },
        );
    }
}

impl MonitorInner {
    fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    fn tracked(&self) -> MutexGuard<'_, TrackedSet> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(skip(self), fields(operation = "sample_tick"))]
    async fn tick(&self) -> usize {
        let provider = self.provider.clone();
        let read = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let counters = provider.read_all()?;
            let identifiers = provider.resolve_identifiers()?;
            Ok(samples_by_identifier(&counters, &identifiers))
        })
        .await;
        let now = self.now_ms();

        let samples = match read {
            Ok(Ok(samples)) => samples,
            Ok(Err(e)) => {
                warn!(error = %e, operation = "read_all", "raw stats read failed");
                return 0;
            }
            Err(e) => {
                warn!(error = %e, operation = "read_all", "stats task join failed");
                return 0;
            }
        };

        let events = self.tracked().apply_snapshot(&samples, now);
        let emitted = events.len();
        for event in events {
            if self.tx.send(event).is_err() {
                trace!("no speed subscribers");
            }
        }
        self.events_emitted_total
            .fetch_add(emitted as u64, Ordering::Relaxed);
        emitted
    }
}
