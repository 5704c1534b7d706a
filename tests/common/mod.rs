// Shared test helpers: fake collaborators and a coordinator + scheduler pair
#![allow(dead_code)]

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use netgrid::coordinator::Coordinator;
use netgrid::discovery::InterfaceDiscovery;
use netgrid::error::DiscoveryError;
use netgrid::grid::ConfirmationDialog;
use netgrid::models::{InterfaceRecord, RawCounterSample};
use netgrid::scheduler::Scheduler;
use netgrid::stats_provider::RawStatsProvider;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Coordinator thread plus a scheduler bound to it. Keep the coordinator alive for the test.
pub fn scheduler(workers: usize) -> (Coordinator, Scheduler) {
    let coordinator = Coordinator::spawn().expect("coordinator thread");
    let scheduler = Scheduler::new(workers, coordinator.handle());
    (coordinator, scheduler)
}

/// 12-hex-digit identifier derived from `n`.
pub fn mac(n: u32) -> String {
    format!("{:012x}", n)
}

pub fn record(n: u32, name: &str, total_bps: i64) -> InterfaceRecord {
    let mut r = InterfaceRecord::new(&mac(n), name);
    r.is_up = true;
    r.is_running = true;
    r.rx_bps = total_bps;
    r
}

/// Polls `cond` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub enum DiscoveryMode {
    Records,
    NoActive,
    Failing,
}

/// Scripted discovery. Counts calls; optionally sleeps before answering.
pub struct FakeDiscovery {
    records: Mutex<Vec<InterfaceRecord>>,
    mode: Mutex<DiscoveryMode>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl FakeDiscovery {
    pub fn new(records: Vec<InterfaceRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            mode: Mutex::new(DiscoveryMode::Records),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_records(&self, records: Vec<InterfaceRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn set_mode(&self, mode: DiscoveryMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InterfaceDiscovery for FakeDiscovery {
    fn parse(&self) -> BoxFuture<'_, Result<Vec<InterfaceRecord>, DiscoveryError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match *self.mode.lock().unwrap() {
                DiscoveryMode::Records => Ok(self.records.lock().unwrap().clone()),
                DiscoveryMode::NoActive => Err(DiscoveryError::NoActiveInterfaces),
                DiscoveryMode::Failing => Err(DiscoveryError::Other("netlink unavailable".into())),
            }
        }
        .boxed()
    }
}

/// In-memory counters keyed by interface name, with a name -> identifier map.
#[derive(Default)]
pub struct FakeProvider {
    counters: Mutex<HashMap<String, RawCounterSample>>,
    identifiers: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    reads: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, name: &str, identifier: &str, rx_bytes: u64, tx_bytes: u64) {
        self.counters
            .lock()
            .unwrap()
            .insert(name.to_string(), RawCounterSample::new(rx_bytes, tx_bytes));
        self.identifiers
            .lock()
            .unwrap()
            .insert(name.to_string(), identifier.to_string());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl RawStatsProvider for FakeProvider {
    fn read_all(&self) -> anyhow::Result<HashMap<String, RawCounterSample>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.failing.load(Ordering::SeqCst), "counter source unavailable");
        Ok(self.counters.lock().unwrap().clone())
    }

    fn resolve_identifiers(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(self.identifiers.lock().unwrap().clone())
    }
}

/// Answers every confirmation with a fixed value and counts the prompts.
pub struct RecordingConfirm {
    answer: bool,
    asked: AtomicUsize,
}

impl RecordingConfirm {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            asked: AtomicUsize::new(0),
        })
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl ConfirmationDialog for RecordingConfirm {
    fn confirm(&self, _id: &str, _title: &str, _message: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}
