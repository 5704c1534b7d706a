// Grid state manager: guarded discovery refresh, identifier-indexed speed patching,
// user swaps, and pause/resume. Structural mutations run on the coordination thread;
// discovery and confirmation run on pool workers.

mod confirm;
mod events;
mod model;
mod sort;

pub use confirm::{
    AutoConfirm, BEST_NETWORK_SWAP_ID, BEST_NETWORK_SWAP_MESSAGE, BEST_NETWORK_SWAP_TITLE,
    ConfirmationDialog,
};
pub use events::GridEvent;
pub use model::{GridModel, GridSnapshot};
pub use sort::{ByName, ByRecency, ByThroughput, SortStrategy, SortStrategyId};

use crate::discovery::InterfaceDiscovery;
use crate::error::{DiscoveryError, GridError};
use crate::models::{InterfaceRecord, Position, SpeedEvent, epoch_millis, normalize_identifier};
use crate::network_monitor::NetworkMonitor;
use crate::scheduler::{Priority, Scheduler, TaskHandle, TaskOutcome};
use model::Deferred;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, trace, warn};

/// Resource key serializing discovery refresh cycles.
pub const REFRESH_TASK: &str = "data_refresh_task";
/// Resource key serializing swaps (including their confirmation).
pub const SWAP_TASK: &str = "grid_swap";
/// Timer that requests periodic refreshes.
pub const REFRESH_TIMER: &str = "grid_refresh_timer";

/// Upper bound on cells, so a bad resize cannot allocate a huge grid.
pub const MAX_CELLS: usize = 4096;

/// Grid events buffered per subscriber before it lags.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The configuration values the grid reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSettings {
    pub rows: usize,
    pub cols: usize,
    pub refresh_interval_ms: u64,
    pub sort_strategy: SortStrategyId,
    pub show_best_network_warning: bool,
}

/// Collaborators the grid needs.
pub struct GridDeps {
    pub scheduler: Scheduler,
    pub discovery: Arc<dyn InterfaceDiscovery>,
    pub confirm: Arc<dyn ConfirmationDialog>,
}

#[derive(Clone)]
pub struct GridStateManager {
    inner: Arc<GridInner>,
}

struct GridInner {
    scheduler: Scheduler,
    discovery: Arc<dyn InterfaceDiscovery>,
    confirm: Arc<dyn ConfirmationDialog>,
    model: Mutex<GridModel>,
    events: broadcast::Sender<GridEvent>,
    refresh_in_flight: Arc<AtomicUsize>,
    refresh_gate: Mutex<()>,
    strategy: RwLock<Arc<dyn SortStrategy>>,
    settings: Mutex<GridSettings>,
    show_warning: AtomicBool,
    running: AtomicBool,
    monitor: Mutex<Option<NetworkMonitor>>,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
    discovery_calls: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn checked_dimensions(rows: i32, cols: i32) -> Result<(usize, usize), GridError> {
    let invalid = GridError::InvalidDimensions { rows, cols };
    if rows < 0 || cols < 0 {
        return Err(invalid);
    }
    let (r, c) = (rows as usize, cols as usize);
    match r.checked_mul(c) {
        Some(cells) if cells <= MAX_CELLS => Ok((r, c)),
        _ => Err(invalid),
    }
}

fn signed_dimensions(settings: &GridSettings) -> (i32, i32) {
    (
        i32::try_from(settings.rows).unwrap_or(i32::MAX),
        i32::try_from(settings.cols).unwrap_or(i32::MAX),
    )
}

impl GridStateManager {
    /// Allocates an empty grid of the configured size. Nothing runs until `start`.
    pub fn new(deps: GridDeps, settings: GridSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(GridInner {
                scheduler: deps.scheduler,
                discovery: deps.discovery,
                confirm: deps.confirm,
                model: Mutex::new(GridModel::new(settings.rows, settings.cols)),
                events,
                refresh_in_flight: Arc::new(AtomicUsize::new(0)),
                refresh_gate: Mutex::new(()),
                strategy: RwLock::new(settings.sort_strategy.strategy()),
                show_warning: AtomicBool::new(settings.show_best_network_warning),
                settings: Mutex::new(settings),
                running: AtomicBool::new(false),
                monitor: Mutex::new(None),
                listener: Mutex::new(None),
                discovery_calls: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GridEvent> {
        self.inner.events.subscribe()
    }

    /// Initializes the grid at the configured size and arms the refresh timer.
    pub fn start(&self) -> Result<TaskHandle, GridError> {
        let settings = self.settings();
        let (rows, cols) = signed_dimensions(&settings);
        let handle = self.initialize_grid(rows, cols)?;
        self.inner.running.store(true, Ordering::Release);
        self.inner.arm_refresh_timer(settings.refresh_interval_ms);
        Ok(handle)
    }

    /// Disarms the refresh timer and detaches from the monitor's events.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.scheduler.cancel_repeating(REFRESH_TIMER);
        if let Some(listener) = lock(&self.inner.listener).take() {
            listener.abort();
        }
    }

    /// Clears the grid and index, reallocates `rows` x `cols`, then refreshes.
    /// Negative dimensions, or more than `MAX_CELLS` cells, are rejected without
    /// touching state.
    pub fn initialize_grid(&self, rows: i32, cols: i32) -> Result<TaskHandle, GridError> {
        let (rows, cols) = checked_dimensions(rows, cols).inspect_err(|e| {
            warn!(error = %e, operation = "initialize_grid", "grid resize rejected");
        })?;
        {
            let mut settings = lock(&self.inner.settings);
            settings.rows = rows;
            settings.cols = cols;
        }
        Ok(self.inner.scheduler.schedule_main_thread_for(
            &self.inner,
            "",
            Priority::High,
            move |inner| {
                inner.apply_reset(rows, cols);
                let _ = inner.request_refresh();
            },
        ))
    }

    /// Starts a discovery refresh unless one is already in flight, in which case the
    /// request is a no-op and None is returned.
    pub fn refresh(&self) -> Option<TaskHandle> {
        self.inner.request_refresh()
    }

    /// Patches the throughput of the cell holding `identifier`; dropped if unplaced.
    pub fn handle_speed_update(&self, identifier: &str, rx_bps: i64, tx_bps: i64) -> TaskHandle {
        self.inner.submit_speed(SpeedEvent {
            identifier: normalize_identifier(identifier),
            rx_bps,
            tx_bps,
        })
    }

    /// Swaps two cells. Out-of-bounds positions are rejected synchronously with a
    /// warning and no mutation. Moving the best-network cell asks for confirmation
    /// first unless warnings are disabled.
    pub fn swap_cells(&self, from: Position, to: Position) -> Result<TaskHandle, GridError> {
        let (rows, cols) = self.dimensions();
        for p in [from, to] {
            if !p.in_bounds(rows, cols) {
                let e = GridError::OutOfBounds {
                    position: p,
                    rows,
                    cols,
                };
                warn!(error = %e, %from, %to, operation = "swap_cells", "swap rejected");
                return Err(e);
            }
        }
        Ok(self.inner.scheduler.schedule_once_for(
            &self.inner,
            SWAP_TASK,
            Priority::High,
            move |inner| inner.run_swap(from, to),
        ))
    }

    /// While paused, speed updates and refresh results are queued; resuming replays
    /// them in arrival order.
    pub fn set_updates_paused(&self, paused: bool) -> TaskHandle {
        self.inner.scheduler.schedule_main_thread_for(
            &self.inner,
            "",
            Priority::High,
            move |inner| inner.apply_paused(paused),
        )
    }

    /// Reacts to changed configuration values.
    pub fn apply_settings(&self, settings: GridSettings) {
        let (rows, cols) = signed_dimensions(&settings);
        if let Err(e) = checked_dimensions(rows, cols) {
            warn!(error = %e, operation = "apply_settings", "grid settings rejected");
            return;
        }
        let previous = std::mem::replace(&mut *lock(&self.inner.settings), settings.clone());
        if previous == settings {
            return;
        }
        self.inner
            .show_warning
            .store(settings.show_best_network_warning, Ordering::Release);

        let sort_changed = previous.sort_strategy != settings.sort_strategy;
        if sort_changed {
            self.set_sort_strategy(settings.sort_strategy.strategy());
        }
        if (previous.rows, previous.cols) != (settings.rows, settings.cols) {
            let _ = self.initialize_grid(rows, cols);
        } else if sort_changed {
            let _ = self.refresh();
        }
        if previous.refresh_interval_ms != settings.refresh_interval_ms
            && self.inner.running.load(Ordering::Acquire)
        {
            self.inner.arm_refresh_timer(settings.refresh_interval_ms);
        }
        info!(
            rows = settings.rows,
            cols = settings.cols,
            refresh_interval_ms = settings.refresh_interval_ms,
            sort_strategy = %settings.sort_strategy,
            "grid settings applied"
        );
    }

    /// Installs a ranking strategy for subsequent refreshes.
    pub fn set_sort_strategy(&self, strategy: Arc<dyn SortStrategy>) {
        *self
            .inner
            .strategy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = strategy;
    }

    /// Feeds the monitor's speed events into the grid and keeps its tracked set equal
    /// to the placed identifiers. Must be called inside a tokio runtime.
    pub fn attach_monitor(&self, monitor: NetworkMonitor) {
        let mut rx = monitor.subscribe();
        let placed: Vec<String> = lock(&self.inner.model).identifiers().cloned().collect();
        monitor.update_tracked_macs(&placed);
        *lock(&self.inner.monitor) = Some(monitor);

        let weak = Arc::downgrade(&self.inner);
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(inner) = weak.upgrade() else { break };
                        let _ = inner.submit_speed(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "grid fell behind speed events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("speed listener exiting");
        });
        if let Some(previous) = lock(&self.inner.listener).replace(listener) {
            previous.abort();
        }
    }

    pub fn snapshot(&self) -> GridSnapshot {
        lock(&self.inner.model).snapshot()
    }

    pub fn dimensions(&self) -> (usize, usize) {
        let model = lock(&self.inner.model);
        (model.rows(), model.cols())
    }

    pub fn settings(&self) -> GridSettings {
        lock(&self.inner.settings).clone()
    }

    pub fn is_refresh_in_flight(&self) -> bool {
        self.inner.refresh_in_flight.load(Ordering::Acquire) > 0
    }

    /// Discovery cycles started so far.
    pub fn discovery_calls(&self) -> u64 {
        self.inner.discovery_calls.load(Ordering::Relaxed)
    }
}

impl GridInner {
    fn emit(&self, event: GridEvent) {
        if self.events.send(event).is_err() {
            trace!("no grid subscribers");
        }
    }

    fn emit_cell(&self, model: &GridModel, position: Position) {
        self.emit(GridEvent::CellChanged {
            position,
            record: model.cell(position).cloned(),
        });
    }

    fn strategy(&self) -> Arc<dyn SortStrategy> {
        self.strategy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn arm_refresh_timer(self: &Arc<Self>, interval_ms: u64) {
        let weak = Arc::downgrade(self);
        self.scheduler
            .schedule_repeating(REFRESH_TIMER, interval_ms, Priority::Low, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let _ = inner.request_refresh();
                    }
                    Ok(())
                }
            });
    }

    fn request_refresh(self: &Arc<Self>) -> Option<TaskHandle> {
        let _gate = lock(&self.refresh_gate);
        if self.refresh_in_flight.load(Ordering::Acquire) > 0 {
            debug!("refresh already in flight; request ignored");
            return None;
        }
        Some(self.scheduler.schedule_atomic_for(
            self,
            &self.refresh_in_flight,
            REFRESH_TASK,
            |inner| inner.run_refresh(),
        ))
    }

    /// Worker side of a refresh: discover and rank, then apply on the coordinator.
    #[instrument(skip(self), fields(operation = "refresh"))]
    async fn run_refresh(self: Arc<Self>) -> anyhow::Result<()> {
        self.discovery_calls.fetch_add(1, Ordering::Relaxed);
        let mut records = match self.discovery.parse().await {
            Ok(records) => records,
            Err(DiscoveryError::NoActiveInterfaces) => {
                debug!("discovery found no active interfaces");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "interface discovery failed");
                return Ok(());
            }
        };
        carry_over_speeds(&lock(&self.model), &mut records);
        // Untrimmed: populate cuts to the capacity current at apply time.
        self.strategy().rank(&mut records);

        let applied = self
            .scheduler
            .schedule_main_thread_for(&self, "", Priority::High, move |inner| {
                inner.apply_layout(records)
            })
            .wait()
            .await;
        if !applied.is_completed() {
            debug!(outcome = ?applied, "refresh result not applied");
        }
        Ok(())
    }

    fn apply_reset(&self, rows: usize, cols: usize) {
        debug_assert!(self.scheduler.coordinator().is_current());
        lock(&self.model).reset(rows, cols);
        self.emit(GridEvent::GridDimensionsChanged { rows, cols });
        self.emit(GridEvent::GridReset);
        self.sync_tracked(Vec::new());
        info!(rows, cols, "grid initialized");
    }

    fn apply_layout(&self, records: Vec<InterfaceRecord>) {
        debug_assert!(self.scheduler.coordinator().is_current());
        let placed = {
            let mut model = lock(&self.model);
            if model.is_paused() {
                model.defer(Deferred::Layout(records));
                return;
            }
            self.layout_locked(&mut model, records)
        };
        self.sync_tracked(placed);
    }

    fn layout_locked(&self, model: &mut GridModel, records: Vec<InterfaceRecord>) -> Vec<String> {
        let placed = model.populate(records);
        for position in model.positions() {
            self.emit_cell(model, position);
        }
        debug!(placed, capacity = model.capacity(), "refresh applied");
        model.identifiers().cloned().collect()
    }

    fn submit_speed(self: &Arc<Self>, event: SpeedEvent) -> TaskHandle {
        self.scheduler
            .schedule_main_thread_for(self, "", Priority::Normal, move |inner| {
                inner.apply_speed(event, epoch_millis())
            })
    }

    fn apply_speed(&self, event: SpeedEvent, at_ms: u64) {
        let mut model = lock(&self.model);
        if model.is_paused() {
            model.defer(Deferred::Speed { event, at_ms });
            return;
        }
        self.speed_locked(&mut model, &event, at_ms);
    }

    fn speed_locked(&self, model: &mut GridModel, event: &SpeedEvent, at_ms: u64) {
        match model.apply_speed(event, at_ms) {
            Some(position) => self.emit_cell(model, position),
            None => trace!(identifier = %event.identifier, "speed update for unplaced identifier dropped"),
        }
    }

    async fn run_swap(self: Arc<Self>, from: Position, to: Position) -> anyhow::Result<()> {
        let moves_best = from != to && (from == Position::BEST || to == Position::BEST);
        if moves_best && self.show_warning.load(Ordering::Acquire) {
            let dialog = self.confirm.clone();
            let confirmed = tokio::task::spawn_blocking(move || {
                dialog.confirm(
                    BEST_NETWORK_SWAP_ID,
                    BEST_NETWORK_SWAP_TITLE,
                    BEST_NETWORK_SWAP_MESSAGE,
                )
            })
            .await?;
            if !confirmed {
                info!(%from, %to, "best network swap declined");
                return Ok(());
            }
        }
        let applied = self
            .scheduler
            .schedule_main_thread_for(&self, "", Priority::High, move |inner| {
                inner.apply_swap(from, to)
            })
            .wait()
            .await;
        match applied {
            TaskOutcome::Completed => Ok(()),
            TaskOutcome::Failed(reason) => anyhow::bail!("swap {from} -> {to} failed: {reason}"),
            TaskOutcome::Dropped => anyhow::bail!("swap {from} -> {to} was dropped"),
        }
    }

    fn apply_swap(&self, from: Position, to: Position) {
        debug_assert!(self.scheduler.coordinator().is_current());
        let mut model = lock(&self.model);
        match model.swap(from, to) {
            Ok(true) => {
                self.emit_cell(&model, from);
                self.emit_cell(&model, to);
                debug!(%from, %to, "cells swapped");
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, operation = "swap_cells", "swap rejected"),
        }
    }

    fn apply_paused(&self, paused: bool) {
        let placed = {
            let mut model = lock(&self.model);
            if model.is_paused() == paused {
                return;
            }
            model.set_paused(paused);
            if paused {
                debug!("grid updates paused");
                return;
            }
            let deferred = model.take_deferred();
            debug!(replayed = deferred.len(), "grid updates resumed");
            let mut placed = None;
            for work in deferred {
                match work {
                    Deferred::Speed { event, at_ms } => self.speed_locked(&mut model, &event, at_ms),
                    Deferred::Layout(records) => {
                        placed = Some(self.layout_locked(&mut model, records));
                    }
                }
            }
            placed
        };
        if let Some(placed) = placed {
            self.sync_tracked(placed);
        }
    }

    fn sync_tracked(&self, placed: Vec<String>) {
        if let Some(monitor) = lock(&self.monitor).as_ref() {
            monitor.update_tracked_macs(&placed);
        }
    }
}

/// Copies last-known throughput from placed records so ranking sees live rates.
fn carry_over_speeds(model: &GridModel, records: &mut [InterfaceRecord]) {
    let live: HashMap<&str, &InterfaceRecord> = model
        .identifiers()
        .filter_map(|id| model.position_of(id).and_then(|p| model.cell(p)))
        .map(|r| (r.identifier.as_str(), r))
        .collect();
    for record in records.iter_mut() {
        if let Some(current) = live.get(record.identifier.as_str()) {
            record.rx_bps = current.rx_bps;
            record.tx_bps = current.tx_bps;
            record.last_update_ms = current.last_update_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_validation() {
        assert_eq!(checked_dimensions(3, 4), Ok((3, 4)));
        assert_eq!(checked_dimensions(0, 0), Ok((0, 0)));
        assert_eq!(
            checked_dimensions(-1, 3),
            Err(GridError::InvalidDimensions { rows: -1, cols: 3 })
        );
        assert!(checked_dimensions(2, -2).is_err());
        assert_eq!(checked_dimensions(64, 64), Ok((64, 64)));
        assert!(checked_dimensions(4097, 1).is_err());
        assert!(checked_dimensions(65, 64).is_err());
        assert_eq!(
            checked_dimensions(i32::MAX, i32::MAX),
            Err(GridError::InvalidDimensions {
                rows: i32::MAX,
                cols: i32::MAX
            })
        );
    }

    #[test]
    fn carry_over_copies_throughput_only() {
        let mut model = GridModel::new(1, 2);
        let mut placed = InterfaceRecord::new("aabbccddeeff", "eth0");
        placed.apply_speed(500, 700, 42);
        model.populate(vec![placed]);

        let mut fresh = vec![
            InterfaceRecord::new("aabbccddeeff", "eth0-renamed"),
            InterfaceRecord::new("112233445566", "wlan0"),
        ];
        carry_over_speeds(&model, &mut fresh);
        assert_eq!((fresh[0].rx_bps, fresh[0].tx_bps, fresh[0].last_update_ms), (500, 700, 42));
        assert_eq!(fresh[0].name, "eth0-renamed");
        assert_eq!(fresh[1].total_bps(), 0);
    }
}
