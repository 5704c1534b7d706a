// Task scheduler: a bounded worker pool fed by a priority queue, per-resource
// serialization through the lock table, repeating timers, and main-thread
// dispatch onto the coordination thread.

mod queue;
mod task;

pub use task::{Priority, TaskHandle, TaskOutcome};

use crate::coordinator::CoordinatorHandle;
use crate::lock_table::ResourceLockTable;
use futures_util::FutureExt;
use queue::TaskQueue;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use task::{Body, Task};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, error, trace, warn};

/// Worker count for `worker_threads`; 0 means available hardware parallelism.
pub fn resolve_worker_count(worker_threads: usize) -> usize {
    if worker_threads > 0 {
        return worker_threads;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    locks: ResourceLockTable,
    queue: Mutex<TaskQueue>,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    coordinator: CoordinatorHandle,
    runtime: tokio::runtime::Handle,
    worker_count: usize,
}

/// Clears a repeating timer's pending flag when its invocation finishes or is discarded.
struct PendingReset(Arc<AtomicBool>);

impl Drop for PendingReset {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn worker_body<F, Fut>(body: F) -> Body
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Body::Worker(Box::new(move || body().boxed()))
}

fn bound_worker_body<T, F, Fut>(target: &Arc<T>, body: F) -> Body
where
    T: Send + Sync + 'static,
    F: FnOnce(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let weak = Arc::downgrade(target);
    worker_body(move || async move {
        match weak.upgrade() {
            Some(target) => body(target).await,
            None => Ok(()),
        }
    })
}

impl Scheduler {
    /// Spawns the worker pool on the current tokio runtime. Panics outside a runtime.
    pub fn new(worker_threads: usize, coordinator: CoordinatorHandle) -> Self {
        let worker_count = resolve_worker_count(worker_threads);
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(SchedulerInner {
            locks: ResourceLockTable::new(),
            queue: Mutex::new(TaskQueue::default()),
            notify: Notify::new(),
            shutdown_tx,
            timers: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            coordinator,
            runtime: tokio::runtime::Handle::current(),
            worker_count,
        });
        {
            let mut workers = lock(&inner.workers);
            for id in 0..worker_count {
                let shutdown_rx = inner.shutdown_tx.subscribe();
                let worker = worker_loop(inner.clone(), id, shutdown_rx)
                    .instrument(tracing::trace_span!("worker", id));
                workers.push(tokio::spawn(worker));
            }
        }
        debug!(worker_count, "scheduler started");
        Self { inner }
    }

    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    pub fn locks(&self) -> &ResourceLockTable {
        &self.inner.locks
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.inner.coordinator
    }

    /// Tasks waiting for a worker.
    pub fn queued_len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Runs `body` once on a worker, serialized against other tasks sharing `resource_key`.
    pub fn schedule_once<F, Fut>(&self, resource_key: &str, priority: Priority, body: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (task, handle) = Task::new(priority, resource_key, worker_body(body));
        self.inner.submit(task);
        handle
    }

    /// Like `schedule_once`, but dropped without running if `target` is gone when dequeued.
    pub fn schedule_once_for<T, F, Fut>(
        &self,
        target: &Arc<T>,
        resource_key: &str,
        priority: Priority,
        body: F,
    ) -> TaskHandle
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (task, handle) = Task::new(priority, resource_key, bound_worker_body(target, body));
        self.inner.submit(task.bound_to(target));
        handle
    }

    /// Like `schedule_once`; `flag` is incremented now and decremented when the task
    /// finishes, fails, or is discarded.
    pub fn schedule_atomic<F, Fut>(
        &self,
        flag: &Arc<AtomicUsize>,
        resource_key: &str,
        body: F,
    ) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (task, handle) = Task::new(Priority::Normal, resource_key, worker_body(body));
        self.inner.submit(task.counted(flag));
        handle
    }

    pub fn schedule_atomic_for<T, F, Fut>(
        &self,
        target: &Arc<T>,
        flag: &Arc<AtomicUsize>,
        resource_key: &str,
        body: F,
    ) -> TaskHandle
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (task, handle) = Task::new(
            Priority::Normal,
            resource_key,
            bound_worker_body(target, body),
        );
        self.inner.submit(task.counted(flag).bound_to(target));
        handle
    }

    /// Runs `body` on the coordination thread. With a resource key, a worker holds the
    /// key's lock while the body runs; without one, the body goes straight to the
    /// coordination queue.
    pub fn schedule_main_thread<F>(&self, resource_key: &str, priority: Priority, body: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (task, handle) = Task::new(priority, resource_key, Body::Main(Box::new(body)));
        self.inner.submit(task);
        handle
    }

    pub fn schedule_main_thread_for<T, F>(
        &self,
        target: &Arc<T>,
        resource_key: &str,
        priority: Priority,
        body: F,
    ) -> TaskHandle
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        let weak = Arc::downgrade(target);
        let main = Body::Main(Box::new(move || {
            if let Some(target) = weak.upgrade() {
                body(target);
            }
        }));
        let (task, handle) = Task::new(priority, resource_key, main);
        self.inner.submit(task.bound_to(target));
        handle
    }

    /// Arms (or re-arms) the timer `name`. Each tick enqueues one invocation under the
    /// implicit resource key `name`; a tick that finds the previous invocation still
    /// pending or running is skipped.
    pub fn schedule_repeating<F, Fut>(&self, name: &str, interval_ms: u64, priority: Priority, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let period = Duration::from_millis(interval_ms.max(1));
        let body = Arc::new(body);
        let pending = Arc::new(AtomicBool::new(false));
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let key = name.to_string();

        let timer = self.inner.runtime.spawn(async move {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if pending.swap(true, Ordering::AcqRel) {
                    trace!(timer = %key, "previous invocation still running; tick coalesced");
                    continue;
                }
                let reset = PendingReset(pending.clone());
                let body = body.clone();
                let (task, _handle) = Task::new(
                    priority,
                    &key,
                    worker_body(move || async move {
                        let _reset = reset;
                        (*body)().await
                    }),
                );
                inner.submit(task);
            }
        });

        if let Some(previous) = lock(&self.inner.timers).insert(name.to_string(), timer) {
            previous.abort();
            debug!(timer = name, "repeating task re-armed");
        } else {
            debug!(timer = name, interval_ms, "repeating task armed");
        }
    }

    /// Disarms `name`. An invocation already in flight finishes normally.
    pub fn cancel_repeating(&self, name: &str) -> bool {
        match lock(&self.inner.timers).remove(name) {
            Some(timer) => {
                timer.abort();
                debug!(timer = name, "repeating task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_repeating(&self, name: &str) -> bool {
        lock(&self.inner.timers).contains_key(name)
    }

    /// Without a key, discards every queued task that has not started. With a key,
    /// waits until the task currently holding that key (if any) has finished.
    pub async fn cancel_all(&self, resource_key: Option<&str>) {
        match resource_key {
            None => {
                let discarded = lock(&self.inner.queue).drain();
                debug!(discarded = discarded.len(), "queued tasks discarded");
                drop(discarded);
            }
            Some(key) => {
                let resource = self.inner.locks.acquire(key);
                let _guard = resource.lock().await;
            }
        }
    }

    /// Disarms all timers, discards queued tasks, and stops the workers after their
    /// current task. Later submissions resolve as `TaskOutcome::Dropped`.
    pub fn shutdown(&self) {
        let timers: Vec<(String, JoinHandle<()>)> = lock(&self.inner.timers).drain().collect();
        for (_, timer) in &timers {
            timer.abort();
        }
        let discarded = {
            let mut queue = lock(&self.inner.queue);
            queue.close();
            queue.drain()
        };
        let _ = self.inner.shutdown_tx.send(true);
        lock(&self.inner.workers).clear();
        debug!(
            timers = timers.len(),
            discarded = discarded.len(),
            "scheduler shutting down"
        );
    }
}

impl SchedulerInner {
    fn submit(&self, task: Task) {
        if matches!(task.body, Body::Main(_)) && task.resource_key.is_none() {
            self.post_main(task);
            return;
        }
        let rejected = lock(&self.queue).push(task);
        match rejected {
            Ok(()) => self.notify.notify_one(),
            Err(task) => trace!(resource_key = task.label(), "scheduler stopped; task dropped"),
        }
    }

    /// Unkeyed main-thread work skips the pool and goes straight to the coordinator.
    fn post_main(&self, task: Task) {
        if lock(&self.queue).is_closed() {
            trace!("scheduler stopped; main-thread task dropped");
            return;
        }
        let priority = task.priority;
        let posted = self.coordinator.post(priority, move || {
            if !task.is_alive() {
                trace!("main-thread task target gone; dropped");
                return;
            }
            let Task {
                body,
                in_flight,
                done,
                ..
            } = task;
            let Body::Main(f) = body else { return };
            let outcome = match catch_unwind(AssertUnwindSafe(f)) {
                Ok(()) => TaskOutcome::Completed,
                Err(_) => {
                    error!("main-thread task panicked");
                    TaskOutcome::Failed("main-thread task panicked".into())
                }
            };
            drop(in_flight);
            let _ = done.send(outcome);
        });
        if !posted {
            debug!("coordinator stopped; main-thread task dropped");
        }
    }

    fn pop(&self) -> Option<Task> {
        lock(&self.queue).pop()
    }

    async fn execute(&self, task: Task) {
        if !task.is_alive() {
            trace!(resource_key = task.label(), "task target gone; dropped");
            return;
        }
        let resource = task.resource_key.as_deref().map(|k| self.locks.acquire(k));
        let _guard = match &resource {
            Some(r) => Some(r.lock().await),
            None => None,
        };
        if !task.is_alive() {
            trace!(resource_key = task.label(), "task target gone; dropped");
            return;
        }

        let label = task.label().to_string();
        let Task {
            priority,
            body,
            in_flight,
            done,
            ..
        } = task;
        let outcome = match body {
            Body::Worker(f) => match AssertUnwindSafe(async move { f().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(e)) => {
                    warn!(error = %e, resource_key = %label, "task failed");
                    TaskOutcome::Failed(e.to_string())
                }
                Err(_) => {
                    error!(resource_key = %label, "task panicked");
                    TaskOutcome::Failed("task panicked".into())
                }
            },
            Body::Main(f) => match self.coordinator.run(priority, f).await {
                Ok(()) => TaskOutcome::Completed,
                Err(e) => {
                    warn!(error = %e, resource_key = %label, "main-thread task failed");
                    TaskOutcome::Failed(e.to_string())
                }
            },
        };
        drop(in_flight);
        let _ = done.send(outcome);
    }
}

async fn worker_loop(inner: Arc<SchedulerInner>, id: usize, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match inner.pop() {
            Some(task) => inner.execute(task).await,
            None => {
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }
    trace!(id, "worker exiting");
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
