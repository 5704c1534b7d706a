// Units of deferred work and their completion handles

use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Dispatch tier. Higher tiers are dequeued first; FIFO within a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// How a scheduled task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Body returned an error or panicked; the message is logged as well.
    Failed(String),
    /// Never ran: discarded from the queue, scheduler shut down, or target gone.
    Dropped,
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Resolves once the task has run or been discarded. Dropping it does not cancel the task.
pub struct TaskHandle {
    rx: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub async fn wait(self) -> TaskOutcome {
        self.rx.await.unwrap_or(TaskOutcome::Dropped)
    }
}

/// Increments an external counter while a task is pending or running (connect = +1, drop = -1).
pub(crate) struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    pub(crate) fn new(flag: &Arc<AtomicUsize>) -> Self {
        flag.fetch_add(1, Ordering::AcqRel);
        Self(flag.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) type WorkerFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;
pub(crate) type MainFn = Box<dyn FnOnce() + Send>;
type AliveFn = Box<dyn Fn() -> bool + Send + Sync>;

pub(crate) enum Body {
    /// Runs on a pool worker.
    Worker(WorkerFn),
    /// Runs on the coordination thread.
    Main(MainFn),
}

pub(crate) struct Task {
    pub(crate) priority: Priority,
    pub(crate) resource_key: Option<String>,
    pub(crate) body: Body,
    alive: Option<AliveFn>,
    pub(crate) in_flight: Option<InFlightGuard>,
    pub(crate) done: oneshot::Sender<TaskOutcome>,
}

impl Task {
    /// An empty `resource_key` means no serialization.
    pub(crate) fn new(priority: Priority, resource_key: &str, body: Body) -> (Self, TaskHandle) {
        let (done, rx) = oneshot::channel();
        let task = Self {
            priority,
            resource_key: (!resource_key.is_empty()).then(|| resource_key.to_string()),
            body,
            alive: None,
            in_flight: None,
            done,
        };
        (task, TaskHandle { rx })
    }

    /// Skip the task if `target` has been dropped by the time it is dequeued.
    pub(crate) fn bound_to<T: Send + Sync + 'static>(mut self, target: &Arc<T>) -> Self {
        let weak = Arc::downgrade(target);
        self.alive = Some(Box::new(move || weak.strong_count() > 0));
        self
    }

    pub(crate) fn counted(mut self, flag: &Arc<AtomicUsize>) -> Self {
        self.in_flight = Some(InFlightGuard::new(flag));
        self
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.as_ref().is_none_or(|alive| alive())
    }

    pub(crate) fn label(&self) -> &str {
        self.resource_key.as_deref().unwrap_or("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_means_unserialized() {
        let (task, _h) = Task::new(Priority::Normal, "", Body::Main(Box::new(|| {})));
        assert!(task.resource_key.is_none());
        assert_eq!(task.label(), "-");
        let (task, _h) = Task::new(Priority::Normal, "grid_swap", Body::Main(Box::new(|| {})));
        assert_eq!(task.resource_key.as_deref(), Some("grid_swap"));
    }

    #[test]
    fn counted_guard_releases_on_drop() {
        let flag = Arc::new(AtomicUsize::new(0));
        let (task, _h) = Task::new(Priority::Low, "k", Body::Main(Box::new(|| {})));
        let task = task.counted(&flag);
        assert_eq!(flag.load(Ordering::Acquire), 1);
        drop(task);
        assert_eq!(flag.load(Ordering::Acquire), 0);
    }

    #[test]
    fn bound_task_dies_with_target() {
        let target = Arc::new(());
        let (task, _h) = Task::new(Priority::Low, "", Body::Main(Box::new(|| {})));
        let task = task.bound_to(&target);
        assert!(task.is_alive());
        drop(target);
        assert!(!task.is_alive());
    }

    #[tokio::test]
    async fn dropped_task_resolves_handle_as_dropped() {
        let (task, handle) = Task::new(Priority::Low, "", Body::Main(Box::new(|| {})));
        drop(task);
        assert_eq!(handle.wait().await, TaskOutcome::Dropped);
    }

    #[test]
    fn priority_order() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
