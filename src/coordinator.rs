// Coordination thread. Owns externally observed structure (the grid and its index):
// main-thread jobs run here one at a time, highest priority first, FIFO within a tier.

use crate::scheduler::Priority;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::ThreadId;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Priority, Job),
    Stop,
}

struct Queued {
    priority: Priority,
    seq: u64,
    job: Job,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Owns the coordination thread. Dropping it without `shutdown` leaves the
/// thread running until every handle is gone.
pub struct Coordinator {
    handle: CoordinatorHandle,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// Cloneable sender side used by the scheduler and components.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Message>,
    thread_id: ThreadId,
}

impl Coordinator {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("coordinator".into())
            .spawn(move || run_loop(rx))?;
        let thread_id = thread.thread().id();
        Ok(Self {
            handle: CoordinatorHandle { tx, thread_id },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Runs every job already queued, then stops and joins the thread. Blocking.
    pub fn shutdown(mut self) {
        let _ = self.handle.tx.send(Message::Stop);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("coordinator thread panicked");
        }
    }
}

impl CoordinatorHandle {
    /// True when called from the coordination thread.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Queues `job`; false if the coordinator has stopped.
    pub fn post(&self, priority: Priority, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Message::Run(priority, Box::new(job))).is_ok()
    }

    /// Runs `f` on the coordination thread and waits for its result.
    pub async fn run<F, R>(&self, priority: Priority, f: F) -> anyhow::Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let posted = self.post(priority, move || {
            let _ = tx.send(catch_unwind(AssertUnwindSafe(f)));
        });
        anyhow::ensure!(posted, "coordinator stopped");
        match rx.await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(_)) => anyhow::bail!("main-thread task panicked"),
            Err(_) => anyhow::bail!("coordinator stopped"),
        }
    }
}

fn run_loop(mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut heap: BinaryHeap<Queued> = BinaryHeap::new();
    let mut seq: u64 = 0;
    let mut stopping = false;

    let mut accept = |msg: Message, heap: &mut BinaryHeap<Queued>, stopping: &mut bool| match msg {
        Message::Run(priority, job) => {
            heap.push(Queued { priority, seq, job });
            seq += 1;
        }
        Message::Stop => *stopping = true,
    };

    loop {
        if heap.is_empty() {
            if stopping {
                break;
            }
            match rx.blocking_recv() {
                Some(msg) => accept(msg, &mut heap, &mut stopping),
                None => break,
            }
        }
        while let Ok(msg) = rx.try_recv() {
            accept(msg, &mut heap, &mut stopping);
        }
        if let Some(q) = heap.pop()
            && catch_unwind(AssertUnwindSafe(q.job)).is_err()
        {
            tracing::error!(priority = ?q.priority, "main-thread job panicked");
        }
    }
    tracing::debug!("Coordinator shutting down");
}
