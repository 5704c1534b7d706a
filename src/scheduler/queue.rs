// Pending task queue: priority tiers, FIFO within a tier.

use super::task::Task;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry {
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

impl TaskQueue {
    /// Hands the task back when the queue is closed.
    pub(crate) fn push(&mut self, task: Task) -> Result<(), Task> {
        if self.closed {
            return Err(task);
        }
        self.heap.push(Entry {
            seq: self.next_seq,
            task,
        });
        self.next_seq += 1;
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|e| e.task)
    }

    pub(crate) fn drain(&mut self) -> Vec<Task> {
        self.heap.drain().map(|e| e.task).collect()
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Priority;
    use crate::scheduler::task::Body;

    fn task(priority: Priority, key: &str) -> Task {
        Task::new(priority, key, Body::Main(Box::new(|| {}))).0
    }

    #[test]
    fn pops_highest_priority_first_then_fifo() {
        let mut q = TaskQueue::default();
        for (p, k) in [
            (Priority::Low, "l1"),
            (Priority::High, "h1"),
            (Priority::Normal, "n1"),
            (Priority::High, "h2"),
            (Priority::Low, "l2"),
        ] {
            assert!(q.push(task(p, k)).is_ok());
        }
        let order: Vec<String> = std::iter::from_fn(|| q.pop())
            .map(|t| t.label().to_string())
            .collect();
        assert_eq!(order, vec!["h1", "h2", "n1", "l1", "l2"]);
    }

    #[test]
    fn closed_queue_rejects_and_drain_empties() {
        let mut q = TaskQueue::default();
        assert!(q.push(task(Priority::Normal, "a")).is_ok());
        assert!(q.push(task(Priority::Normal, "b")).is_ok());
        assert_eq!(q.drain().len(), 2);
        assert_eq!(q.len(), 0);
        q.close();
        assert!(q.is_closed());
        assert!(q.push(task(Priority::Normal, "c")).is_err());
    }
}
