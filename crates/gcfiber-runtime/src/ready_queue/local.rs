//! Per-worker FIFO queues
//!
//! Design:
//! - One `VecDeque` per worker behind a mutex, with an atomic length for
//!   lock-free emptiness checks
//! - Owners pop from the front; thieves take the first task that may
//!   migrate, also from the front
//! - No global queue: every task is placed on a worker when it becomes runnable

use super::ReadyQueue;
use crate::task::TaskHandle;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Initial capacity of each worker's queue
const LOCAL_CAPACITY: usize = 256;

struct LocalQueue {
    queue: Mutex<VecDeque<TaskHandle>>,
    len: AtomicUsize,
}

impl LocalQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(LOCAL_CAPACITY)),
            len: AtomicUsize::new(0),
        }
    }

    fn push(&self, task: TaskHandle) {
        let mut q = self.queue.lock();
        q.push_back(task);
        // SeqCst pairs with the sleeping-flag check in the worker loop
        self.len.store(q.len(), Ordering::SeqCst);
    }

    fn pop(&self) -> Option<TaskHandle> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut q = self.queue.lock();
        let task = q.pop_front();
        self.len.store(q.len(), Ordering::SeqCst);
        task
    }

    /// Remove the first task that may run on another worker
    fn steal_first(&self) -> Option<TaskHandle> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut q = self.queue.lock();
        let pos = q.iter().position(|task| task.may_migrate())?;
        let task = q.remove(pos);
        self.len.store(q.len(), Ordering::SeqCst);
        task
    }

    fn has_migratable(&self) -> bool {
        if self.len.load(Ordering::SeqCst) == 0 {
            return false;
        }
        self.queue.lock().iter().any(|task| task.may_migrate())
    }

    fn drain(&self) -> Vec<TaskHandle> {
        let mut q = self.queue.lock();
        let tasks = q.drain(..).collect();
        self.len.store(0, Ordering::SeqCst);
        tasks
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }
}

/// Per-worker queues of one pool
pub struct LocalQueues {
    local: Vec<CachePadded<LocalQueue>>,
}

impl LocalQueues {
    pub fn new(num_workers: usize) -> Self {
        Self {
            local: (0..num_workers)
                .map(|_| CachePadded::new(LocalQueue::new()))
                .collect(),
        }
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.local.len()
    }
}

impl ReadyQueue for LocalQueues {
    fn push(&self, worker: usize, task: TaskHandle) {
        self.local[worker].push(task);
    }

    fn pop(&self, worker: usize) -> Option<TaskHandle> {
        self.local[worker].pop()
    }

    fn steal(&self, thief: usize) -> Option<(usize, TaskHandle)> {
        let n = self.local.len();
        (1..n)
            .map(|offset| (thief + offset) % n)
            .find_map(|victim| self.local[victim].steal_first().map(|task| (victim, task)))
    }

    fn has_stealable(&self, thief: usize) -> bool {
        let n = self.local.len();
        (1..n).any(|offset| self.local[(thief + offset) % n].has_migratable())
    }

    fn drain(&self) -> Vec<TaskHandle> {
        self.local.iter().flat_map(|q| q.drain()).collect()
    }

    fn len_of(&self, worker: usize) -> usize {
        self.local[worker].len()
    }

    fn len(&self) -> usize {
        self.local.iter().map(|q| q.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{SavedStack, TaskStack};
    use crate::task::{Step, Task};
    use std::sync::Arc;

    fn task(sticky: Option<usize>) -> TaskHandle {
        Arc::new(Task::new(
            0,
            Box::new(|_| Step::Done),
            TaskStack::Copied(SavedStack::default()),
            sticky,
        ))
    }

    #[test]
    fn test_fifo() {
        let queues = LocalQueues::new(2);
        let a = task(None);
        let b = task(None);
        queues.push(0, Arc::clone(&a));
        queues.push(0, Arc::clone(&b));

        assert_eq!(queues.len(), 2);
        assert_eq!(queues.len_of(1), 0);
        assert_eq!(queues.pop(0).unwrap().id(), a.id());
        assert_eq!(queues.pop(0).unwrap().id(), b.id());
        assert!(queues.pop(0).is_none());
        assert!(queues.is_empty());
    }

    #[test]
    fn test_steal_skips_sticky() {
        let queues = LocalQueues::new(3);
        let pinned = task(Some(1));
        let free = task(None);
        let later = task(None);
        queues.push(1, Arc::clone(&pinned));
        queues.push(1, Arc::clone(&free));
        queues.push(1, Arc::clone(&later));

        assert!(queues.has_stealable(0));
        let (victim, stolen) = queues.steal(0).unwrap();
        assert_eq!(victim, 1);
        assert_eq!(stolen.id(), free.id());

        // Owner still sees its remaining order
        assert_eq!(queues.pop(1).unwrap().id(), pinned.id());
        assert_eq!(queues.pop(1).unwrap().id(), later.id());
    }

    #[test]
    fn test_steal_victim_order() {
        let queues = LocalQueues::new(4);
        let on_three = task(None);
        let on_zero = task(None);
        queues.push(3, Arc::clone(&on_three));
        queues.push(0, Arc::clone(&on_zero));

        // Thief 2 visits 3 before wrapping to 0
        let (victim, stolen) = queues.steal(2).unwrap();
        assert_eq!(victim, 3);
        assert_eq!(stolen.id(), on_three.id());

        // Never steals from itself
        assert!(queues.steal(0).is_none());
        assert_eq!(queues.len_of(0), 1);
    }

    #[test]
    fn test_sticky_only_queue_is_not_stealable() {
        let queues = LocalQueues::new(2);
        queues.push(0, task(Some(0)));
        queues.push(0, task(Some(0)));

        assert!(!queues.has_stealable(1));
        assert!(queues.steal(1).is_none());
        // The owner still sees its own work
        assert!(!queues.has_stealable(0));
        assert_eq!(queues.len_of(0), 2);
    }

    #[test]
    fn test_drain() {
        let queues = LocalQueues::new(2);
        queues.push(0, task(None));
        queues.push(1, task(Some(1)));
        assert_eq!(queues.drain().len(), 2);
        assert!(queues.is_empty());
    }
}
