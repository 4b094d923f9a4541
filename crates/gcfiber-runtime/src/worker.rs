//! Worker thread management
//!
//! Workers are OS threads that run tasks. Each worker has a slot holding its
//! parker, its sleeping flag and monotonic counters; the slots of a pool
//! live side by side, one cache line apart.

use crate::parking::{new_parking, WorkerParking};
use gcfiber_core::WorkerError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Snapshot of one worker's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Task steps executed
    pub steps: u64,
    /// Tasks taken from another worker's queue
    pub steals: u64,
    /// Times the worker went to sleep
    pub parks: u64,
    /// Time spent without work, spinning or parked
    pub idle: Duration,
    /// Bytes copied from save buffers into the shared stack
    pub bytes_copied_in: u64,
    /// Bytes copied from the shared stack into save buffers
    pub bytes_copied_out: u64,
}

/// Per-worker shared state
pub(crate) struct WorkerSlot {
    parker: Box<dyn WorkerParking>,
    sleeping: AtomicBool,
    steps: AtomicU64,
    steals: AtomicU64,
    parks: AtomicU64,
    idle_ns: AtomicU64,
    copied_in: AtomicU64,
    copied_out: AtomicU64,
}

impl WorkerSlot {
    pub(crate) fn new() -> Self {
        Self {
            parker: new_parking(),
            sleeping: AtomicBool::new(false),
            steps: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            parks: AtomicU64::new(0),
            idle_ns: AtomicU64::new(0),
            copied_in: AtomicU64::new(0),
            copied_out: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn parker(&self) -> &dyn WorkerParking {
        &*self.parker
    }

    /// Announce the intent to sleep; the caller must re-check for work
    /// afterwards
    #[inline]
    pub(crate) fn set_sleeping(&self, sleeping: bool) {
        self.sleeping.store(sleeping, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::SeqCst)
    }

    /// Wake the worker if it has announced sleep
    #[inline]
    pub(crate) fn wake_if_sleeping(&self) -> bool {
        if self.is_sleeping() {
            self.parker.unpark();
            true
        } else {
            false
        }
    }

    #[inline]
    pub(crate) fn record_step(&self) {
        self.steps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_steal(&self) {
        self.steals.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_park(&self) {
        self.parks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_idle(&self, idle: Duration) {
        self.idle_ns
            .fetch_add(idle.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_copy_in(&self, bytes: usize) {
        self.copied_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_copy_out(&self, bytes: usize) {
        self.copied_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> WorkerStats {
        WorkerStats {
            steps: self.steps.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            idle: Duration::from_nanos(self.idle_ns.load(Ordering::Relaxed)),
            bytes_copied_in: self.copied_in.load(Ordering::Relaxed),
            bytes_copied_out: self.copied_out.load(Ordering::Relaxed),
        }
    }
}

/// Pool of worker threads
pub struct WorkerPool {
    /// Join handles for worker threads
    handles: Vec<JoinHandle<()>>,

    /// Index of the thread-pool these workers serve
    pool: usize,

    /// Number of workers
    num_workers: usize,
}

impl WorkerPool {
    pub fn new(pool: usize, num_workers: usize) -> Self {
        Self {
            handles: Vec::with_capacity(num_workers),
            pool,
            num_workers,
        }
    }

    /// Start all worker threads
    pub fn start<F>(&mut self, worker_fn: F) -> Result<(), WorkerError>
    where
        F: Fn(usize) + Send + Sync + Clone + 'static,
    {
        for i in 0..self.num_workers {
            let worker_fn = worker_fn.clone();
            let handle = thread::Builder::new()
                .name(format!("gcfiber-{}-{}", self.pool, i))
                .spawn(move || worker_fn(i))
                .map_err(|err| {
                    tracing::error!(pool = self.pool, worker = i, %err, "failed to spawn worker");
                    WorkerError::SpawnFailed
                })?;
            self.handles.push(handle);
        }
        Ok(())
    }

    /// Wait for all workers to finish
    pub fn join(&mut self) -> Result<(), WorkerError> {
        let mut result = Ok(());
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                result = Err(WorkerError::Panicked);
            }
        }
        result
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Whether threads have been started and not yet joined
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_pool_start_join() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(0, 3);
        let s = Arc::clone(&seen);
        pool.start(move |i| {
            assert_eq!(
                thread::current().name(),
                Some(format!("gcfiber-0-{}", i).as_str())
            );
            s.fetch_add(1 << i, Ordering::SeqCst);
        })
        .unwrap();
        assert!(pool.is_running());
        pool.join().unwrap();
        assert!(!pool.is_running());
        assert_eq!(seen.load(Ordering::SeqCst), 0b111);
    }

    #[test]
    fn test_join_reports_panic() {
        let mut pool = WorkerPool::new(1, 1);
        pool.start(|_| panic!("worker failed")).unwrap();
        assert_eq!(pool.join(), Err(WorkerError::Panicked));
    }

    #[test]
    fn test_slot_counters() {
        let slot = WorkerSlot::new();
        slot.record_step();
        slot.record_park();
        slot.record_idle(Duration::from_micros(3));
        slot.record_copy_in(10);
        slot.record_copy_out(12);

        let stats = slot.stats();
        assert_eq!(stats.steps, 1);
        assert_eq!(stats.parks, 1);
        assert_eq!(stats.idle, Duration::from_micros(3));
        assert_eq!(stats.bytes_copied_in, 10);
        assert_eq!(stats.bytes_copied_out, 12);
        assert!(!slot.wake_if_sleeping());
        slot.set_sleeping(true);
        assert!(slot.wake_if_sleeping());
    }
}
