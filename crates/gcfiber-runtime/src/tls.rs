//! Thread-local storage for worker context
//!
//! Provides fast access to the current pool, worker and running task.

use gcfiber_core::constants::WORKER_NONE;
use gcfiber_core::TaskId;
use std::cell::Cell;

thread_local! {
    /// Pool this OS thread works for
    static POOL_ID: Cell<usize> = const { Cell::new(WORKER_NONE) };

    /// Worker index within the pool
    static WORKER_ID: Cell<usize> = const { Cell::new(WORKER_NONE) };

    /// Task whose step is running on this thread
    static CURRENT_TASK: Cell<u64> = const { Cell::new(0) };
}

/// Mark this thread as worker `worker` of pool `pool`
#[inline]
pub fn set_worker(pool: usize, worker: usize) {
    POOL_ID.with(|cell| cell.set(pool));
    WORKER_ID.with(|cell| cell.set(worker));
}

/// Forget the worker identity (thread exit)
#[inline]
pub fn clear_worker() {
    set_worker(WORKER_NONE, WORKER_NONE);
}

/// `(pool, worker)` if this is a worker thread
#[inline]
pub fn current_worker() -> Option<(usize, usize)> {
    let worker = WORKER_ID.with(|cell| cell.get());
    if worker == WORKER_NONE {
        None
    } else {
        Some((POOL_ID.with(|cell| cell.get()), worker))
    }
}

#[inline]
pub(crate) fn set_current_task(id: TaskId) {
    CURRENT_TASK.with(|cell| cell.set(id.as_u64()));
}

#[inline]
pub(crate) fn clear_current_task() {
    CURRENT_TASK.with(|cell| cell.set(TaskId::NONE.as_u64()));
}

/// Task currently running on this thread
#[inline]
pub fn current_task() -> Option<TaskId> {
    TaskId::new(CURRENT_TASK.with(|cell| cell.get())).to_option()
}

/// Check if we're running inside a task step
#[inline]
pub fn in_task() -> bool {
    current_task().is_some()
}
