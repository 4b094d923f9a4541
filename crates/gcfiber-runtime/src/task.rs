//! Task control block
//!
//! A task is a resumable step function plus the state the scheduler keeps
//! for it: lifecycle state, its stack, a resumption point, the worker it
//! last ran on and a completion latch.

use crate::stack::{StackBuffer, TaskStack};
use gcfiber_core::constants::WORKER_NONE;
use gcfiber_core::{SchedResult, TaskId, TaskState};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a task asks the worker to do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Suspend and re-queue on the same worker
    Yield,
    /// Suspend until resumed, woken or cancelled
    Suspend,
    /// Finished
    Done,
}

/// Result of [`Scheduler::cancel`](crate::Scheduler::cancel)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was suspended and is now Done
    Cancelled,
    /// The task is runnable or running; it sees `is_cancelled()` on its next step
    Requested,
}

/// Task entry point, invoked once per run
pub type EntryFn = Box<dyn FnMut(&mut TaskContext<'_>) -> Step + Send>;

pub(crate) struct TaskBody {
    pub(crate) entry: Option<EntryFn>,
    pub(crate) stack: TaskStack,
    pub(crate) resume_point: u64,
}

/// Scheduler-side task record
pub struct Task {
    id: TaskId,
    pool: usize,
    state: AtomicU8,
    last_worker: AtomicUsize,
    sticky: Option<usize>,
    cancel_requested: AtomicBool,
    pub(crate) body: Mutex<TaskBody>,
    done: Mutex<bool>,
    done_cv: Condvar,
}

impl Task {
    pub(crate) fn new(pool: usize, entry: EntryFn, stack: TaskStack, sticky: Option<usize>) -> Self {
        Self {
            id: TaskId::next(),
            pool,
            state: AtomicU8::new(TaskState::Runnable as u8),
            last_worker: AtomicUsize::new(WORKER_NONE),
            sticky,
            cancel_requested: AtomicBool::new(false),
            body: Mutex::new(TaskBody {
                entry: Some(entry),
                stack,
                resume_point: 0,
            }),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn pool(&self) -> usize {
        self.pool
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from(self.state.load(Ordering::Acquire))
    }

    /// Atomically move from `from` to `to`; false if the task was elsewhere
    #[inline]
    pub(crate) fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Worker the task last ran on
    #[inline]
    pub fn last_worker(&self) -> Option<usize> {
        match self.last_worker.load(Ordering::Acquire) {
            WORKER_NONE => None,
            w => Some(w),
        }
    }

    /// Record that `worker` is about to run the task; returns the previous one
    #[inline]
    pub(crate) fn bind_worker(&self, worker: usize) -> Option<usize> {
        match self.last_worker.swap(worker, Ordering::AcqRel) {
            WORKER_NONE => None,
            w => Some(w),
        }
    }

    #[inline]
    pub fn sticky(&self) -> Option<usize> {
        self.sticky
    }

    /// Whether another worker may pick this task up
    #[inline]
    pub(crate) fn may_migrate(&self) -> bool {
        self.sticky.is_none()
    }

    #[inline]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel_requested
    }

    /// Drop the entry and stack, mark Done and release waiters
    pub(crate) fn complete(&self) {
        {
            let mut body = self.body.lock();
            body.entry = None;
            body.stack = TaskStack::Released;
        }
        self.set_state(TaskState::Done);
        let mut done = self.done.lock();
        *done = true;
        self.done_cv.notify_all();
    }

    /// Block until the task is Done
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.done_cv.wait(&mut done);
        }
    }

    /// Block until the task is Done or `timeout` elapses; true if Done
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.done_cv.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("state", &self.state())
            .field("last_worker", &self.last_worker())
            .field("sticky", &self.sticky)
            .finish()
    }
}

/// Shared handle to a spawned task
pub type TaskHandle = Arc<Task>;

/// View of the running task handed to its entry on every step
pub struct TaskContext<'a> {
    pub(crate) id: TaskId,
    pub(crate) worker: usize,
    pub(crate) stack: &'a mut StackBuffer,
    pub(crate) resume_point: &'a mut u64,
    pub(crate) cancelled: &'a AtomicBool,
}

impl<'a> TaskContext<'a> {
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Worker running this step
    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// The task's stack region (dedicated, or the worker's shared one)
    #[inline]
    pub fn stack(&mut self) -> &mut StackBuffer {
        self.stack
    }

    #[inline]
    pub fn push(&mut self, bytes: &[u8]) -> SchedResult<()> {
        self.stack.push(bytes)
    }

    #[inline]
    pub fn push_u64(&mut self, value: u64) -> SchedResult<()> {
        self.stack.push_u64(value)
    }

    #[inline]
    pub fn pop(&mut self, n: usize) -> Option<Vec<u8>> {
        self.stack.pop(n)
    }

    #[inline]
    pub fn pop_u64(&mut self) -> Option<u64> {
        self.stack.pop_u64()
    }

    #[inline]
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.stack.peek(n)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    #[inline]
    pub fn live(&self) -> &[u8] {
        self.stack.live()
    }

    /// Resumption point saved at the last suspend, zero on the first run
    #[inline]
    pub fn resume_point(&self) -> u64 {
        *self.resume_point
    }

    #[inline]
    pub fn set_resume_point(&mut self, point: u64) {
        *self.resume_point = point;
    }

    /// Cooperative cancellation flag
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn yield_now(&self) -> Step {
        Step::Yield
    }

    #[inline]
    pub fn suspend(&self) -> Step {
        Step::Suspend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::SavedStack;
    use std::thread;

    fn dummy() -> Task {
        Task::new(
            0,
            Box::new(|_| Step::Done),
            TaskStack::Copied(SavedStack::default()),
            None,
        )
    }

    #[test]
    fn test_transitions() {
        let task = dummy();
        assert_eq!(task.state(), TaskState::Runnable);
        assert!(task.transition(TaskState::Runnable, TaskState::Running));
        assert!(!task.transition(TaskState::Runnable, TaskState::Running));
        assert!(task.transition(TaskState::Running, TaskState::Suspended));
        assert_eq!(task.state(), TaskState::Suspended);
    }

    #[test]
    fn test_bind_worker() {
        let task = dummy();
        assert_eq!(task.last_worker(), None);
        assert_eq!(task.bind_worker(2), None);
        assert_eq!(task.bind_worker(1), Some(2));
        assert_eq!(task.last_worker(), Some(1));
    }

    #[test]
    fn test_complete_releases_waiters() {
        let task = Arc::new(dummy());
        assert!(!task.wait_timeout(Duration::from_millis(10)));

        let t = Arc::clone(&task);
        let waiter = thread::spawn(move || t.wait());
        task.complete();
        waiter.join().unwrap();

        assert!(task.state().is_done());
        assert!(task.body.lock().entry.is_none());
        assert!(matches!(task.body.lock().stack, TaskStack::Released));
    }

    #[test]
    fn test_context_accessors() {
        let mut stack = StackBuffer::new(64);
        let mut point = 0;
        let flag = AtomicBool::new(false);
        let mut cx = TaskContext {
            id: TaskId::new(9),
            worker: 1,
            stack: &mut stack,
            resume_point: &mut point,
            cancelled: &flag,
        };

        cx.push_u64(7).unwrap();
        cx.set_resume_point(3);
        assert_eq!(cx.depth(), 8);
        assert_eq!(cx.resume_point(), 3);
        assert!(!cx.is_cancelled());
        assert_eq!(cx.yield_now(), Step::Yield);
        assert_eq!(cx.suspend(), Step::Suspend);
        flag.store(true, Ordering::Release);
        assert!(cx.is_cancelled());
        assert_eq!(point, 3);
    }
}
