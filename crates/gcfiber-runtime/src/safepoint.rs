//! Stop-the-world safepoint
//!
//! Workers register as mutators for the duration of each task step. A
//! coordinator raises the request flag, waits until the mutator count drops
//! to zero, runs the collection and then releases everyone. Mutators that
//! try to enter while a request is up block until it ends.
//!
//! The runtime knows nothing about the heap; the collector is reached
//! through a [`GcHook`].

use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

thread_local! {
    /// Safepoints this thread is currently a mutator of, one entry per section
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Bridge from the scheduler to whatever owns the heap
pub trait GcHook: Send + Sync {
    /// Whether a collection should run at the next safepoint
    fn pending(&self) -> bool;

    /// Run one collection. Called with every mutator stopped.
    fn collect(&self);
}

/// Upper bound on one coordinator wait before re-checking the mutator count
const STOP_POLL: Duration = Duration::from_millis(1);

pub struct Safepoint {
    requested: AtomicBool,
    mutators: AtomicUsize,
    lock: Mutex<()>,
    cv_stopped: Condvar,
    cv_resume: Condvar,
}

impl Safepoint {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            mutators: AtomicUsize::new(0),
            lock: Mutex::new(()),
            cv_stopped: Condvar::new(),
            cv_resume: Condvar::new(),
        }
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Threads currently inside a mutator section
    #[inline]
    pub fn mutators(&self) -> usize {
        self.mutators.load(Ordering::SeqCst)
    }

    #[inline]
    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Whether the calling thread is inside a mutator section of this
    /// safepoint; stopping the world from there would wait on itself
    pub fn held_by_current_thread(&self) -> bool {
        let key = self.key();
        HELD.with(|held| held.borrow().contains(&key))
    }

    /// Start a mutator section, blocking while a collection is in progress
    pub fn enter_mutator(&self) {
        loop {
            self.mutators.fetch_add(1, Ordering::SeqCst);
            if !self.requested.load(Ordering::SeqCst) {
                let key = self.key();
                HELD.with(|held| held.borrow_mut().push(key));
                return;
            }
            self.mutators.fetch_sub(1, Ordering::SeqCst);
            self.notify_stopped();
            self.wait_until_resumed();
        }
    }

    /// End a mutator section
    pub fn exit_mutator(&self) {
        let key = self.key();
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&k| k == key) {
                held.swap_remove(pos);
            }
        });
        self.mutators.fetch_sub(1, Ordering::SeqCst);
        if self.requested.load(Ordering::SeqCst) {
            self.notify_stopped();
        }
    }

    /// Mutator section as a guard, for threads outside the worker pools
    pub fn scope(&self) -> MutatorScope<'_> {
        self.enter_mutator();
        MutatorScope { safepoint: self }
    }

    /// Called between steps: wait out a running collection, or start one
    /// if the hook says it is due
    pub fn poll(&self, hook: Option<&dyn GcHook>) {
        if self.is_requested() {
            self.wait_until_resumed();
            return;
        }
        if let Some(hook) = hook {
            if hook.pending() {
                self.try_stop_the_world(|| {
                    // Another coordinator may have collected while we raced
                    if hook.pending() {
                        hook.collect();
                    }
                });
            }
        }
    }

    /// Run `f` with every mutator stopped. If another coordinator already
    /// holds the safepoint, wait for it and return `None`.
    ///
    /// The caller must not be inside a mutator section.
    pub fn try_stop_the_world<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.wait_until_resumed();
            return None;
        }
        Some(self.run_stopped(f))
    }

    /// Run `f` with every mutator stopped, queueing behind any other
    /// coordinator.
    ///
    /// The caller must not be inside a mutator section.
    pub fn stop_the_world<R>(&self, f: impl FnOnce() -> R) -> R {
        while self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.wait_until_resumed();
        }
        self.run_stopped(f)
    }

    fn run_stopped<R>(&self, f: impl FnOnce() -> R) -> R {
        debug_assert!(!self.held_by_current_thread(), "stop_the_world inside a mutator section");
        {
            let mut guard = self.lock.lock();
            while self.mutators.load(Ordering::SeqCst) > 0 {
                self.cv_stopped.wait_for(&mut guard, STOP_POLL);
            }
        }
        tracing::trace!("safepoint reached");

        let result = f();

        let _guard = self.lock.lock();
        self.requested.store(false, Ordering::SeqCst);
        self.cv_resume.notify_all();
        result
    }

    fn notify_stopped(&self) {
        let _guard = self.lock.lock();
        self.cv_stopped.notify_all();
    }

    fn wait_until_resumed(&self) {
        let mut guard = self.lock.lock();
        while self.requested.load(Ordering::SeqCst) {
            self.cv_resume.wait(&mut guard);
        }
    }
}

impl Default for Safepoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`Safepoint::scope`]
pub struct MutatorScope<'a> {
    safepoint: &'a Safepoint,
}

impl Drop for MutatorScope<'_> {
    fn drop(&mut self) {
        self.safepoint.exit_mutator();
    }
}
