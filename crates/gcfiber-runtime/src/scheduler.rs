//! Task scheduler
//!
//! One `Scheduler` drives one thread-pool. Each worker loops:
//!
//! 1. stop at the safepoint if a collection is pending
//! 2. pop the front of its own queue
//! 3. with migration enabled, steal the first migratable task from another
//!    worker of the pool
//! 4. otherwise spin with backoff, and park once idle for the configured
//!    sleep threshold
//!
//! Running a task means one call of its entry. Copy-stack tasks get their
//! saved frame copied into the worker's shared stack first and copied back
//! out when the step ends in a yield or suspend.

use crate::affinity;
use crate::ready_queue::{LocalQueues, ReadyQueue};
use crate::safepoint::{GcHook, Safepoint};
use crate::stack::{SavedStack, SharedStack, StackBuffer, TaskStack};
use crate::task::{CancelOutcome, EntryFn, Step, Task, TaskBody, TaskContext, TaskHandle};
use crate::tls;
use crate::worker::{WorkerPool, WorkerSlot, WorkerStats};

use crossbeam_utils::{Backoff, CachePadded};
use gcfiber_core::constants::MIN_STACK_SIZE;
use gcfiber_core::{Configuration, SchedError, SchedResult, TaskState};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single park before a worker re-checks its queue
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

/// State shared between a scheduler handle and its workers
struct Shared {
    config: Arc<Configuration>,
    pool: usize,
    /// Global index of this pool's first worker, for CPU pinning
    base_cpu: usize,
    workers: Vec<CachePadded<WorkerSlot>>,
    queues: Box<dyn ReadyQueue>,
    safepoint: Arc<Safepoint>,
    gc_hook: Option<Arc<dyn GcHook>>,
    shutdown: AtomicBool,
    /// Spawned tasks not yet Done
    live: AtomicUsize,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
    next_worker: AtomicUsize,
}

/// Scheduler for one thread-pool
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Mutex<WorkerPool>,
}

impl Scheduler {
    /// Start the workers of pool `pool` with a private safepoint and no
    /// collector attached
    pub fn start(config: Arc<Configuration>, pool: usize) -> SchedResult<Self> {
        Self::start_with(config, pool, Arc::new(Safepoint::new()), None)
    }

    /// Start the workers of pool `pool`, sharing `safepoint` with every
    /// other pool that mutates the same heap
    pub fn start_with(
        config: Arc<Configuration>,
        pool: usize,
        safepoint: Arc<Safepoint>,
        gc_hook: Option<Arc<dyn GcHook>>,
    ) -> SchedResult<Self> {
        let num_workers = *config
            .threadpools
            .get(pool)
            .filter(|&&n| n > 0)
            .ok_or(SchedError::InvalidPool {
                pool,
                pools: config.threadpools.len(),
            })?;
        let base_cpu = config.threadpools[..pool].iter().sum();

        let shared = Arc::new(Shared {
            pool,
            base_cpu,
            workers: (0..num_workers)
                .map(|_| CachePadded::new(WorkerSlot::new()))
                .collect(),
            queues: Box::new(LocalQueues::new(num_workers)),
            safepoint,
            gc_hook,
            shutdown: AtomicBool::new(false),
            live: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
            next_worker: AtomicUsize::new(0),
            config,
        });

        let mut threads = WorkerPool::new(pool, num_workers);
        let worker_shared = Arc::clone(&shared);
        if let Err(err) = threads.start(move |index| worker_shared.worker_main(index)) {
            shared.shutdown.store(true, Ordering::SeqCst);
            shared.wake_all();
            let _ = threads.join();
            return Err(err.into());
        }

        tracing::info!(
            pool,
            workers = num_workers,
            copy_stacks = ?shared.config.copy_stacks,
            migrate = shared.config.migrate_tasks,
            "scheduler started"
        );
        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// Spawn with per-task options
    pub fn builder(&self) -> SpawnBuilder<'_> {
        SpawnBuilder {
            scheduler: self,
            stack_size: None,
            sticky: None,
            worker: None,
        }
    }

    /// Spawn a task with default options
    pub fn spawn<F>(&self, entry: F) -> SchedResult<TaskHandle>
    where
        F: FnMut(&mut TaskContext<'_>) -> Step + Send + 'static,
    {
        self.builder().spawn(entry)
    }

    fn spawn_task(
        &self,
        entry: EntryFn,
        stack_size: Option<usize>,
        sticky: Option<usize>,
        worker: Option<usize>,
    ) -> SchedResult<TaskHandle> {
        let shared = &self.shared;
        if shared.is_shutdown() {
            return Err(SchedError::ShutDown);
        }
        for w in sticky.iter().chain(worker.iter()) {
            shared.check_worker(*w)?;
        }

        let config = &shared.config;
        let stack = if config.copy_stacks.applies_to(stack_size.is_some()) {
            TaskStack::Copied(SavedStack::default())
        } else {
            let size = stack_size.unwrap_or(config.stack_size).max(MIN_STACK_SIZE);
            TaskStack::Dedicated(StackBuffer::new(size))
        };

        let target = sticky
            .or(worker)
            .unwrap_or_else(|| shared.next_worker.fetch_add(1, Ordering::Relaxed) % shared.workers.len());
        let task = Arc::new(Task::new(shared.pool, entry, stack, sticky));
        shared.live.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(pool = shared.pool, task = %task.id(), worker = target, "task spawned");

        shared.enqueue(target, Arc::clone(&task));
        Ok(task)
    }

    /// Make a suspended task runnable on `worker`
    ///
    /// Resuming on a worker other than the one the task last ran on is a
    /// migration, refused when migration is disabled or the task is sticky.
    pub fn resume(&self, task: &TaskHandle, worker: usize) -> SchedResult<()> {
        let shared = &self.shared;
        if shared.is_shutdown() {
            return Err(SchedError::ShutDown);
        }
        if task.pool() != shared.pool {
            return Err(SchedError::WrongPool {
                task: task.id(),
                pool: task.pool(),
            });
        }
        shared.check_worker(worker)?;

        let state = task.state();
        if state != TaskState::Suspended {
            return Err(SchedError::NotSuspended {
                task: task.id(),
                state,
            });
        }
        if let Some(from) = task.last_worker() {
            if from != worker && (!shared.config.migrate_tasks || task.sticky().is_some()) {
                return Err(SchedError::MigrationDisallowed {
                    task: task.id(),
                    from,
                    to: worker,
                });
            }
        }
        if !task.transition(TaskState::Suspended, TaskState::Runnable) {
            return Err(SchedError::NotSuspended {
                task: task.id(),
                state: task.state(),
            });
        }

        tracing::trace!(pool = shared.pool, task = %task.id(), worker, "task resumed");
        shared.enqueue(worker, Arc::clone(task));
        Ok(())
    }

    /// Resume a suspended task on the worker it last ran on
    pub fn wake(&self, task: &TaskHandle) -> SchedResult<()> {
        match task.last_worker() {
            Some(worker) => self.resume(task, worker),
            None => Err(SchedError::NotSuspended {
                task: task.id(),
                state: task.state(),
            }),
        }
    }

    /// Cancel a task
    ///
    /// A suspended task is finished on the spot. A runnable or running task
    /// only gets the request flag, which it observes through
    /// [`TaskContext::is_cancelled`].
    pub fn cancel(&self, task: &TaskHandle) -> SchedResult<CancelOutcome> {
        loop {
            match task.state() {
                TaskState::Suspended => {
                    if task.transition(TaskState::Suspended, TaskState::Done) {
                        task.request_cancel();
                        self.shared.finish(task);
                        tracing::debug!(task = %task.id(), "suspended task cancelled");
                        return Ok(CancelOutcome::Cancelled);
                    }
                }
                TaskState::Runnable | TaskState::Running => {
                    task.request_cancel();
                    return Ok(CancelOutcome::Requested);
                }
                state @ TaskState::Done => {
                    return Err(SchedError::InvalidState {
                        task: task.id(),
                        state,
                    })
                }
            }
        }
    }

    /// Stop and join the workers
    ///
    /// Queued tasks are finished without running again. Suspended tasks
    /// stay suspended.
    pub fn shutdown(&self) -> SchedResult<()> {
        let shared = &self.shared;
        if shared.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        shared.wake_all();
        let joined = self.threads.lock().join();

        let dropped = shared.queues.drain();
        for task in &dropped {
            if task.transition(TaskState::Runnable, TaskState::Done) {
                shared.finish(task);
            }
        }
        tracing::info!(pool = shared.pool, dropped = dropped.len(), "scheduler stopped");
        joined.map_err(SchedError::from)
    }

    /// Wait until every spawned task is Done; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let deadline = Instant::now() + timeout;
        let mut guard = shared.idle_lock.lock();
        while shared.live.load(Ordering::SeqCst) > 0 {
            if shared.idle_cv.wait_until(&mut guard, deadline).timed_out() {
                return shared.live.load(Ordering::SeqCst) == 0;
            }
        }
        true
    }

    #[inline]
    pub fn pool(&self) -> usize {
        self.shared.pool
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.shared.workers.len()
    }

    /// Spawned tasks not yet Done
    #[inline]
    pub fn live_tasks(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Tasks waiting in run-queues
    #[inline]
    pub fn queued(&self) -> usize {
        self.shared.queues.len()
    }

    pub fn worker_stats(&self, worker: usize) -> Option<WorkerStats> {
        self.shared.workers.get(worker).map(|slot| slot.stats())
    }

    #[inline]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.shared.config
    }

    #[inline]
    pub fn safepoint(&self) -> &Arc<Safepoint> {
        &self.shared.safepoint
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(pool = self.shared.pool, %err, "scheduler shutdown failed");
        }
    }
}

/// Per-task spawn options
pub struct SpawnBuilder<'a> {
    scheduler: &'a Scheduler,
    stack_size: Option<usize>,
    sticky: Option<usize>,
    worker: Option<usize>,
}

impl<'a> SpawnBuilder<'a> {
    /// Request a dedicated stack of `bytes`
    ///
    /// Under `CopyStacks::Enabled` this also opts the task out of copy-stack.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Pin the task to `worker`; it never migrates
    pub fn sticky(mut self, worker: usize) -> Self {
        self.sticky = Some(worker);
        self
    }

    /// Queue the first run on `worker`
    pub fn on_worker(mut self, worker: usize) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn spawn<F>(self, entry: F) -> SchedResult<TaskHandle>
    where
        F: FnMut(&mut TaskContext<'_>) -> Step + Send + 'static,
    {
        self.scheduler
            .spawn_task(Box::new(entry), self.stack_size, self.sticky, self.worker)
    }
}

impl Shared {
    #[inline]
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn check_worker(&self, worker: usize) -> SchedResult<()> {
        if worker < self.workers.len() {
            Ok(())
        } else {
            Err(SchedError::InvalidWorker {
                worker,
                workers: self.workers.len(),
            })
        }
    }

    /// Queue a runnable task and make sure someone will pick it up
    fn enqueue(&self, worker: usize, task: TaskHandle) {
        let stealable = self.config.migrate_tasks && task.may_migrate();
        self.queues.push(worker, task);
        if self.workers[worker].wake_if_sleeping() || !stealable {
            return;
        }
        if let Some(slot) = self.workers.iter().find(|slot| slot.is_sleeping()) {
            slot.parker().unpark();
        }
    }

    fn wake_all(&self) {
        for slot in &self.workers {
            slot.parker().unpark();
        }
    }

    fn finish(&self, task: &Task) {
        task.complete();
        tracing::trace!(pool = self.pool, task = %task.id(), "task done");
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle_cv.notify_all();
        }
    }

    fn gc_pending(&self) -> bool {
        self.gc_hook.as_ref().is_some_and(|hook| hook.pending())
    }

    fn worker_main(&self, index: usize) {
        tls::set_worker(self.pool, index);
        if self.config.exclusive {
            let cpu = affinity::cpu_for(self.base_cpu, index, affinity::available_cpus());
            match affinity::pin_current_thread(cpu) {
                Ok(()) => tracing::debug!(pool = self.pool, worker = index, cpu, "worker pinned"),
                Err(err) => {
                    tracing::warn!(pool = self.pool, worker = index, cpu, %err, "failed to pin worker")
                }
            }
        }
        tracing::debug!(pool = self.pool, worker = index, "worker started");

        let slot = &self.workers[index];
        let mut shared_stack: Option<SharedStack> = None;
        let backoff = Backoff::new();
        let mut idle_since: Option<Instant> = None;

        while !self.is_shutdown() {
            self.safepoint.poll(self.gc_hook.as_deref());

            match self.next_task(index) {
                Some(task) => {
                    if let Some(since) = idle_since.take() {
                        slot.record_idle(since.elapsed());
                    }
                    backoff.reset();
                    self.run_task(index, &mut shared_stack, task);
                }
                None => {
                    let since = *idle_since.get_or_insert_with(Instant::now);
                    match self.config.thread_sleep_threshold {
                        Some(threshold) if since.elapsed() >= threshold => {
                            self.park_worker(index);
                            slot.record_idle(since.elapsed());
                            idle_since = None;
                            backoff.reset();
                        }
                        _ => backoff.snooze(),
                    }
                }
            }
        }

        tls::clear_worker();
        tracing::debug!(pool = self.pool, worker = index, stats = ?slot.stats(), "worker stopped");
    }

    fn next_task(&self, index: usize) -> Option<TaskHandle> {
        if let Some(task) = self.queues.pop(index) {
            return Some(task);
        }
        if !self.config.migrate_tasks {
            return None;
        }
        let (victim, task) = self.queues.steal(index)?;
        self.workers[index].record_steal();
        tracing::trace!(pool = self.pool, worker = index, victim, task = %task.id(), "task stolen");
        Some(task)
    }

    /// Whether `next_task` could take something right now
    fn has_work_for(&self, index: usize) -> bool {
        self.queues.len_of(index) > 0
            || (self.config.migrate_tasks && self.queues.has_stealable(index))
    }

    fn park_worker(&self, index: usize) {
        let slot = &self.workers[index];
        slot.set_sleeping(true);
        // An enqueue that missed the flag must be visible to this re-check
        if self.has_work_for(index) || self.is_shutdown() || self.gc_pending() {
            slot.set_sleeping(false);
            return;
        }

        slot.record_park();
        tracing::trace!(pool = self.pool, worker = index, "worker parked");
        let woken = slot.parker().park(Some(PARK_TIMEOUT));
        slot.set_sleeping(false);
        tracing::trace!(pool = self.pool, worker = index, woken, "worker unparked");
    }

    fn run_task(&self, index: usize, shared_stack: &mut Option<SharedStack>, task: TaskHandle) {
        if !task.transition(TaskState::Runnable, TaskState::Running) {
            return;
        }
        if let Some(from) = task.bind_worker(index) {
            if from != index {
                tracing::debug!(pool = self.pool, task = %task.id(), from, to = index, "task migrated");
            }
        }
        self.workers[index].record_step();

        match self.step_task(index, shared_stack, &task) {
            Step::Yield => {
                task.set_state(TaskState::Runnable);
                self.queues.push(index, task);
            }
            Step::Suspend => {
                task.set_state(TaskState::Suspended);
                tracing::trace!(pool = self.pool, task = %task.id(), "task suspended");
            }
            Step::Done => self.finish(&task),
        }
    }

    /// One call of the task's entry on the right stack region
    fn step_task(&self, index: usize, shared_stack: &mut Option<SharedStack>, task: &Task) -> Step {
        let slot = &self.workers[index];
        let mut body = task.body.lock();
        let TaskBody {
            entry,
            stack,
            resume_point,
        } = &mut *body;
        let Some(entry) = entry.as_mut() else {
            return Step::Done;
        };

        let region: &mut StackBuffer = match &mut *stack {
            TaskStack::Dedicated(buf) => buf,
            TaskStack::Copied(saved) => {
                let shared = shared_stack.get_or_insert_with(|| SharedStack::new(self.config.stack_size));
                match shared.load(task.id(), saved) {
                    Ok(copied) => slot.record_copy_in(copied),
                    Err(err) => {
                        tracing::error!(task = %task.id(), %err, "cannot restore task stack");
                        return Step::Done;
                    }
                }
                shared.buffer()
            }
            TaskStack::Released => return Step::Done,
        };

        let mut cx = TaskContext {
            id: task.id(),
            worker: index,
            stack: region,
            resume_point,
            cancelled: task.cancel_flag(),
        };

        tls::set_current_task(task.id());
        self.safepoint.enter_mutator();
        let result = panic::catch_unwind(AssertUnwindSafe(|| entry(&mut cx)));
        self.safepoint.exit_mutator();
        tls::clear_current_task();

        let step = match result {
            Ok(step) => step,
            Err(payload) => {
                tracing::warn!(
                    pool = self.pool,
                    worker = index,
                    task = %task.id(),
                    reason = panic_message(payload.as_ref()),
                    "task panicked"
                );
                Step::Done
            }
        };

        if let (TaskStack::Copied(saved), Some(shared)) = (&mut *stack, shared_stack.as_mut()) {
            if step == Step::Done {
                shared.release(task.id());
            } else {
                slot.record_copy_out(shared.save(task.id(), saved));
            }
        }
        step
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
