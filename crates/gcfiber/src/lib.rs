//! # gcfiber - pooled GC heap with a copy-stack task scheduler
//!
//! ## Features
//!
//! - **Size-class pools**: small objects in fixed-slot pages, large objects
//!   on their own, cache-aligned past a threshold
//! - **Mark-sweep**: parallel marking, optional heap verification and
//!   poisoning of freed memory
//! - **Cooperative tasks**: step functions with their own stack region,
//!   dedicated or copied in and out of a per-worker shared stack
//! - **Migration**: suspended tasks may resume, or be stolen, on another
//!   worker of the same pool
//! - **Safepoints**: collections run only while no task step is executing
//!
//! ## Quick Start
//!
//! ```ignore
//! use gcfiber::{Runtime, Step};
//!
//! fn main() {
//!     gcfiber::logging::init();
//!     let runtime = Runtime::new(gcfiber::resolve_or_exit()).unwrap();
//!     let heap = runtime.heap().clone();
//!
//!     runtime
//!         .spawn(move |cx| {
//!             heap.allocate(64).unwrap();
//!             if cx.resume_point() == 3 {
//!                 return Step::Done;
//!             }
//!             cx.set_resume_point(cx.resume_point() + 1);
//!             cx.yield_now()
//!         })
//!         .unwrap();
//!
//!     runtime.wait_idle(std::time::Duration::from_secs(1));
//!     runtime.collect().unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Runtime                              │
//! │        spawn(), resume(), collect(), one heap               │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌──────────────────────┐   safepoint   ┌──────────────────────┐
//! │  Scheduler (pool 0)  │◄─────────────►│         Heap         │
//! │  Scheduler (pool 1)  │    GcHook     │ pools, large space,  │
//! │ workers, run-queues  │               │ collector            │
//! └──────────────────────┘               └──────────────────────┘
//! ```

pub mod logging;
mod hook;

// Re-export core types
pub use gcfiber_core::{
    ConfigError, ConfigResult, Configuration, CopyStacks, SchedError, SchedResult, TaskId,
    TaskState, VerifyMode, WorkerError,
};

// Re-export heap types
pub use gcfiber_heap::{
    CollectionStats, Heap, HeapError, HeapResult, HeapStats, LayoutId, Leaf, ObjectLayout,
    ObjectRef, RefSlots, RootId, Visitor,
};

// Re-export runtime types
pub use gcfiber_runtime::{
    CancelOutcome, GcHook, MutatorScope, Safepoint, Scheduler, SpawnBuilder, StackBuffer, Step,
    Task, TaskContext, TaskHandle, WorkerStats,
};

use gcfiber_runtime::tls;
use hook::HeapHook;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised by the runtime facade
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sched(#[from] SchedError),

    #[error(transparent)]
    Heap(#[from] HeapError),

    /// `collect` called by a thread holding a [`MutatorScope`]
    #[error("cannot collect while this thread holds a mutator scope")]
    MutatorScopeHeld,
}

/// Resolve the configuration from compile-time switches and the
/// environment, exiting the process with a message if it is invalid
pub fn resolve_or_exit() -> Configuration {
    match Configuration::resolve() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            eprintln!("gcfiber: {}", err);
            std::process::exit(1);
        }
    }
}

/// A heap plus one scheduler per configured thread-pool
///
/// Pool 0 is the default pool; pool 1, when configured, is the
/// interactive pool.
pub struct Runtime {
    config: Arc<Configuration>,
    heap: Arc<Heap>,
    safepoint: Arc<Safepoint>,
    pools: Vec<Scheduler>,
}

impl Runtime {
    /// Build from compile-time switches and the environment
    pub fn from_env() -> Result<Self, Error> {
        Self::new(Configuration::resolve()?)
    }

    /// Build from an explicit configuration
    pub fn new(config: Configuration) -> Result<Self, Error> {
        config.validate()?;
        config.log_summary();

        let config = Arc::new(config);
        let heap = Arc::new(Heap::new(Arc::clone(&config)));
        let safepoint = Arc::new(Safepoint::new());
        let hook: Arc<dyn GcHook> = Arc::new(HeapHook::new(Arc::clone(&heap)));

        let mut pools = Vec::with_capacity(config.threadpools.len());
        for pool in 0..config.threadpools.len() {
            pools.push(Scheduler::start_with(
                Arc::clone(&config),
                pool,
                Arc::clone(&safepoint),
                Some(Arc::clone(&hook)),
            )?);
        }

        Ok(Self {
            config,
            heap,
            safepoint,
            pools,
        })
    }

    #[inline]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    #[inline]
    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    #[inline]
    pub fn safepoint(&self) -> &Arc<Safepoint> {
        &self.safepoint
    }

    /// Scheduler of pool `index`
    #[inline]
    pub fn pool(&self, index: usize) -> Option<&Scheduler> {
        self.pools.get(index)
    }

    /// The default pool
    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.pools[0]
    }

    #[inline]
    pub fn num_pools(&self) -> usize {
        self.pools.len()
    }

    /// Spawn on the default pool
    pub fn spawn<F>(&self, entry: F) -> SchedResult<TaskHandle>
    where
        F: FnMut(&mut TaskContext<'_>) -> Step + Send + 'static,
    {
        self.scheduler().spawn(entry)
    }

    fn owner(&self, task: &TaskHandle) -> SchedResult<&Scheduler> {
        self.pool(task.pool()).ok_or(SchedError::InvalidPool {
            pool: task.pool(),
            pools: self.pools.len(),
        })
    }

    /// Resume a suspended task on `worker` of the pool that spawned it
    pub fn resume(&self, task: &TaskHandle, worker: usize) -> SchedResult<()> {
        self.owner(task)?.resume(task, worker)
    }

    /// Resume a suspended task on the worker it last ran on
    pub fn wake(&self, task: &TaskHandle) -> SchedResult<()> {
        self.owner(task)?.wake(task)
    }

    pub fn cancel(&self, task: &TaskHandle) -> SchedResult<CancelOutcome> {
        self.owner(task)?.cancel(task)
    }

    /// Run a collection now
    ///
    /// From inside a task this only raises the request; the worker collects
    /// once the step returns, and `Ok(None)` is returned. A thread holding a
    /// [`MutatorScope`] gets [`Error::MutatorScopeHeld`] instead of waiting
    /// on itself.
    pub fn collect(&self) -> Result<Option<CollectionStats>, Error> {
        if tls::in_task() {
            self.heap.request_collection();
            return Ok(None);
        }
        if self.safepoint.held_by_current_thread() {
            return Err(Error::MutatorScopeHeld);
        }
        let stats = self.safepoint.stop_the_world(|| self.heap.collect())?;
        Ok(Some(stats))
    }

    /// Enter a mutator section for heap access from a thread that is not
    /// a worker; collections wait until the scope ends
    pub fn mutator(&self) -> MutatorScope<'_> {
        self.safepoint.scope()
    }

    /// Wait until every pool has no live task; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.pools.iter().all(|pool| {
            let left = deadline.saturating_duration_since(Instant::now());
            pool.wait_idle(left)
        })
    }

    /// Stop every pool. The first failure is reported after all pools
    /// have been asked to stop.
    pub fn shutdown(&self) -> SchedResult<()> {
        let mut result = Ok(());
        for pool in &self.pools {
            if let Err(err) = pool.shutdown() {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(%err, "runtime shutdown failed");
        }
    }
}
