//! # gcfiber-runtime
//!
//! Worker threads, run-queues and task stacks for the gcfiber scheduler.
//!
//! ## Modules
//!
//! - `task` - Task control block, step protocol and per-step context
//! - `stack` - Dedicated and copy-stack regions
//! - `scheduler` - Per-pool scheduler and the worker loop
//! - `worker` - Worker threads and their counters
//! - `ready_queue` - Per-worker FIFO queues with stealing
//! - `parking` - Platform-specific worker sleep/wake
//! - `safepoint` - Stop-the-world coordination with the collector
//! - `affinity` - CPU pinning for exclusive mode
//! - `tls` - Thread-local worker and task identity

pub mod task;
pub mod stack;
pub mod scheduler;
pub mod worker;
pub mod ready_queue;
pub mod parking;
pub mod safepoint;
pub mod affinity;
pub mod tls;

pub use safepoint::{GcHook, MutatorScope, Safepoint};
pub use scheduler::{Scheduler, SpawnBuilder};
pub use stack::StackBuffer;
pub use task::{CancelOutcome, Step, Task, TaskContext, TaskHandle};
pub use worker::WorkerStats;
