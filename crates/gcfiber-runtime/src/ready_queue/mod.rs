//! Ready queue abstraction for task scheduling
//!
//! # Implementations
//! - `LocalQueues` - one FIFO per worker, stealing from the front

mod local;

pub use local::LocalQueues;

use crate::task::TaskHandle;

/// Trait for ready queue implementations
///
/// All implementations must be thread-safe (Send + Sync).
pub trait ReadyQueue: Send + Sync {
    /// Append a runnable task to `worker`'s queue
    fn push(&self, worker: usize, task: TaskHandle);

    /// Take the front of `worker`'s own queue
    fn pop(&self, worker: usize) -> Option<TaskHandle>;

    /// Take the first migratable task from the front of another worker's
    /// queue, visiting victims in order after `thief`
    ///
    /// # Returns
    /// * `Some((victim, task))` - Work found
    /// * `None` - Nothing to steal
    fn steal(&self, thief: usize) -> Option<(usize, TaskHandle)>;

    /// Whether `steal(thief)` would find a task right now
    fn has_stealable(&self, thief: usize) -> bool;

    /// Remove every queued task (shutdown)
    fn drain(&self) -> Vec<TaskHandle>;

    /// Tasks queued on `worker`
    fn len_of(&self, worker: usize) -> usize;

    /// Approximate ready count (for diagnostics)
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
