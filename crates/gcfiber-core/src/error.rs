//! Error types for configuration and scheduling

use crate::id::TaskId;
use crate::state::TaskState;
use thiserror::Error;

/// Result type for configuration resolution
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable holds a value that does not parse
    #[error("invalid value {value:?} for environment variable {var}")]
    InvalidEnv { var: &'static str, value: String },

    /// A compile-time switch holds a value the resolver does not know
    #[error("invalid compile-time switch {name} = {value:?}")]
    InvalidSwitch { name: &'static str, value: String },

    /// The assembled configuration is inconsistent
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

/// Errors that can occur in scheduler operations
///
/// These are precondition failures reported to the caller; nothing here is
/// retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// Resuming the task on this worker would migrate it, which is not allowed
    #[error("task {task} may not migrate from worker {from} to worker {to}")]
    MigrationDisallowed { task: TaskId, from: usize, to: usize },

    /// Resume requested for a task that is not suspended
    #[error("task {task} is {state}, not suspended")]
    NotSuspended { task: TaskId, state: TaskState },

    /// Invalid task state for operation
    #[error("task {task} is in invalid state {state} for this operation")]
    InvalidState { task: TaskId, state: TaskState },

    /// Stack push past the end of the task's stack region
    #[error("stack overflow: {requested} bytes requested, {available} available")]
    StackOverflow { requested: usize, available: usize },

    /// Worker index outside the pool
    #[error("worker {worker} does not exist (pool has {workers})")]
    InvalidWorker { worker: usize, workers: usize },

    /// Thread-pool index outside the configuration
    #[error("thread-pool {pool} does not exist ({pools} configured)")]
    InvalidPool { pool: usize, pools: usize },

    /// Task handed to a scheduler other than the one that spawned it
    #[error("task {task} belongs to thread-pool {pool}")]
    WrongPool { task: TaskId, pool: usize },

    /// Scheduler already shut down
    #[error("scheduler is shut down")]
    ShutDown,

    /// Worker thread error
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Worker thread related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// Failed to spawn worker thread
    #[error("failed to spawn worker thread")]
    SpawnFailed,

    /// Worker thread panicked
    #[error("worker thread panicked")]
    Panicked,

    /// Failed to set thread affinity
    #[error("failed to set thread affinity")]
    AffinityFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ConfigError::InvalidEnv {
            var: "GCF_NUM_THREADS",
            value: "four".into(),
        };
        assert_eq!(
            e.to_string(),
            "invalid value \"four\" for environment variable GCF_NUM_THREADS"
        );

        let e = SchedError::MigrationDisallowed {
            task: TaskId::new(3),
            from: 0,
            to: 2,
        };
        assert_eq!(e.to_string(), "task 3 may not migrate from worker 0 to worker 2");
    }

    #[test]
    fn test_error_conversion() {
        let sched_err: SchedError = WorkerError::SpawnFailed.into();
        assert!(matches!(sched_err, SchedError::Worker(WorkerError::SpawnFailed)));
        assert_eq!(sched_err.to_string(), "worker error: failed to spawn worker thread");
    }
}
