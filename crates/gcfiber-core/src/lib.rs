//! # gcfiber-core
//!
//! Core types shared by the gcfiber heap and task scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The heap lives in `gcfiber-heap`, workers and stacks in `gcfiber-runtime`.
//!
//! ## Modules
//!
//! - `id` - Task identifier type
//! - `state` - Task state enum
//! - `config` - Resolved, immutable runtime configuration
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod config;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use id::TaskId;
pub use state::TaskState;
pub use config::{Configuration, CopyStacks, VerifyMode};
pub use error::{ConfigError, ConfigResult, SchedError, SchedResult, WorkerError};

/// Constants for memory layout
pub mod constants {
    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Default GC page size (16 KB)
    pub const PAGE_SIZE: usize = 16 * 1024;

    /// Page size when the small-page switch is on (4 KB)
    pub const SMALL_PAGE_SIZE: usize = 4 * 1024;

    /// Smallest stack a task may be given
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Maximum workers (OS threads) per pool
    pub const MAX_WORKERS: usize = 256;

    /// No worker sentinel value
    pub const WORKER_NONE: usize = usize::MAX;
}
