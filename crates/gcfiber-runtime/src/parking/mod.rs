//! Worker parking mechanism
//!
//! Each worker owns one parker. Wake sources (spawn, resume, shutdown, the
//! end of a safepoint) call `unpark()` on the worker they want running.
//! Platform-specific implementations use the most efficient primitive available.

use std::time::Duration;

/// Per-worker sleep/wake primitive
///
/// Wakes are token based: an `unpark()` that arrives before `park()` is
/// remembered and makes the next `park()` return immediately.
pub trait WorkerParking: Send + Sync {
    /// Park the calling worker until unparked or timeout
    ///
    /// Returns:
    /// - `true` if a wake token was consumed
    /// - `false` on timeout or spurious wakeup
    ///
    /// Workers should re-check for work after returning regardless of return value.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Hand the worker a wake token, waking it if it is parked
    fn unpark(&self);

    /// Whether the worker is currently blocked in `park()` (hint, may be stale)
    fn is_parked(&self) -> bool;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parker
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}
