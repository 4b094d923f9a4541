//! Linux futex-based worker parking
//!
//! Futex word semantics:
//! - 0 = empty, no token, worker running
//! - 1 = worker parked (or about to be)
//! - 2 = wake token pending
//!
//! `park()` consumes a pending token or moves EMPTY -> PARKED and waits on
//! the word. `unpark()` swaps in NOTIFIED and issues FUTEX_WAKE only when it
//! replaced PARKED.

use super::WorkerParking;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const EMPTY: u32 = 0;
const PARKED: u32 = 1;
const NOTIFIED: u32 = 2;

/// Linux futex-based parking
pub struct FutexParking {
    futex: AtomicU32,
}

impl FutexParking {
    /// Create a new futex parker
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(EMPTY),
        }
    }

    fn futex_wait(&self, timeout: Option<Duration>) {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Sleeps only while the word is still PARKED. ETIMEDOUT, EAGAIN and
        // EINTR all land back in park(), which reads the word to decide.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                PARKED,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn futex_wake(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        // Fast path: token already pending
        if self
            .futex
            .compare_exchange(NOTIFIED, EMPTY, Ordering::Acquire, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }

        if self
            .futex
            .compare_exchange(EMPTY, PARKED, Ordering::Acquire, Ordering::Acquire)
            .is_err()
        {
            // Raced with unpark()
            self.futex.store(EMPTY, Ordering::Release);
            return true;
        }

        self.futex_wait(timeout);

        self.futex.swap(EMPTY, Ordering::Acquire) == NOTIFIED
    }

    fn unpark(&self) {
        if self.futex.swap(NOTIFIED, Ordering::Release) == PARKED {
            self.futex_wake();
        }
    }

    fn is_parked(&self) -> bool {
        self.futex.load(Ordering::Relaxed) == PARKED
    }
}
