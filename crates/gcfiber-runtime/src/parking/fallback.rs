//! Fallback parking using a mutex and condition variable
//!
//! Used on platforms without futex support.

use super::WorkerParking;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Condvar-based parking (fallback)
pub struct FallbackParking {
    /// Wake token
    token: Mutex<bool>,
    condvar: Condvar,
    parked: AtomicBool,
}

impl FallbackParking {
    /// Create a new fallback parker
    pub fn new() -> Self {
        Self {
            token: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicBool::new(false),
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut token = self.token.lock();
        if *token {
            *token = false;
            return true;
        }

        self.parked.store(true, Ordering::SeqCst);
        match timeout {
            Some(t) => {
                let deadline = Instant::now() + t;
                while !*token {
                    if self.condvar.wait_until(&mut token, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*token {
                    self.condvar.wait(&mut token);
                }
            }
        }
        self.parked.store(false, Ordering::SeqCst);

        std::mem::replace(&mut *token, false)
    }

    fn unpark(&self) {
        let mut token = self.token.lock();
        *token = true;
        self.condvar.notify_one();
    }

    fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Relaxed)
    }
}
