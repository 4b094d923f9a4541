//! CPU affinity for exclusive mode
//!
//! Worker *i* of a pool whose workers start at global index `base` is
//! pinned to CPU `(base + i) % ncpu`.

use gcfiber_core::WorkerError;

/// CPU for a worker given its pool's first global worker index
#[inline]
pub fn cpu_for(base: usize, worker: usize, ncpu: usize) -> usize {
    (base + worker) % ncpu.max(1)
}

/// Number of CPUs available to this process
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Pin the calling thread to `cpu`
        pub fn pin_current_thread(cpu: usize) -> Result<(), WorkerError> {
            use nix::sched::{sched_setaffinity, CpuSet};
            use nix::unistd::Pid;

            let mut set = CpuSet::new();
            set.set(cpu).map_err(|_| WorkerError::AffinityFailed)?;
            sched_setaffinity(Pid::from_raw(0), &set).map_err(|_| WorkerError::AffinityFailed)
        }
    } else {
        /// Affinity is only supported on Linux
        pub fn pin_current_thread(_cpu: usize) -> Result<(), WorkerError> {
            Err(WorkerError::AffinityFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_for() {
        assert_eq!(cpu_for(0, 0, 4), 0);
        assert_eq!(cpu_for(0, 5, 4), 1);
        // Second pool continues where the first stopped
        assert_eq!(cpu_for(3, 1, 8), 4);
        assert_eq!(cpu_for(7, 2, 8), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pin_current_thread() {
        use nix::sched::{sched_getaffinity, CpuSet};
        use nix::unistd::Pid;

        let allowed = sched_getaffinity(Pid::from_raw(0)).unwrap();
        let cpu = (0..CpuSet::count())
            .find(|&c| allowed.is_set(c).unwrap_or(false))
            .unwrap();
        let handle = std::thread::spawn(move || pin_current_thread(cpu));
        assert!(handle.join().unwrap().is_ok());
    }
}
