//! Runtime configuration
//!
//! Compile-time switches with runtime environment overrides, resolved once
//! into an immutable [`Configuration`] that every component receives by
//! reference. Nothing reads the environment after startup.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's gcf_config.rs (compile-time, via `GCF_CONFIG_RS`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use gcfiber_core::config::Configuration;
//!
//! // Compiled defaults with env overrides
//! let config = Configuration::resolve()?;
//!
//! // Or customize programmatically (tests, embedders)
//! let config = Configuration::new()
//!     .num_threads(4)
//!     .copy_stacks(CopyStacks::Always);
//! ```

pub mod defaults;
#[cfg(test)]
mod switches;

use crate::constants::{MAX_WORKERS, MIN_STACK_SIZE, PAGE_SIZE, SMALL_PAGE_SIZE};
use crate::env::{env_lookup, parse_byte_size, parse_count, parse_count_list, parse_flag};
use crate::error::{ConfigError, ConfigResult};
use std::fmt;
use std::time::Duration;

/// Nanoseconds a worker polls before parking
pub const THREAD_SLEEP_THRESHOLD_NAME: &str = "GCF_THREAD_SLEEP_THRESHOLD";
/// Number of workers ("N", "N,M" or "auto")
pub const NUM_THREADS_NAME: &str = "GCF_NUM_THREADS";
/// Thread-pool specification ("N" or "N,M"), overrides the thread count
pub const THREADPOOLS_NAME: &str = "GCF_THREADPOOLS";
/// Threads taking part in marking
pub const NUM_GC_THREADS_NAME: &str = "GCF_NUM_GC_THREADS";
/// Advisory heap ceiling
pub const HEAP_SIZE_HINT_NAME: &str = "GCF_HEAP_SIZE_HINT";
/// Exclusive CPU affinity for workers
pub const MACHINE_EXCLUSIVE_NAME: &str = "GCF_EXCLUSIVE";

/// Stack switching strategy for tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStacks {
    /// Every task gets a dedicated stack
    Disabled,
    /// Tasks without an explicit stack size share the worker's stack by copying
    Enabled,
    /// Every task shares the worker's stack by copying
    Always,
}

impl CopyStacks {
    /// Parse the textual form used by the compile-time switch
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "disabled" | "0" => Some(CopyStacks::Disabled),
            "on" | "enabled" | "1" => Some(CopyStacks::Enabled),
            "always" => Some(CopyStacks::Always),
            _ => None,
        }
    }

    /// Whether a newly spawned task uses the copy-stack strategy
    #[inline]
    pub fn applies_to(self, explicit_stack_size: bool) -> bool {
        match self {
            CopyStacks::Disabled => false,
            CopyStacks::Enabled => !explicit_stack_size,
            CopyStacks::Always => true,
        }
    }
}

/// Heap verification performed by the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerifyMode {
    /// Plain mark-sweep
    Off,
    /// Mark-sweep with header checks before marking and after sweeping
    Quick,
    /// Quick checks plus a second independent trace compared against the first
    Full,
}

impl VerifyMode {
    /// Parse the textual form used by the compile-time switch
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Some(VerifyMode::Off),
            "quick" => Some(VerifyMode::Quick),
            "full" | "1" => Some(VerifyMode::Full),
            _ => None,
        }
    }
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::Off => write!(f, "off"),
            VerifyMode::Quick => write!(f, "quick"),
            VerifyMode::Full => write!(f, "full"),
        }
    }
}

/// Immutable configuration shared by the heap and every scheduler.
///
/// Use [`Configuration::resolve`] at process start; the builder methods exist
/// so tests and embedders can exercise both sides of every switch in one
/// build.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Requests of this many bytes or more bypass the pools
    pub large_object_threshold: usize,
    /// Large objects of this many bytes or more are cache-line aligned
    pub cache_align_threshold: usize,
    /// Size of one pool page
    pub page_size: usize,
    /// Default stack size for tasks with a dedicated stack, and size of each
    /// worker's shared stack
    pub stack_size: usize,
    /// Stack switching strategy
    pub copy_stacks: CopyStacks,
    /// Allow a suspended task to resume on a different worker
    pub migrate_tasks: bool,
    /// How long an idle worker polls before parking (`None` = never park)
    pub thread_sleep_threshold: Option<Duration>,
    /// Worker count per thread-pool; index 0 is the default pool
    pub threadpools: Vec<usize>,
    /// Threads taking part in marking
    pub gc_threads: usize,
    /// Advisory heap ceiling in bytes
    pub heap_size_hint: Option<u64>,
    /// Pin workers to CPUs
    pub exclusive: bool,
    /// Collector verification
    pub verify: VerifyMode,
    /// Poison freed memory and check the poison on reuse
    pub debug_fill: bool,
    /// Validate headers of objects pushed on the mark work-list
    pub parent_validity: bool,
    /// Bytes allocated between automatic collections
    pub collect_interval: usize,
    /// Log collector totals when the heap is dropped
    pub final_stats: bool,
    /// Log pool and large-object summaries after every collection
    pub memprofile: bool,
    /// Log the duration of each collector phase
    pub gc_time: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    /// Resolve from compile-time switches and the process environment.
    ///
    /// Environment variables (all optional):
    /// - `GCF_THREAD_SLEEP_THRESHOLD` - ns before parking, or `infinite`
    /// - `GCF_NUM_THREADS` - `N`, `N,M` or `auto`
    /// - `GCF_THREADPOOLS` - `N` or `N,M` (default pool, interactive pool)
    /// - `GCF_NUM_GC_THREADS` - marking threads
    /// - `GCF_HEAP_SIZE_HINT` - bytes, with optional k/m/g/t suffix
    /// - `GCF_EXCLUSIVE` - non-zero pins workers to CPUs
    pub fn resolve() -> ConfigResult<Self> {
        Self::resolve_with(env_lookup)
    }

    /// Resolve using an arbitrary variable lookup.
    pub fn resolve_with<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::compiled()?;

        config.thread_sleep_threshold = match lookup(THREAD_SLEEP_THRESHOLD_NAME) {
            Some(raw) if raw.trim().eq_ignore_ascii_case("infinite") => None,
            _ => match parse_count::<u64, _>(&lookup, THREAD_SLEEP_THRESHOLD_NAME)? {
                Some(ns) => Some(Duration::from_nanos(ns)),
                None => config.thread_sleep_threshold,
            },
        };

        let pools = match parse_count_list(&lookup, THREADPOOLS_NAME)? {
            Some(pools) => Some((THREADPOOLS_NAME, pools)),
            None => match lookup(NUM_THREADS_NAME) {
                Some(raw) if raw.trim().eq_ignore_ascii_case("auto") => {
                    Some((NUM_THREADS_NAME, vec![available_cpus()]))
                }
                _ => parse_count_list(&lookup, NUM_THREADS_NAME)?
                    .map(|pools| (NUM_THREADS_NAME, pools)),
            },
        };
        if let Some((var, mut pools)) = pools {
            if pools.is_empty() || pools.len() > 2 {
                return Err(ConfigError::InvalidEnv {
                    var,
                    value: lookup(var).unwrap_or_default(),
                });
            }
            if pools.len() == 2 && pools[1] == 0 {
                pools.truncate(1);
            }
            config.threadpools = pools;
        }

        config.gc_threads = match parse_count::<usize, _>(&lookup, NUM_GC_THREADS_NAME)? {
            Some(n) => n.max(1),
            None => default_gc_threads(config.threadpools[0]),
        };

        if let Some(hint) = parse_byte_size(&lookup, HEAP_SIZE_HINT_NAME)? {
            config.heap_size_hint = (hint > 0).then_some(hint);
        }

        if let Some(exclusive) = parse_flag(&lookup, MACHINE_EXCLUSIVE_NAME)? {
            config.exclusive = exclusive;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create config from compile-time defaults only (no env override).
    ///
    /// # Panics
    ///
    /// If a textual compile-time switch is malformed; [`Configuration::resolve`]
    /// reports the same condition as an error.
    pub fn new() -> Self {
        match Self::compiled() {
            Ok(config) => config,
            Err(e) => panic!("{}", e),
        }
    }

    fn compiled() -> ConfigResult<Self> {
        let copy_stacks = CopyStacks::parse(defaults::COPY_STACKS).ok_or_else(|| {
            ConfigError::InvalidSwitch {
                name: "COPY_STACKS",
                value: defaults::COPY_STACKS.to_string(),
            }
        })?;
        let verify = VerifyMode::parse(defaults::GC_VERIFY).ok_or_else(|| {
            ConfigError::InvalidSwitch {
                name: "GC_VERIFY",
                value: defaults::GC_VERIFY.to_string(),
            }
        })?;

        Ok(Self {
            large_object_threshold: defaults::LARGE_OBJECT_THRESHOLD,
            cache_align_threshold: defaults::CACHE_ALIGN_THRESHOLD,
            page_size: if defaults::GC_SMALL_PAGE {
                SMALL_PAGE_SIZE
            } else {
                PAGE_SIZE
            },
            stack_size: defaults::STACK_SIZE,
            copy_stacks,
            migrate_tasks: defaults::MIGRATE_TASKS,
            thread_sleep_threshold: Some(Duration::from_nanos(
                defaults::DEFAULT_THREAD_SLEEP_THRESHOLD_NS,
            )),
            threadpools: vec![defaults::NUM_THREADS],
            gc_threads: default_gc_threads(defaults::NUM_THREADS),
            heap_size_hint: None,
            exclusive: defaults::MACHINE_EXCLUSIVE,
            verify,
            debug_fill: defaults::MEMDEBUG,
            parent_validity: defaults::GC_ASSERT_PARENT_VALIDITY,
            collect_interval: defaults::DEFAULT_COLLECT_INTERVAL,
            final_stats: defaults::GC_FINAL_STATS,
            memprofile: defaults::MEMPROFILE,
            gc_time: defaults::GC_TIME,
        })
    }

    // Builder methods

    pub fn large_object_threshold(mut self, bytes: usize) -> Self {
        self.large_object_threshold = bytes;
        self
    }

    pub fn cache_align_threshold(mut self, bytes: usize) -> Self {
        self.cache_align_threshold = bytes;
        self
    }

    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn copy_stacks(mut self, mode: CopyStacks) -> Self {
        self.copy_stacks = mode;
        self
    }

    pub fn migrate_tasks(mut self, allow: bool) -> Self {
        self.migrate_tasks = allow;
        self
    }

    pub fn thread_sleep_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.thread_sleep_threshold = threshold;
        self
    }

    /// Set the default pool's worker count (keeps other pools)
    pub fn num_threads(mut self, n: usize) -> Self {
        match self.threadpools.first_mut() {
            Some(default_pool) => *default_pool = n,
            None => self.threadpools.push(n),
        }
        self
    }

    pub fn threadpools(mut self, pools: Vec<usize>) -> Self {
        self.threadpools = pools;
        self
    }

    pub fn gc_threads(mut self, n: usize) -> Self {
        self.gc_threads = n.max(1);
        self
    }

    pub fn heap_size_hint(mut self, bytes: Option<u64>) -> Self {
        self.heap_size_hint = bytes;
        self
    }

    pub fn exclusive(mut self, enable: bool) -> Self {
        self.exclusive = enable;
        self
    }

    pub fn verify(mut self, mode: VerifyMode) -> Self {
        self.verify = mode;
        self
    }

    pub fn debug_fill(mut self, enable: bool) -> Self {
        self.debug_fill = enable;
        self
    }

    pub fn parent_validity(mut self, enable: bool) -> Self {
        self.parent_validity = enable;
        self
    }

    pub fn collect_interval(mut self, bytes: usize) -> Self {
        self.collect_interval = bytes;
        self
    }

    pub fn final_stats(mut self, enable: bool) -> Self {
        self.final_stats = enable;
        self
    }

    pub fn memprofile(mut self, enable: bool) -> Self {
        self.memprofile = enable;
        self
    }

    pub fn gc_time(mut self, enable: bool) -> Self {
        self.gc_time = enable;
        self
    }

    /// Total workers across all pools
    pub fn total_workers(&self) -> usize {
        self.threadpools.iter().sum()
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.threadpools.is_empty() || self.threadpools[0] == 0 {
            return Err(ConfigError::InvalidValue("default thread-pool needs at least 1 worker"));
        }
        if self.threadpools.iter().any(|&n| n > MAX_WORKERS) {
            return Err(ConfigError::InvalidValue("thread-pool exceeds the maximum worker count"));
        }
        if !self.page_size.is_power_of_two() || self.page_size < SMALL_PAGE_SIZE {
            return Err(ConfigError::InvalidValue("page_size must be a power of two >= 4KB"));
        }
        if self.large_object_threshold < 16 || self.large_object_threshold > self.page_size / 2 {
            return Err(ConfigError::InvalidValue(
                "large_object_threshold must be within [16, page_size / 2]",
            ));
        }
        if self.cache_align_threshold < self.large_object_threshold {
            return Err(ConfigError::InvalidValue(
                "cache_align_threshold must be >= large_object_threshold",
            ));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 16KB"));
        }
        if self.gc_threads == 0 {
            return Err(ConfigError::InvalidValue("gc_threads must be > 0"));
        }
        Ok(())
    }

    /// Log the configuration (for debugging)
    pub fn log_summary(&self) {
        tracing::info!(
            large_object_threshold = self.large_object_threshold,
            cache_align_threshold = self.cache_align_threshold,
            page_size = self.page_size,
            stack_size = self.stack_size,
            copy_stacks = ?self.copy_stacks,
            migrate_tasks = self.migrate_tasks,
            thread_sleep_threshold = ?self.thread_sleep_threshold,
            threadpools = ?self.threadpools,
            gc_threads = self.gc_threads,
            heap_size_hint = ?self.heap_size_hint,
            exclusive = self.exclusive,
            verify = %self.verify,
            debug_fill = self.debug_fill,
            parent_validity = self.parent_validity,
            "gcfiber configuration"
        );
    }
}

fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_WORKERS)
}

fn default_gc_threads(workers: usize) -> usize {
    (workers / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = Configuration::resolve_with(vars(&[])).unwrap();
        assert_eq!(config, Configuration::new());
        assert_eq!(
            config.thread_sleep_threshold,
            Some(Duration::from_nanos(defaults::DEFAULT_THREAD_SLEEP_THRESHOLD_NS))
        );
        assert_eq!(config.threadpools, vec![defaults::NUM_THREADS]);
        assert_eq!(config.heap_size_hint, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = Configuration::resolve_with(vars(&[
            (THREAD_SLEEP_THRESHOLD_NAME, "5000"),
            (NUM_THREADS_NAME, "4,1"),
            (NUM_GC_THREADS_NAME, "3"),
            (HEAP_SIZE_HINT_NAME, "64M"),
            (MACHINE_EXCLUSIVE_NAME, "1"),
        ]))
        .unwrap();

        assert_eq!(config.thread_sleep_threshold, Some(Duration::from_nanos(5000)));
        assert_eq!(config.threadpools, vec![4, 1]);
        assert_eq!(config.total_workers(), 5);
        assert_eq!(config.gc_threads, 3);
        assert_eq!(config.heap_size_hint, Some(64 << 20));
        assert!(config.exclusive);
    }

    #[test]
    fn test_infinite_sleep_threshold() {
        let config =
            Configuration::resolve_with(vars(&[(THREAD_SLEEP_THRESHOLD_NAME, "Infinite")]))
                .unwrap();
        assert_eq!(config.thread_sleep_threshold, None);
    }

    #[test]
    fn test_threadpools_wins_over_num_threads() {
        let config = Configuration::resolve_with(vars(&[
            (NUM_THREADS_NAME, "8"),
            (THREADPOOLS_NAME, "2,0"),
        ]))
        .unwrap();
        assert_eq!(config.threadpools, vec![2]);
        assert_eq!(config.gc_threads, 1);
    }

    #[test]
    fn test_auto_thread_count() {
        let config = Configuration::resolve_with(vars(&[(NUM_THREADS_NAME, "auto")])).unwrap();
        assert!(config.threadpools[0] >= 1);
    }

    #[test]
    fn test_malformed_values_fail_fast() {
        for (var, value) in [
            (THREAD_SLEEP_THRESHOLD_NAME, "soon"),
            (NUM_THREADS_NAME, "-1"),
            (NUM_THREADS_NAME, "1,2,3"),
            (THREADPOOLS_NAME, "x"),
            (NUM_GC_THREADS_NAME, "1.5"),
            (HEAP_SIZE_HINT_NAME, "lots"),
            (MACHINE_EXCLUSIVE_NAME, "true"),
        ] {
            let result = Configuration::resolve_with(vars(&[(var, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidEnv { .. })),
                "{}={} should be rejected, got {:?}",
                var,
                value,
                result
            );
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = Configuration::resolve_with(vars(&[(NUM_THREADS_NAME, "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_builder() {
        let config = Configuration::new()
            .num_threads(3)
            .copy_stacks(CopyStacks::Always)
            .migrate_tasks(false)
            .verify(VerifyMode::Full);

        assert_eq!(config.threadpools[0], 3);
        assert_eq!(config.copy_stacks, CopyStacks::Always);

        // An emptied pool list gets its default pool back
        let config = Configuration::new().threadpools(vec![2, 4]).num_threads(5);
        assert_eq!(config.threadpools, vec![5, 4]);
        let config = Configuration::new().threadpools(Vec::new()).num_threads(2);
        assert_eq!(config.threadpools, vec![2]);
        assert!(Configuration::new().threadpools(Vec::new()).validate().is_err());
        assert!(!config.migrate_tasks);
        assert_eq!(config.verify, VerifyMode::Full);
    }

    #[test]
    fn test_validation() {
        let config = Configuration::new().cache_align_threshold(1024).large_object_threshold(2048);
        assert!(config.validate().is_err());

        let config = Configuration::new().large_object_threshold(16 * 1024);
        assert!(config.validate().is_err());

        let config = Configuration::new().stack_size(1024);
        assert!(config.validate().is_err());

        let config = Configuration::new().num_threads(1000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_copy_stacks_policy() {
        assert!(!CopyStacks::Disabled.applies_to(false));
        assert!(CopyStacks::Enabled.applies_to(false));
        assert!(!CopyStacks::Enabled.applies_to(true));
        assert!(CopyStacks::Always.applies_to(true));
        assert_eq!(CopyStacks::parse("ALWAYS"), Some(CopyStacks::Always));
        assert_eq!(CopyStacks::parse("sometimes"), None);
    }

    #[test]
    fn test_verify_mode_parse() {
        assert_eq!(VerifyMode::parse("off"), Some(VerifyMode::Off));
        assert_eq!(VerifyMode::parse("Quick"), Some(VerifyMode::Quick));
        assert_eq!(VerifyMode::parse("full"), Some(VerifyMode::Full));
        assert_eq!(VerifyMode::parse("paranoid"), None);
        assert!(VerifyMode::Full > VerifyMode::Quick);
    }
}
