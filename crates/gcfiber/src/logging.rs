//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt layer. The level comes from
//! `GCF_LOG_LEVEL` (off, error, warn, info, debug, trace), defaulting to warn.

use gcfiber_core::env::env_lookup;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Environment variable selecting the log level
pub const LOG_LEVEL_NAME: &str = "GCF_LOG_LEVEL";

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Level named by `GCF_LOG_LEVEL`, or warn
    pub fn from_env() -> Self {
        env_lookup(LOG_LEVEL_NAME)
            .and_then(|raw| LogLevel::parse(&raw))
            .unwrap_or(LogLevel::Warn)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Initialize logging at the level from the environment
pub fn init() -> bool {
    init_with_level(LogLevel::from_env())
}

/// Initialize logging at `level`. Returns false if a global subscriber
/// was already installed.
pub fn init_with_level(level: LogLevel) -> bool {
    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::from(level));
    Registry::default().with(layer).try_init().is_ok()
}
