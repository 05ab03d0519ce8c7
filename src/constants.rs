//! Central Configuration Constants
//!
//! Single source of truth for pipeline defaults.
//! Values here are used when the config file omits a field.

use std::path::PathBuf;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "Logsight";

/// Default window length L (records per window)
pub const DEFAULT_WINDOW_LENGTH: usize = 10;

/// Default idle timeout T before a short window is flushed (milliseconds)
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 1_500;

/// Default eviction TTL for idle entity keys (seconds)
pub const DEFAULT_EVICTION_TTL_SECS: u64 = 900;

/// Default scorer call timeout (milliseconds)
pub const DEFAULT_SCORER_TIMEOUT_MS: u64 = 250;

/// Default number of entity workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default per-boundary queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 1_024;

/// Default shutdown grace period (milliseconds)
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Default vocabulary snapshot interval (seconds)
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 60;

/// Default metrics report interval (seconds)
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 30;

/// Default sink hand-off timeout (milliseconds)
pub const DEFAULT_SINK_TIMEOUT_MS: u64 = 1_000;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Config file path from environment, if set
pub fn get_config_path() -> Option<PathBuf> {
    std::env::var("LOGSIGHT_CONFIG").ok().map(PathBuf::from)
}

/// State directory (vocabulary snapshot, hysteresis state)
pub fn get_state_dir() -> PathBuf {
    std::env::var("LOGSIGHT_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("logsight")
        })
}

/// Worker count from environment
pub fn get_workers() -> Option<usize> {
    std::env::var("LOGSIGHT_WORKERS")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Window length from environment
pub fn get_window_length() -> Option<usize> {
    std::env::var("LOGSIGHT_WINDOW_LENGTH")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Scorer timeout from environment
pub fn get_scorer_timeout_ms() -> Option<u64> {
    std::env::var("LOGSIGHT_SCORER_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Optional JSON-lines input file (stdin when unset)
pub fn get_source_path() -> Option<PathBuf> {
    std::env::var("LOGSIGHT_SOURCE").ok().map(PathBuf::from)
}
