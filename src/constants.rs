//! Constants and default values for the reloadg supervisor.
//!
//! Timers here are the defaults baked into [`crate::config::Timings`]; every one of
//! them can be overridden through the settings file or the command line.

use std::time::Duration;

// ============================================================================
// Command Line Defaults
// ============================================================================

/// Command launched when `--command` is not given.
pub const DEFAULT_COMMAND: &str = "/usr/local/bin/redis-exporter";

/// Watch path used when `--config` is not given.
pub const DEFAULT_WATCH_PATH: &str = "/usr/local/bin/conf/exporter.conf";

/// Log filter applied when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "info";

// ============================================================================
// Change Detection Timing
// ============================================================================

/// Quiet period a confirmed filesystem change must survive before a
/// notification is pushed.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Interval of the stat-based fallback poller.
///
/// Bounds detection latency on filesystems that drop inotify events, such as
/// network-backed volumes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Process Management Timing
// ============================================================================

/// Time a child is given to exit after `SIGTERM` before it is sent `SIGKILL`.
pub const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between stopping the old child and starting the new one on restart.
pub const RESTART_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on waiting for the wait thread to reap a child after `SIGKILL`.
pub const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How often helper threads blocked on a foreign channel re-check their scope.
pub const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Mounted Config Volume Layout
// ============================================================================

/// Base names of the intermediate link that mounted config volumes swap
/// atomically on update.
pub const INTERMEDIATE_LINK_NAMES: [&str; 2] = ["..data", "data"];

/// Suffix of the temporary link created just before the swap.
pub const INTERMEDIATE_LINK_TMP_SUFFIX: &str = "_tmp";
