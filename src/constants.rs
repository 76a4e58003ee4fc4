//! Centralized constants for supervision intervals and log conventions.
//!
//! Every timing default used by the lifecycle controller, the watchdog and
//! the log relay lives here so the values can be audited and tuned in one
//! place. All of them can be overridden through [`crate::config::HostConfig`].

// =============================================================================
// Lifecycle
// =============================================================================

/// Interval between checks while `start` waits for the pid and log file (50 ms).
pub const START_POLL_MS: u64 = 50;

/// Delay before the health monitor sends its first probe (10 seconds).
/// Freshly spawned servers need time to bind their query and RCON ports.
pub const HEALTH_INITIAL_DELAY_SECS: u64 = 10;

/// Interval between health monitor probes (30 seconds).
pub const HEALTH_POLL_INTERVAL_SECS: u64 = 30;

/// Number of times a broadcast message is repeated.
pub const BROADCAST_REPETITIONS: u32 = 3;

/// Delay between two repetitions of a broadcast message (200 ms).
pub const BROADCAST_INTERVAL_MS: u64 = 200;

/// Number of lifecycle transitions kept per instance for inspection.
pub const LIFECYCLE_HISTORY_LEN: usize = 64;

// =============================================================================
// Watchdog
// =============================================================================

/// Interval between two watchdog liveness polls (1 second).
pub const WATCHDOG_INTERVAL_MS: u64 = 1000;

// =============================================================================
// Log relay
// =============================================================================

/// Substring that marks a path as a backup log, excluded from discovery.
pub const BACKUP_MARKER: &str = "backup";

/// File name used when no candidate log file exists yet.
pub const FALLBACK_LOG_NAME: &str = "server.log";

/// Token identifying a line emitted by the server's RCON subsystem.
pub const RCON_MARKER: &str = "LogRcon";

/// A new timestamped log entry, e.g. `[2024.05.01-18.22.03:114][ 12]LogNet: ...`.
pub const ENTRY_PATTERN: &str = r"^\[\d{4}\.\d{2}\.\d{2}-\d{2}\.\d{2}\.\d{2}:\d{3}\]";

/// A generic log record without timestamp, e.g. `LogInit: Display: ...`.
pub const RECORD_PATTERN: &str = r"^Log[A-Za-z0-9_]+:";

/// Interval between reads once the tail reaches the end of the file (100 ms).
pub const TAIL_POLL_MS: u64 = 100;

/// Interval between checks for a freshly written log file (200 ms).
pub const ROTATION_POLL_MS: u64 = 200;

/// Fixed delay before reopening the tail after an I/O error (200 ms).
pub const TAIL_RETRY_DELAY_MS: u64 = 200;

/// Timestamp layout injected on platforms whose output has none.
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "[%Y.%m.%d-%H.%M.%S:%3f]";

// =============================================================================
// Teardown
// =============================================================================

/// Time a stopping server gets before a new start escalates to a kill (30 seconds).
pub const STOP_GRACE_SECS: u64 = 30;
