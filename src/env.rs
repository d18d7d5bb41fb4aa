//! Environment variable names understood by
//! [`WriterConfig::with_env_overrides`](crate::config::WriterConfig::with_env_overrides).
//!
//! These are purely helpers; the writer itself never reads the environment.

/// Maximum number of queued records, e.g. `10000`.
pub const LOG_WRITER_MAX_QUEUE_SIZE_ENV: &str = "LOG_WRITER_MAX_QUEUE_SIZE";

/// Backpressure policy: `block`, `drop_oldest`, `drop_newest` or `warn`.
pub const LOG_WRITER_QUEUE_POLICY_ENV: &str = "LOG_WRITER_QUEUE_POLICY";

/// Records per batch.
pub const LOG_WRITER_BATCH_SIZE_ENV: &str = "LOG_WRITER_BATCH_SIZE";

/// Maximum seconds between flushes, fractional values allowed.
pub const LOG_WRITER_FLUSH_INTERVAL_ENV: &str = "LOG_WRITER_FLUSH_INTERVAL_SEC";

/// Scheduling mode: `trigger`, `loop` or `manual`.
pub const LOG_WRITER_MODE_ENV: &str = "LOG_WRITER_MODE";

/// Wake-up period in seconds for `loop` mode.
pub const LOG_WRITER_TICK_ENV: &str = "LOG_WRITER_TICK_SEC";

/// `true`/`false`.
pub const LOG_WRITER_AUTO_RESTART_ENV: &str = "LOG_WRITER_AUTO_RESTART";

/// Restarts allowed before falling back to synchronous writes.
pub const LOG_WRITER_MAX_RESTARTS_ENV: &str = "LOG_WRITER_MAX_RESTARTS";

/// Read and parse an environment variable.
///
/// Returns `None` when the variable is unset; an unparsable value is logged
/// and also treated as unset.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}
