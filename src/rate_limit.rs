//! Rate-limited diagnostics.
//!
//! A failing disk or a saturated queue would otherwise produce one log line
//! per record. [`RateLimitedLog`] emits at most once per interval and reports
//! how many occurrences were suppressed in between.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default interval between two emitted messages.
pub(crate) const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub(crate) struct RateLimitedLog {
    min_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

impl RateLimitedLog {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: Mutex::new(None),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(suppressed_since_last_emit)` when the caller should emit
    /// now, `None` when the occurrence is swallowed.
    pub(crate) fn check(&self) -> Option<u64> {
        let now = Instant::now();
        let mut last = self.last_emit.lock();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min_interval => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                None
            }
            _ => {
                *last = Some(now);
                Some(self.suppressed.swap(0, Ordering::Relaxed))
            }
        }
    }

    pub(crate) fn warn(&self, message: &str) {
        if let Some(suppressed) = self.check() {
            tracing::warn!(suppressed, "{}", message);
        }
    }

    pub(crate) fn error(&self, message: &str, error: &dyn std::fmt::Display) {
        if let Some(suppressed) = self.check() {
            tracing::error!(error = %error, suppressed, "{}", message);
        }
    }
}

impl Default for RateLimitedLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}
