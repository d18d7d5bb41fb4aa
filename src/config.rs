use crate::env::{
    env_parse, LOG_WRITER_AUTO_RESTART_ENV, LOG_WRITER_BATCH_SIZE_ENV,
    LOG_WRITER_FLUSH_INTERVAL_ENV, LOG_WRITER_MAX_QUEUE_SIZE_ENV, LOG_WRITER_MAX_RESTARTS_ENV,
    LOG_WRITER_MODE_ENV, LOG_WRITER_QUEUE_POLICY_ENV, LOG_WRITER_TICK_ENV,
};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What `enqueue` does when the queue already holds `max_queue_size` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Block the caller until the flush thread frees a slot.
    #[default]
    Block,
    /// Evict the oldest queued records to admit the new one.
    DropOldest,
    /// Discard the incoming record.
    DropNewest,
    /// Discard the incoming record and emit a warning.
    Warn,
}

/// How the flush thread decides when to drain the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Wake on every enqueued record.
    #[default]
    Trigger,
    /// Wake every `tick`.
    Loop,
    /// Wake only on [`Writer::trigger`](crate::writer::Writer::trigger).
    Manual,
}

/// Error returned when parsing a [`QueuePolicy`] or [`FlushMode`] name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseConfigError {
    kind: &'static str,
    value: String,
}

impl FromStr for QueuePolicy {
    type Err = ParseConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(QueuePolicy::Block),
            "drop_oldest" => Ok(QueuePolicy::DropOldest),
            "drop_newest" => Ok(QueuePolicy::DropNewest),
            "warn" => Ok(QueuePolicy::Warn),
            _ => Err(ParseConfigError { kind: "queue policy", value: s.to_string() }),
        }
    }
}

impl FromStr for FlushMode {
    type Err = ParseConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trigger" => Ok(FlushMode::Trigger),
            "loop" => Ok(FlushMode::Loop),
            "manual" => Ok(FlushMode::Manual),
            _ => Err(ParseConfigError { kind: "flush mode", value: s.to_string() }),
        }
    }
}

impl fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            QueuePolicy::Block => "block",
            QueuePolicy::DropOldest => "drop_oldest",
            QueuePolicy::DropNewest => "drop_newest",
            QueuePolicy::Warn => "warn",
        })
    }
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            FlushMode::Trigger => "trigger",
            FlushMode::Loop => "loop",
            FlushMode::Manual => "manual",
        })
    }
}

/// Tuning parameters of a [`Writer`](crate::writer::Writer).
///
/// **Fields**
/// - `max_queue_size`: number of records the queue holds before
///   `queue_policy` kicks in.
/// - `queue_policy`: overflow behavior, see [`QueuePolicy`].
/// - `batch_size`: a batch is flushed as soon as it holds this many records.
/// - `flush_interval`: a non-empty batch is flushed at the latest this long
///   after the previous flush.
/// - `mode`: scheduling of the flush thread, see [`FlushMode`].
/// - `tick`: wake-up period in [`FlushMode::Loop`]; ignored otherwise.
/// - `auto_restart`: restart the flush loop after a crash.
/// - `max_restarts`: restarts allowed before switching to synchronous writes.
/// - `restart_backoff` / `max_restart_backoff`: first and largest pause
///   between a crash and the restart; doubles per consecutive crash.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub max_queue_size: usize,
    pub queue_policy: QueuePolicy,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub mode: FlushMode,
    pub tick: Duration,
    pub auto_restart: bool,
    pub max_restarts: u64,
    pub restart_backoff: Duration,
    pub max_restart_backoff: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            queue_policy: QueuePolicy::Block,
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            mode: FlushMode::Trigger,
            tick: Duration::from_millis(100),
            auto_restart: true,
            max_restarts: 5,
            restart_backoff: Duration::from_millis(100),
            max_restart_backoff: Duration::from_secs(30),
        }
    }
}

impl WriterConfig {
    #[must_use]
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    #[must_use]
    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: FlushMode) -> Self {
        self.mode = mode;
        self
    }

    /// Wake-up period used by [`FlushMode::Loop`].
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    #[must_use]
    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    #[must_use]
    pub fn with_max_restarts(mut self, max_restarts: u64) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    #[must_use]
    pub fn with_restart_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.restart_backoff = initial;
        self.max_restart_backoff = max;
        self
    }

    /// Overlay `LOG_WRITER_*` environment variables on top of `self`.
    ///
    /// Unset or unparsable variables leave the corresponding field untouched.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse(LOG_WRITER_MAX_QUEUE_SIZE_ENV) {
            self.max_queue_size = v;
        }
        if let Some(v) = env_parse(LOG_WRITER_QUEUE_POLICY_ENV) {
            self.queue_policy = v;
        }
        if let Some(v) = env_parse(LOG_WRITER_BATCH_SIZE_ENV) {
            self.batch_size = v;
        }
        if let Some(v) = env_parse::<f64>(LOG_WRITER_FLUSH_INTERVAL_ENV).and_then(secs) {
            self.flush_interval = v;
        }
        if let Some(v) = env_parse(LOG_WRITER_MODE_ENV) {
            self.mode = v;
        }
        if let Some(v) = env_parse::<f64>(LOG_WRITER_TICK_ENV).and_then(secs) {
            self.tick = v;
        }
        if let Some(v) = env_parse(LOG_WRITER_AUTO_RESTART_ENV) {
            self.auto_restart = v;
        }
        if let Some(v) = env_parse(LOG_WRITER_MAX_RESTARTS_ENV) {
            self.max_restarts = v;
        }
        self
    }

    // Enforce minimal thresholds to avoid degenerate configs.
    pub(crate) fn normalized(mut self) -> Self {
        self.max_queue_size = self.max_queue_size.max(1);
        self.batch_size = self.batch_size.max(1);
        self.tick = self.tick.max(Duration::from_millis(1));
        self.max_restart_backoff = self.max_restart_backoff.max(self.restart_backoff);
        self
    }
}

fn secs(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}
