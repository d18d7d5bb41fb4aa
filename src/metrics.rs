use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Runtime counters of a [`Writer`](crate::writer::Writer).
///
/// `enqueued` and `dropped` are bumped by producer threads, `written`,
/// `errors` and `restarts` by the flush thread (or by the producer itself
/// once the writer runs in synchronous fallback mode).
#[derive(Debug, Default)]
pub struct Metrics {
    enqueued: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    restarts: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub written: u64,
    pub dropped: u64,
    pub errors: u64,
    pub pending: u64,
    pub restarts: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.dropped.fetch_add(count, Ordering::SeqCst);
        }
    }

    #[inline]
    pub(crate) fn record_written(&self, count: u64) {
        self.written.fetch_add(count, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Read all counters.
    ///
    /// `enqueued` is always bumped before its record can be written or
    /// dropped, so reading it last keeps `pending` non-negative.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let written = self.written.load(Ordering::SeqCst);
        let dropped = self.dropped.load(Ordering::SeqCst);
        let errors = self.errors.load(Ordering::SeqCst);
        let restarts = self.restarts.load(Ordering::SeqCst);
        let enqueued = self.enqueued.load(Ordering::SeqCst);

        MetricsSnapshot {
            enqueued,
            written,
            dropped,
            errors,
            pending: enqueued.saturating_sub(written + dropped),
            restarts,
        }
    }
}
