//! Bounded multi-producer queue feeding the flush thread.
//!
//! A single mutex around a `VecDeque` keeps push/pop linearizable. The
//! capacity check happens under the same lock, so the configured bound is
//! exact for a single queue; the policy decision may still race with the
//! flush thread draining concurrently, which only makes it conservative.

use crate::config::QueuePolicy;
use crate::metrics::Metrics;
use crate::record::{Entry, Record};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of a push that reached the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Accepted,
    /// Admitted after evicting this many older records.
    Evicted(u64),
    /// Discarded by `DropNewest`/`Warn`.
    Rejected,
}

/// Push refused before any accounting took place.
#[derive(Debug)]
pub(crate) enum Refused {
    /// The writer is stopping or stopped.
    Closed,
    /// The writer fell back to synchronous delivery; the record is handed
    /// back for the caller to write.
    Bypass(Record),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Closed,
    Bypass,
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<Entry>,
    gate: Gate,
}

#[derive(Debug)]
pub(crate) struct Queue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: QueuePolicy,
    metrics: Arc<Metrics>,
}

impl Queue {
    pub(crate) fn new(capacity: usize, policy: QueuePolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(64 * 1024)),
                gate: Gate::Open,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
            metrics,
        }
    }

    /// Append a record, applying the backpressure policy when full.
    ///
    /// `enqueued` and `dropped` are counted here, under the queue lock, so
    /// a record is always counted before the flush thread can see it.
    pub(crate) fn push(&self, record: Record) -> Result<Admission, Refused> {
        let mut inner = self.inner.lock();
        loop {
            match inner.gate {
                Gate::Closed => return Err(Refused::Closed),
                Gate::Bypass => return Err(Refused::Bypass(record)),
                Gate::Open => {}
            }

            if inner.entries.len() < self.capacity {
                self.metrics.record_enqueued();
                inner.entries.push_back(Entry::Record(record));
                self.not_empty.notify_one();
                return Ok(Admission::Accepted);
            }

            match self.policy {
                QueuePolicy::Block => self.not_full.wait(&mut inner),
                QueuePolicy::DropNewest | QueuePolicy::Warn => {
                    self.metrics.record_enqueued();
                    self.metrics.record_dropped(1);
                    return Ok(Admission::Rejected);
                }
                QueuePolicy::DropOldest => {
                    let mut evicted = 0;
                    while inner.entries.len() >= self.capacity {
                        match inner.entries.pop_front() {
                            Some(Entry::Record(_)) => evicted += 1,
                            // Only pushed once the gate is closed.
                            Some(Entry::Poison) | None => break,
                        }
                    }
                    self.metrics.record_enqueued();
                    self.metrics.record_dropped(evicted);
                    inner.entries.push_back(Entry::Record(record));
                    self.not_empty.notify_one();
                    return Ok(Admission::Evicted(evicted));
                }
            }
        }
    }

    /// Close the queue and append the shutdown marker. Blocked producers are
    /// woken and refused.
    pub(crate) fn push_poison(&self) {
        let mut inner = self.inner.lock();
        inner.gate = Gate::Closed;
        inner.entries.push_back(Entry::Poison);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Wait for the head entry, up to `deadline` when given.
    pub(crate) fn pop(&self, deadline: Option<Instant>) -> Option<Entry> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(entry) = inner.entries.pop_front() {
                self.not_full.notify_one();
                return Some(entry);
            }
            match deadline {
                None => self.not_empty.wait(&mut inner),
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut inner, deadline).timed_out()
                        && inner.entries.is_empty()
                    {
                        return None;
                    }
                }
            }
        }
    }

    /// Move every available record into `batch` without blocking.
    ///
    /// Returns `true` if the shutdown marker was reached.
    pub(crate) fn drain_into(&self, batch: &mut Vec<Record>) -> bool {
        let mut inner = self.inner.lock();
        let poisoned = drain(&mut inner.entries, batch);
        self.not_full.notify_all();
        poisoned
    }

    /// Close the queue for good and hand back whatever was still queued.
    pub(crate) fn close(&self) -> Vec<Record> {
        self.shut(Gate::Closed)
    }

    /// Route all further pushes to synchronous delivery and hand back the
    /// queued records.
    pub(crate) fn bypass(&self) -> Vec<Record> {
        self.shut(Gate::Bypass)
    }

    /// A queued shutdown marker is discarded.
    fn shut(&self, gate: Gate) -> Vec<Record> {
        let mut inner = self.inner.lock();
        // A closed queue stays closed.
        if inner.gate != Gate::Closed {
            inner.gate = gate;
        }
        let rest = inner
            .entries
            .drain(..)
            .filter_map(|entry| match entry {
                Entry::Record(record) => Some(record),
                Entry::Poison => None,
            })
            .collect();
        self.not_full.notify_all();
        self.not_empty.notify_all();
        rest
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

fn drain(entries: &mut VecDeque<Entry>, batch: &mut Vec<Record>) -> bool {
    while let Some(entry) = entries.pop_front() {
        match entry {
            Entry::Record(record) => batch.push(record),
            Entry::Poison => return true,
        }
    }
    false
}
