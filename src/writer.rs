use crate::config::{FlushMode, QueuePolicy, WriterConfig};
use crate::error::{DestinationError, WriterError};
use crate::metrics::Metrics;
use crate::queue::{Admission, Queue, Refused};
use crate::rate_limit::RateLimitedLog;
use crate::record::{Entry, Record};
use crate::sink::{Delivery, Destination, DestinationId};
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Timeout used when a running writer is dropped without calling `stop`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a [`Writer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Constructed, flush thread not spawned yet. Records are queued.
    Created,
    /// Flush thread running.
    Running,
    /// `stop` was called; the flush thread is delivering what is left.
    Draining,
    /// The flush loop crashed too often; `enqueue` writes on the caller's
    /// thread.
    Fallback,
    /// Terminal. Destinations are closed and `enqueue` returns `false`.
    Stopped,
}

type ErrorHook = Arc<dyn Fn(DestinationId, &DestinationError) + Send + Sync>;
type Failures = Vec<(DestinationId, DestinationError)>;

/// Batched background writer.
///
/// Producers hand finished records to [`enqueue`](Writer::enqueue); a single
/// flush thread drains the bounded queue, groups records into batches and
/// delivers each batch to every registered [`Destination`] in enqueue order.
///
/// The writer is a plain value: share it with `Arc<Writer>` where several
/// components log through it.
pub struct Writer {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: WriterConfig,
    queue: Queue,
    metrics: Arc<Metrics>,
    destinations: Mutex<Destinations>,
    state: Mutex<WriterState>,
    state_changed: Condvar,
    wake: Signal,
    error_hook: RwLock<Option<ErrorHook>>,
    queue_full_log: RateLimitedLog,
    write_error_log: RateLimitedLog,
    overflow_log: RateLimitedLog,
}

#[derive(Default)]
struct Destinations {
    next_id: u64,
    entries: Vec<Registered>,
    // Set once the destinations have been closed for good.
    closed: bool,
}

struct Registered {
    id: DestinationId,
    delivery: Delivery,
    sink: Box<dyn Destination>,
}

/// State that survives a crash of the flush loop.
struct LoopState {
    batch: Vec<Record>,
    progress: BatchProgress,
    last_flush: Instant,
    consecutive_failures: u32,
}

/// How far each destination got through the current batch, so a batch
/// retried after a crash is not written twice to destinations that already
/// took it.
#[derive(Default)]
struct BatchProgress {
    delivered: HashMap<DestinationId, usize>,
    failures: Failures,
}

impl BatchProgress {
    /// Forget the batch and hand back the failures it collected.
    fn finish(&mut self) -> Failures {
        self.delivered.clear();
        std::mem::take(&mut self.failures)
    }
}

impl Writer {
    /// Create a writer in the [`WriterState::Created`] state.
    ///
    /// Degenerate values in `config` are clamped (queue and batch size at
    /// least 1, tick at least 1ms).
    pub fn new(config: WriterConfig) -> Self {
        let config = config.normalized();
        let metrics = Arc::new(Metrics::new());
        let queue = Queue::new(config.max_queue_size, config.queue_policy, Arc::clone(&metrics));

        let shared = Shared {
            config,
            queue,
            metrics,
            destinations: Mutex::new(Destinations::default()),
            state: Mutex::new(WriterState::Created),
            state_changed: Condvar::new(),
            wake: Signal::default(),
            error_hook: RwLock::new(None),
            queue_full_log: RateLimitedLog::default(),
            write_error_log: RateLimitedLog::default(),
            overflow_log: RateLimitedLog::default(),
        };

        Writer {
            shared: Arc::new(shared),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn state(&self) -> WriterState {
        *self.shared.state.lock()
    }

    /// Register a destination that receives one `write` call per record.
    pub fn add_destination(&self, sink: impl Destination + 'static) -> DestinationId {
        self.add_destination_with(sink, Delivery::PerRecord)
    }

    /// Register a destination that receives whole batches through
    /// [`Destination::write_batch`].
    pub fn add_batch_destination(&self, sink: impl Destination + 'static) -> DestinationId {
        self.add_destination_with(sink, Delivery::Batch)
    }

    /// Register a destination with an explicit [`Delivery`].
    ///
    /// Safe to call before `start` or while the flush thread runs; the
    /// destination sees every batch flushed after registration.
    pub fn add_destination_with(
        &self,
        sink: impl Destination + 'static,
        delivery: Delivery,
    ) -> DestinationId {
        let sink: Box<dyn Destination> = Box::new(sink);
        let mut dests = self.shared.destinations.lock();
        let id = DestinationId(dests.next_id);
        dests.next_id += 1;
        if dests.closed {
            tracing::warn!(%id, "writer already stopped, destination will never receive records");
        }
        dests.entries.push(Registered { id, delivery, sink });
        tracing::debug!(%id, ?delivery, "destination registered");
        id
    }

    /// Unregister a destination, flushing and closing it.
    ///
    /// Returns `false` if `id` is unknown or the writer already stopped.
    pub fn remove_destination(&self, id: DestinationId) -> bool {
        let failures = {
            let mut dests = self.shared.destinations.lock();
            let Some(pos) = dests.entries.iter().position(|r| r.id == id) else {
                return false;
            };
            let mut registered = dests.entries.remove(pos);
            match contained(|| registered.sink.close()) {
                Ok(()) => Vec::new(),
                Err(e) => vec![(id, e)],
            }
        };
        self.shared.report(failures);
        tracing::debug!(%id, "destination removed");
        true
    }

    /// Install a callback invoked for every destination failure, for
    /// example to resize or remove a memory-mapped destination that ran out
    /// of space. Runs on the thread that performed the write, without any
    /// writer lock held.
    pub fn on_destination_error<F>(&self, hook: F)
    where
        F: Fn(DestinationId, &DestinationError) + Send + Sync + 'static,
    {
        *self.shared.error_hook.write() = Some(Arc::new(hook));
    }

    /// Spawn the flush thread. Calling it again is a no-op.
    pub fn start(&self) -> Result<&Self, WriterError> {
        let mut state = self.shared.state.lock();
        if *state != WriterState::Created {
            tracing::debug!(state = ?*state, "writer already started");
            return Ok(self);
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("log-writer-flush".to_string())
            .spawn(move || shared.supervise())
            .map_err(WriterError::Spawn)?;

        *self.handle.lock() = Some(handle);
        *state = WriterState::Running;
        Ok(self)
    }

    /// Queue a finished record.
    ///
    /// **Returns**
    /// - `true` if the record was accepted (it will be written, or evicted
    ///   later under [`QueuePolicy::DropOldest`]).
    /// - `false` if it was discarded by [`QueuePolicy::DropNewest`] /
    ///   [`QueuePolicy::Warn`], or the writer is stopped.
    ///
    /// Blocks while the queue is full under [`QueuePolicy::Block`]. In
    /// fallback mode the record is written on the calling thread.
    pub fn enqueue(&self, record: impl Into<Record>) -> bool {
        match self.shared.queue.push(record.into()) {
            Ok(Admission::Accepted) | Ok(Admission::Evicted(_)) => true,
            Ok(Admission::Rejected) => {
                if self.shared.config.queue_policy == QueuePolicy::Warn {
                    self.shared
                        .queue_full_log
                        .warn("log writer queue full, dropping newest record");
                }
                false
            }
            Err(Refused::Bypass(record)) => self.shared.write_through(record),
            Err(Refused::Closed) => {
                tracing::debug!("log writer stopped, rejecting record");
                false
            }
        }
    }

    /// Wake the flush thread in [`FlushMode::Manual`]; no-op otherwise.
    pub fn trigger(&self) {
        if self.shared.config.mode == FlushMode::Manual {
            self.shared.wake.notify();
        }
    }

    /// Drain the queue, close every destination and terminate the flush
    /// thread.
    ///
    /// Returns `false` if the flush thread did not finish within `timeout`
    /// (for example a destination hangs). The thread is not killed; it keeps
    /// draining in the background and a later `stop` may still succeed.
    pub fn stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        match *state {
            WriterState::Stopped => return true,
            WriterState::Created | WriterState::Fallback => {
                self.shared.shutdown_inline();
                *state = WriterState::Stopped;
                self.shared.state_changed.notify_all();
            }
            WriterState::Running => {
                *state = WriterState::Draining;
                self.shared.queue.push_poison();
                self.shared.wake.notify();
            }
            WriterState::Draining => {}
        }

        while *state != WriterState::Stopped {
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        let stopped = *state == WriterState::Stopped;
        drop(state);

        if stopped {
            if let Some(handle) = self.handle.lock().take() {
                if handle.join().is_err() {
                    tracing::error!("log writer flush thread panicked during shutdown");
                }
            }
        } else {
            tracing::warn!(?timeout, "log writer flush thread did not stop in time");
        }
        stopped
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.state() != WriterState::Stopped && !self.stop(DEFAULT_STOP_TIMEOUT) {
            tracing::warn!("log writer dropped before its flush thread finished");
        }
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

impl Shared {
    /// Body of the flush thread: run the loop, restart it after a crash,
    /// fall back to synchronous writes once restarts are exhausted.
    fn supervise(&self) {
        tracing::debug!(mode = %self.config.mode, "log writer flush thread started");
        let mut st = LoopState {
            batch: Vec::with_capacity(self.config.batch_size),
            progress: BatchProgress::default(),
            last_flush: Instant::now(),
            consecutive_failures: 0,
        };

        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.run(&mut st))) {
                Ok(()) => {
                    self.finish(&mut st);
                    return;
                }
                Err(payload) => {
                    self.metrics.record_error();
                    let reason = panic_message(payload.as_ref());
                    let restarts = self.metrics.restarts();

                    if !self.config.auto_restart || restarts >= self.config.max_restarts {
                        tracing::error!(
                            restarts,
                            reason = %reason,
                            "log writer flush loop keeps failing, switching to synchronous writes"
                        );
                        self.fall_back(&mut st);
                        return;
                    }

                    self.metrics.record_restart();
                    let backoff = self.backoff(st.consecutive_failures);
                    st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                    tracing::warn!(
                        restarts = restarts + 1,
                        ?backoff,
                        reason = %reason,
                        "log writer flush loop crashed, restarting"
                    );
                    // Keep a trigger or stop that arrives during the pause.
                    if self.wake.wait(Some(backoff)) {
                        self.wake.notify();
                    }
                }
            }
        }
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(31);
        self.config
            .restart_backoff
            .saturating_mul(factor)
            .min(self.config.max_restart_backoff)
    }

    /// Scheduling loop. Returns once the shutdown marker has been consumed;
    /// the final flush is left to [`Shared::finish`].
    fn run(&self, st: &mut LoopState) {
        match self.config.mode {
            FlushMode::Trigger => loop {
                let deadline = if st.batch.is_empty() {
                    None
                } else {
                    Some(st.last_flush + self.config.flush_interval)
                };
                match self.queue.pop(deadline) {
                    Some(Entry::Record(record)) => {
                        st.batch.push(record);
                        if self.queue.drain_into(&mut st.batch) {
                            return;
                        }
                    }
                    Some(Entry::Poison) => return,
                    None => {}
                }
                if self.due(st) {
                    self.flush(st);
                }
            },
            FlushMode::Loop => loop {
                self.wake.wait(Some(self.config.tick));
                if self.queue.drain_into(&mut st.batch) {
                    return;
                }
                if self.due(st) {
                    self.flush(st);
                }
            },
            FlushMode::Manual => loop {
                self.wake.wait(None);
                if self.queue.drain_into(&mut st.batch) {
                    return;
                }
                self.flush(st);
            },
        }
    }

    fn due(&self, st: &LoopState) -> bool {
        !st.batch.is_empty()
            && (st.batch.len() >= self.config.batch_size
                || st.last_flush.elapsed() >= self.config.flush_interval)
    }

    fn flush(&self, st: &mut LoopState) {
        if st.batch.is_empty() {
            return;
        }
        let failures = {
            let mut dests = self.destinations.lock();
            self.deliver(&mut dests, &st.batch, &mut st.progress, false);
            st.progress.finish()
        };
        self.metrics.record_written(st.batch.len() as u64);
        st.batch.clear();
        st.last_flush = Instant::now();
        st.consecutive_failures = 0;
        self.report(failures);
    }

    /// Deliver `batch` to every destination, resuming each one where
    /// `progress` says it stopped. A failing destination does not stop
    /// delivery to the others. With `contain_panics` a panicking destination
    /// is recorded as a failure instead of unwinding.
    fn deliver(
        &self,
        dests: &mut Destinations,
        batch: &[Record],
        progress: &mut BatchProgress,
        contain_panics: bool,
    ) {
        for registered in dests.entries.iter_mut() {
            let from = progress.delivered.get(&registered.id).copied().unwrap_or(0);
            let pending = batch.get(from..).unwrap_or_default();
            if pending.is_empty() {
                continue;
            }
            let result = if contain_panics {
                contained(|| write_to(registered, pending))
            } else {
                write_to(registered, pending)
            };
            progress.delivered.insert(registered.id, batch.len());
            if let Err(e) = result {
                progress.failures.push((registered.id, e));
            }
        }
    }

    /// Deliver a one-off batch with panics contained.
    fn deliver_now(&self, dests: &mut Destinations, batch: &[Record]) -> Failures {
        let mut progress = BatchProgress::default();
        self.deliver(dests, batch, &mut progress, true);
        progress.finish()
    }

    fn close_all(&self, dests: &mut Destinations) -> Failures {
        let mut failures = Vec::new();
        for mut registered in dests.entries.drain(..) {
            if let Err(e) = contained(|| registered.sink.close()) {
                failures.push((registered.id, e));
            }
        }
        dests.closed = true;
        failures
    }

    /// Final flush after the shutdown marker, then close everything.
    fn finish(&self, st: &mut LoopState) {
        let mut state = self.state.lock();
        let failures = {
            let mut dests = self.destinations.lock();
            self.deliver(&mut dests, &st.batch, &mut st.progress, true);
            self.metrics.record_written(st.batch.len() as u64);
            st.batch.clear();
            let mut failures = st.progress.finish();
            failures.extend(self.close_all(&mut dests));
            failures
        };
        *state = WriterState::Stopped;
        self.state_changed.notify_all();
        drop(state);

        self.report(failures);
        tracing::debug!("log writer flush thread stopped");
    }

    /// Switch to synchronous delivery. Whatever is still queued is written
    /// first, under the destinations lock, so producers that already see the
    /// bypass cannot overtake it.
    fn fall_back(&self, st: &mut LoopState) {
        let mut state = self.state.lock();
        let stopping = *state == WriterState::Draining;
        let failures = {
            let mut dests = self.destinations.lock();
            self.deliver(&mut dests, &st.batch, &mut st.progress, true);
            self.metrics.record_written(st.batch.len() as u64);
            st.batch.clear();
            let mut failures = st.progress.finish();

            let rest = if stopping {
                self.queue.close()
            } else {
                self.queue.bypass()
            };
            failures.extend(self.deliver_now(&mut dests, &rest));
            self.metrics.record_written(rest.len() as u64);
            if stopping {
                failures.extend(self.close_all(&mut dests));
            }
            failures
        };
        *state = if stopping {
            WriterState::Stopped
        } else {
            WriterState::Fallback
        };
        self.state_changed.notify_all();
        drop(state);

        self.report(failures);
    }

    /// Synchronous delivery used in fallback mode.
    fn write_through(&self, record: Record) -> bool {
        let failures = {
            let mut dests = self.destinations.lock();
            if dests.closed {
                return false;
            }
            self.metrics.record_enqueued();
            let failures = self.deliver_now(&mut dests, std::slice::from_ref(&record));
            self.metrics.record_written(1);
            failures
        };
        self.report(failures);
        true
    }

    /// Deliver what is queued and close the destinations on the calling
    /// thread; used when no flush thread is running.
    fn shutdown_inline(&self) {
        let failures = {
            let mut dests = self.destinations.lock();
            let rest = self.queue.close();
            let mut failures = self.deliver_now(&mut dests, &rest);
            self.metrics.record_written(rest.len() as u64);
            failures.extend(self.close_all(&mut dests));
            failures
        };
        self.report(failures);
    }

    fn report(&self, failures: Failures) {
        if failures.is_empty() {
            return;
        }
        let hook = self.error_hook.read().clone();
        for (id, error) in failures {
            self.metrics.record_error();
            if error.is_overflow() {
                self.overflow_log
                    .error("mmap destination region exhausted, batch rejected", &error);
            } else {
                self.write_error_log.error("log destination write failed", &error);
            }
            if let Some(hook) = &hook {
                hook(id, &error);
            }
        }
    }
}

fn write_to(registered: &mut Registered, batch: &[Record]) -> Result<(), DestinationError> {
    let sink = &mut registered.sink;
    match registered.delivery {
        Delivery::PerRecord => batch.iter().try_for_each(|record| sink.write(record))?,
        Delivery::Batch => sink.write_batch(batch)?,
    }
    sink.flush()
}

/// Run a destination call, turning a panic into a [`DestinationError`].
fn contained(f: impl FnOnce() -> Result<(), DestinationError>) -> Result<(), DestinationError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(DestinationError::Other(format!(
            "destination panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wake-up flag for the `Loop` and `Manual` modes and for restart pauses.
#[derive(Default)]
struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn notify(&self) {
        *self.raised.lock() = true;
        self.cond.notify_all();
    }

    /// Wait until notified or `timeout` elapses. Returns whether the signal
    /// was raised, and lowers it.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut raised = self.raised.lock();
        match timeout {
            None => {
                while !*raised {
                    self.cond.wait(&mut raised);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*raised {
                    if self.cond.wait_until(&mut raised, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        std::mem::replace(&mut *raised, false)
    }
}
