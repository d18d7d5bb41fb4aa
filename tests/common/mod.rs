#![allow(dead_code)]

use batched_log_writer::{Destination, DestinationError, Record};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Keeps every record it receives in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    records: Arc<Mutex<Vec<Vec<u8>>>>,
    batches: Arc<AtomicUsize>,
    delay: Duration,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` on every batch to simulate a slow disk.
    pub fn slow(delay: Duration) -> Self {
        Self { delay, ..Self::default() }
    }

    pub fn lines(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

impl Destination for MemoryDestination {
    fn write(&mut self, record: &Record) -> Result<(), DestinationError> {
        self.records.lock().push(record.as_bytes().to_vec());
        Ok(())
    }

    fn write_batch(&mut self, batch: &[Record]) -> Result<(), DestinationError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .extend(batch.iter().map(|r| r.as_bytes().to_vec()));
        Ok(())
    }
}

/// Always fails.
#[derive(Debug, Default)]
pub struct FailingDestination;

impl Destination for FailingDestination {
    fn write(&mut self, _record: &Record) -> Result<(), DestinationError> {
        Err(DestinationError::Other("disk on fire".to_string()))
    }
}

/// Panics on the first `panics` batches, then behaves like a
/// [`MemoryDestination`].
#[derive(Debug)]
pub struct PanickingDestination {
    remaining: usize,
    inner: MemoryDestination,
}

impl PanickingDestination {
    pub fn new(panics: usize, inner: MemoryDestination) -> Self {
        Self { remaining: panics, inner }
    }
}

impl Destination for PanickingDestination {
    fn write(&mut self, record: &Record) -> Result<(), DestinationError> {
        self.write_batch(std::slice::from_ref(record))
    }

    fn write_batch(&mut self, batch: &[Record]) -> Result<(), DestinationError> {
        if self.remaining > 0 {
            self.remaining -= 1;
            panic!("injected flush failure");
        }
        self.inner.write_batch(batch)
    }
}

/// Panics in `close`; records are accepted and discarded.
#[derive(Debug, Default)]
pub struct PanicOnClose;

impl Destination for PanicOnClose {
    fn write(&mut self, _record: &Record) -> Result<(), DestinationError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DestinationError> {
        panic!("close failed");
    }
}

/// Wraps a [`MemoryDestination`] and remembers whether it was closed.
#[derive(Debug, Clone, Default)]
pub struct ClosingDestination {
    pub inner: MemoryDestination,
    closed: Arc<AtomicBool>,
}

impl ClosingDestination {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Destination for ClosingDestination {
    fn write(&mut self, record: &Record) -> Result<(), DestinationError> {
        self.inner.write(record)
    }

    fn close(&mut self) -> Result<(), DestinationError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks every write for `delay`.
#[derive(Debug)]
pub struct HungDestination {
    pub delay: Duration,
}

impl Destination for HungDestination {
    fn write(&mut self, _record: &Record) -> Result<(), DestinationError> {
        thread::sleep(self.delay);
        Ok(())
    }
}

/// One event seen by [`EventCapture`], fields rendered with `Debug`.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: tracing::Level,
    pub target: String,
    pub fields: BTreeMap<String, String>,
}

/// `tracing_subscriber` layer that keeps every event it sees.
#[derive(Debug, Clone, Default)]
pub struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }
}

struct DebugFields<'a>(&'a mut BTreeMap<String, String>);

impl tracing::field::Visit for DebugFields<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_owned(), format!("{value:?}"));
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut fields = BTreeMap::new();
        event.record(&mut DebugFields(&mut fields));
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_owned(),
            fields,
        });
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn numbered(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("record {i}\n")).collect()
}

pub fn index_of(line: &str) -> usize {
    line.trim_end()
        .trim_start_matches("record ")
        .parse()
        .expect("numbered record")
}
