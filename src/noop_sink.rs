use crate::error::DestinationError;
use crate::record::Record;
use crate::sink::Destination;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A destination that discards every record and only counts them.
///
/// Useful for measuring the overhead of the writer itself without any disk
/// I/O, and for tests that don't care about persistence.
#[derive(Clone, Debug, Default)]
pub struct NoopDestination {
    records: Arc<AtomicU64>,
}

impl NoopDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter of records seen, still readable after the destination
    /// has been moved into a writer.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.records)
    }
}

impl Destination for NoopDestination {
    fn write(&mut self, _record: &Record) -> Result<(), DestinationError> {
        self.records.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_batch(&mut self, batch: &[Record]) -> Result<(), DestinationError> {
        self.records.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}
