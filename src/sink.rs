use crate::error::DestinationError;
use crate::record::Record;
use std::fmt;

/// Synchronous sink for [`Record`]s drained by the writer's flush thread.
///
/// Implementations turn records into bytes on disk (or anywhere else). While
/// registered, a destination is owned by the writer and only ever touched by
/// one thread at a time, so implementations need no internal locking.
pub trait Destination: Send + fmt::Debug {
    /// Write a single record.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was handed to the underlying file.
    /// - `Err(..)` if the write failed. The writer counts the failure and
    ///   keeps delivering the batch to the other destinations.
    fn write(&mut self, record: &Record) -> Result<(), DestinationError>;

    /// Write a whole batch in one call.
    ///
    /// Used for destinations registered with
    /// [`Writer::add_batch_destination`](crate::writer::Writer::add_batch_destination).
    /// Default implementation writes the records one by one and stops at the
    /// first failure.
    fn write_batch(&mut self, batch: &[Record]) -> Result<(), DestinationError> {
        for record in batch {
            self.write(record)?;
        }
        Ok(())
    }

    /// Push buffered bytes further towards the disk. Called once after every
    /// delivered batch.
    ///
    /// Default implementation is a no-op.
    fn flush(&mut self) -> Result<(), DestinationError> {
        Ok(())
    }

    /// Flush and release the underlying resources. Called when the writer
    /// stops or the destination is removed; later writes may fail with
    /// [`DestinationError::Closed`].
    fn close(&mut self) -> Result<(), DestinationError> {
        self.flush()
    }
}

impl<D: Destination + ?Sized> Destination for Box<D> {
    fn write(&mut self, record: &Record) -> Result<(), DestinationError> {
        (**self).write(record)
    }

    fn write_batch(&mut self, batch: &[Record]) -> Result<(), DestinationError> {
        (**self).write_batch(batch)
    }

    fn flush(&mut self) -> Result<(), DestinationError> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<(), DestinationError> {
        (**self).close()
    }
}

/// How the writer hands batches to a registered destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// One [`Destination::write`] call per record.
    PerRecord,
    /// A single [`Destination::write_batch`] call per batch.
    Batch,
}

/// Handle returned on registration, used to remove the destination later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationId(pub(crate) u64);

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "destination-{}", self.0)
    }
}
