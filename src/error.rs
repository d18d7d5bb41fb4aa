use std::io;
use std::path::PathBuf;

/// Failure reported by a [`Destination`](crate::sink::Destination).
#[derive(thiserror::Error, Debug)]
pub enum DestinationError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The memory-mapped region cannot hold the batch. Nothing from the batch
    /// was copied; the caller decides whether to resize, replace or remove.
    #[error("mmap region of {path:?} exhausted: need {needed} bytes, {available} available")]
    MmapOverflow {
        path: PathBuf,
        needed: u64,
        available: u64,
    },

    #[error("destination {path:?} is closed")]
    Closed { path: PathBuf },

    #[error("{0}")]
    Other(String),
}

impl DestinationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DestinationError::Io { path: path.into(), source }
    }

    /// `true` for the memory-mapped overflow condition.
    pub fn is_overflow(&self) -> bool {
        matches!(self, DestinationError::MmapOverflow { .. })
    }
}

/// Error type returned by [`Writer`](crate::writer::Writer) lifecycle calls.
#[derive(thiserror::Error, Debug)]
pub enum WriterError {
    #[error("failed to spawn flush thread: {0}")]
    Spawn(#[source] io::Error),
}
