pub mod config;
pub mod env;
pub mod error;
pub mod file;
pub mod metrics;
pub mod noop_sink;
mod queue;
mod rate_limit;
pub mod record;
pub mod sink;
pub mod writer;

#[cfg(feature = "tracing-layer")]
pub mod layer;

pub use config::{FlushMode, QueuePolicy, WriterConfig};
pub use error::{DestinationError, WriterError};
pub use file::{BufferedFile, FileOptions, ImmediateFile, MmapFile};
pub use metrics::{Metrics, MetricsSnapshot};
pub use record::Record;
pub use sink::{Delivery, Destination, DestinationId};
pub use writer::{Writer, WriterState};
