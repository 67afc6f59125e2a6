//! Log records and their delivery
//!
//! Exporters turn linkages into [`LogRecord`]s and emit them through a
//! [`LogProcessor`], which hands them to a [`LogSink`].

mod processor;
mod record;
mod sink;

pub use processor::{
    BatchConfig, BatchLogProcessor, LogProcessor, SimpleLogProcessor, DEFAULT_MAX_EXPORT_BATCH_SIZE,
    DEFAULT_MAX_QUEUE_SIZE, DEFAULT_SCHEDULE_DELAY,
};
pub use record::{AttributeValue, Attributes, LogRecord};
pub use sink::{InMemorySink, JsonLinesSink, LogSink};
