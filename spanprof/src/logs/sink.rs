//! Log sinks: where emitted profiling records end up
//!
//! The pipeline only requires a sink to be safe for concurrent `export` calls.
//! [`JsonLinesSink`] writes one JSON object per record; [`InMemorySink`] keeps
//! records for inspection.

use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use super::{Attributes, LogRecord};
use crate::domain::ExportError;

pub trait LogSink: Send + Sync {
    /// Deliver a batch of records.
    ///
    /// # Errors
    /// Returns an error if the batch could not be delivered
    fn export(&self, batch: &[LogRecord]) -> Result<(), ExportError>;

    /// Push out anything buffered inside the sink.
    ///
    /// # Errors
    /// Returns an error if the underlying writer fails
    fn flush(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Serialized form of one record
#[derive(Debug, Serialize)]
struct JsonLogRecord<'a> {
    #[serde(rename = "timeUnixNano")]
    time_unix_nano: u64,
    body: &'a str,
    attributes: &'a Attributes,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(rename = "spanId", skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
    #[serde(rename = "traceFlags", skip_serializing_if = "Option::is_none")]
    trace_flags: Option<u8>,
}

impl<'a> From<&'a LogRecord> for JsonLogRecord<'a> {
    fn from(record: &'a LogRecord) -> Self {
        Self {
            time_unix_nano: record.timestamp.as_nanos(),
            body: &record.body,
            attributes: &record.attributes,
            trace_id: record.span_context.map(|s| s.trace_id.to_hex()),
            span_id: record.span_context.map(|s| s.span_id.to_hex()),
            trace_flags: record.span_context.map(|s| s.trace_flags),
        }
    }
}

/// Newline-delimited JSON sink
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    /// Hand back the writer (used by tests to inspect output).
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Append to (or create) a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened
    pub fn append_to(path: &Path) -> Result<Self, ExportError> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl JsonLinesSink<std::io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LogSink for JsonLinesSink<W> {
    fn export(&self, batch: &[LogRecord]) -> Result<(), ExportError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for record in batch {
            serde_json::to_writer(&mut *writer, &JsonLogRecord::from(record))?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), ExportError> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        Ok(())
    }
}

/// Keeps every exported record in memory
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Mutex<Vec<LogRecord>>,
    exports: Mutex<usize>,
}

impl InMemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of `export` calls received (batches, not records).
    #[must_use]
    pub fn export_calls(&self) -> usize {
        *self.exports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSink for InMemorySink {
    fn export(&self, batch: &[LogRecord]) -> Result<(), ExportError> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(batch);
        *self.exports.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
