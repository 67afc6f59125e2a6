//! Structured error types for spanprof
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Which errors stop profiling and which stay local:
//!
//! - [`ProfilerError`] - sampling subsystem unavailable or refused; fatal at startup
//! - [`RecordingError`] - start/finalize failed; fatal to the rotation loop
//! - [`StreamError`] - one recording file unreadable; local to that file
//! - [`ExportError`] - one record or batch not delivered; local to that batch

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Native profiler is not available: {0}")]
    Unavailable(String),

    #[error("Recording {0} is not active in the native profiler")]
    UnknownRecording(u64),

    #[error("Native profiler is already recording (id {0})")]
    Busy(u64),

    #[error("Failed to write recording to {path}: {source}")]
    DumpFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("A recording is already active (id {0})")]
    AlreadyActive(u64),

    #[error("No recording is active")]
    NotActive,

    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Profiler(#[from] ProfilerError),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to open recording {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid recording {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: spanprof_common::DecodeError,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to serialize log record: {0}")]
    SerializationFailed(String),

    #[error("Failed to write log records: {0}")]
    WriteFailed(String),

    #[error("Log processor is shut down")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid event setting '{0}', expected <event>=<value>")]
    InvalidEventSetting(String),

    #[error("Invalid duration '{0}', expected e.g. 20s, 500ms, 1m")]
    InvalidDuration(String),

    #[error("Unknown data format '{0}', expected 'text' or 'pprof-gzip-base64'")]
    UnknownDataFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_error_display() {
        let err = RecordingError::AlreadyActive(3);
        assert_eq!(err.to_string(), "A recording is already active (id 3)");
    }

    #[test]
    fn test_dump_failed_mentions_path() {
        let err = ProfilerError::DumpFailed {
            path: PathBuf::from("/tmp/spanprof_1.sprec"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/tmp/spanprof_1.sprec"));
        assert!(err.to_string().contains("denied"));
    }
}
