//! Native sampling subsystem boundary
//!
//! The pipeline drives sampling through [`NativeProfiler`] and only ever sees
//! its output as finalized recording files. [`BufferedProfiler`] is the
//! in-process implementation: host hooks feed it through a [`SampleSink`],
//! and `stop` writes the buffered events out in the recording container format.

mod buffered;
mod sink;

pub use buffered::{BufferedProfiler, MAX_EVENTS_PER_RECORDING};
pub use sink::{SampleSink, SpanScope};

use std::path::Path;
use std::time::Duration;

use crate::domain::ProfilerError;
use crate::events::EventSettings;

/// Identifier of a recording inside the native profiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingId(pub u64);

impl std::fmt::Display for RecordingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a recording should collect
#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub settings: EventSettings,
    /// Events older than this are discarded when the recording is written
    pub max_age: Duration,
}

pub trait NativeProfiler: Send + Sync {
    /// Whether sampling can run in this process at all.
    fn is_available(&self) -> bool;

    /// Frames kept per captured stack.
    fn set_stack_depth(&self, depth: usize);

    /// Begin a recording.
    ///
    /// # Errors
    /// Returns an error if sampling cannot be started
    fn start(&self, request: &RecordingRequest) -> Result<RecordingId, ProfilerError>;

    /// Stop a recording and write it to `destination`. The file is complete
    /// when this returns.
    ///
    /// # Errors
    /// Returns an error if the recording is unknown or cannot be written
    fn stop(&self, id: RecordingId, destination: &Path) -> Result<(), ProfilerError>;
}
