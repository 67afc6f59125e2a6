//! Recorded events: names, settings, periods and the file-backed event stream
//!
//! - `event`: typed events decoded from the recording container
//! - `stream`: [`RecordedEventStream`], lazy iteration over one recording file
//! - `settings`: [`EventSettings`], the `<event>#<setting>` map handed to the profiler
//! - `periods`: [`EventPeriods`], period lookup used to annotate periodic samples

pub mod event;
pub mod periods;
pub mod settings;
pub mod stream;

pub use event::{
    AllocationKind, AllocationSample, ContextChange, ContextDirection, CpuSample, RecordedEvent,
    StackFrame, ThreadDump, ThreadSnapshot, ThreadState,
};
pub use periods::EventPeriods;
pub use settings::EventSettings;
pub use stream::RecordedEventStream;

/// Periodic dump of every thread's stack
pub const THREAD_DUMP_EVENT_NAME: &str = "spanprof.ThreadDump";
/// Stack of a single thread sampled while on CPU
pub const EXECUTION_SAMPLE_EVENT_NAME: &str = "spanprof.ExecutionSample";
pub const ALLOCATION_IN_NEW_TLAB_EVENT_NAME: &str = "spanprof.ObjectAllocationInNewTLAB";
pub const ALLOCATION_OUTSIDE_TLAB_EVENT_NAME: &str = "spanprof.ObjectAllocationOutsideTLAB";
pub const ALLOCATION_SAMPLE_EVENT_NAME: &str = "spanprof.ObjectAllocationSample";
/// Span entered/left a thread
pub const CONTEXT_ATTACHED_EVENT_NAME: &str = "spanprof.ContextAttached";
