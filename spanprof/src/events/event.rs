//! Typed events decoded from a recording file.

use spanprof_common::{
    RawAllocation, RawContextChange, RawEvent, RawThreadSample, ALLOCATION_OUTSIDE_TLAB,
    ALLOCATION_SAMPLED, THREAD_STATE_BLOCKED, THREAD_STATE_PARKED, THREAD_STATE_RUNNABLE,
    THREAD_STATE_TIMED_WAITING, THREAD_STATE_WAITING,
};

use super::{
    ALLOCATION_IN_NEW_TLAB_EVENT_NAME, ALLOCATION_OUTSIDE_TLAB_EVENT_NAME,
    ALLOCATION_SAMPLE_EVENT_NAME, CONTEXT_ATTACHED_EVENT_NAME, EXECUTION_SAMPLE_EVENT_NAME,
    THREAD_DUMP_EVENT_NAME,
};
use crate::domain::{SpanContext, SpanId, ThreadId, Timestamp, TraceId};

pub use spanprof_common::RawFrame as StackFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadState {
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Parked,
    #[default]
    Unknown,
}

impl ThreadState {
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            THREAD_STATE_RUNNABLE => ThreadState::Runnable,
            THREAD_STATE_BLOCKED => ThreadState::Blocked,
            THREAD_STATE_WAITING => ThreadState::Waiting,
            THREAD_STATE_TIMED_WAITING => ThreadState::TimedWaiting,
            THREAD_STATE_PARKED => ThreadState::Parked,
            _ => ThreadState::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Parked => "PARKED",
            ThreadState::Unknown => "UNKNOWN",
        }
    }
}

/// One thread's stack inside a thread dump or execution sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub state: ThreadState,
    pub frames: Vec<StackFrame>,
}

impl From<RawThreadSample> for ThreadSnapshot {
    fn from(raw: RawThreadSample) -> Self {
        Self {
            thread_id: ThreadId(raw.thread_id),
            thread_name: raw.thread_name,
            state: ThreadState::from_code(raw.state),
            frames: raw.frames,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSample {
    pub time: Timestamp,
    pub thread: ThreadSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadDump {
    pub time: Timestamp,
    pub threads: Vec<ThreadSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    /// Allocation that triggered a new thread-local buffer
    InNewTlab,
    /// Allocation too large for a thread-local buffer
    OutsideTlab,
    /// Rate-limited allocation sample carrying a weight
    Sampled,
}

impl AllocationKind {
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            ALLOCATION_OUTSIDE_TLAB => AllocationKind::OutsideTlab,
            ALLOCATION_SAMPLED => AllocationKind::Sampled,
            _ => AllocationKind::InNewTlab,
        }
    }

    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            AllocationKind::InNewTlab => ALLOCATION_IN_NEW_TLAB_EVENT_NAME,
            AllocationKind::OutsideTlab => ALLOCATION_OUTSIDE_TLAB_EVENT_NAME,
            AllocationKind::Sampled => ALLOCATION_SAMPLE_EVENT_NAME,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSample {
    pub time: Timestamp,
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub kind: AllocationKind,
    pub object_type: String,
    pub allocation_size: u64,
    pub tlab_size: u64,
    pub weight: u64,
    pub frames: Vec<StackFrame>,
}

impl AllocationSample {
    /// Bytes this sample stands for.
    ///
    /// Sampled allocations are weighted by the bytes allocated since the
    /// previous sample; the other kinds count their own size.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        match self.kind {
            AllocationKind::Sampled if self.weight > 0 => self.weight,
            _ => self.allocation_size,
        }
    }
}

impl From<RawAllocation> for AllocationSample {
    fn from(raw: RawAllocation) -> Self {
        Self {
            time: Timestamp(raw.timestamp_nanos),
            thread_id: ThreadId(raw.thread_id),
            thread_name: raw.thread_name,
            kind: AllocationKind::from_code(raw.kind),
            object_type: raw.object_type,
            allocation_size: raw.allocation_size,
            tlab_size: raw.tlab_size,
            weight: raw.weight,
            frames: raw.frames,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextDirection {
    In,
    Out,
}

/// A span became active on, or left, a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextChange {
    pub time: Timestamp,
    pub thread_id: ThreadId,
    pub span: SpanContext,
    pub direction: ContextDirection,
}

impl From<RawContextChange> for ContextChange {
    fn from(raw: RawContextChange) -> Self {
        Self {
            time: Timestamp(raw.timestamp_nanos),
            thread_id: ThreadId(raw.thread_id),
            span: SpanContext::new(TraceId(raw.trace_id), SpanId(raw.span_id), raw.trace_flags),
            direction: if raw.entering { ContextDirection::In } else { ContextDirection::Out },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    ExecutionSample(CpuSample),
    ThreadDump(ThreadDump),
    Allocation(AllocationSample),
    ContextAttached(ContextChange),
    Unknown { kind: u8 },
}

impl RecordedEvent {
    #[must_use]
    pub fn time(&self) -> Timestamp {
        match self {
            RecordedEvent::ExecutionSample(sample) => sample.time,
            RecordedEvent::ThreadDump(dump) => dump.time,
            RecordedEvent::Allocation(alloc) => alloc.time,
            RecordedEvent::ContextAttached(change) => change.time,
            RecordedEvent::Unknown { .. } => Timestamp(0),
        }
    }

    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            RecordedEvent::ExecutionSample(_) => EXECUTION_SAMPLE_EVENT_NAME,
            RecordedEvent::ThreadDump(_) => THREAD_DUMP_EVENT_NAME,
            RecordedEvent::Allocation(alloc) => alloc.kind.event_name(),
            RecordedEvent::ContextAttached(_) => CONTEXT_ATTACHED_EVENT_NAME,
            RecordedEvent::Unknown { .. } => "unknown",
        }
    }
}

impl From<RawEvent> for RecordedEvent {
    fn from(raw: RawEvent) -> Self {
        match raw {
            RawEvent::ExecutionSample { timestamp_nanos, sample } => {
                RecordedEvent::ExecutionSample(CpuSample {
                    time: Timestamp(timestamp_nanos),
                    thread: sample.into(),
                })
            }
            RawEvent::ThreadDump { timestamp_nanos, threads } => {
                RecordedEvent::ThreadDump(ThreadDump {
                    time: Timestamp(timestamp_nanos),
                    threads: threads.into_iter().map(ThreadSnapshot::from).collect(),
                })
            }
            RawEvent::Allocation(alloc) => RecordedEvent::Allocation(alloc.into()),
            RawEvent::ContextAttached(change) => RecordedEvent::ContextAttached(change.into()),
            RawEvent::Unknown { kind, .. } => RecordedEvent::Unknown { kind },
        }
    }
}
