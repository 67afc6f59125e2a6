//! Host-side hooks into the buffered profiler
//!
//! A [`SampleSink`] is cheap to clone and safe to share across threads. Hosts
//! call it from their own code paths:
//!
//! - `capture_stack` at points worth sampling (request handlers, loop ticks)
//! - `record_allocation` from an allocation hook
//! - `enter_span` when a trace span becomes current on a thread
//!
//! Nothing is recorded while the profiler has no active recording.

use backtrace::{Frame, SymbolName};
use spanprof_common::{
    RawAllocation, RawContextChange, RawEvent, RawFrame, RawThreadSample, ALLOCATION_OUTSIDE_TLAB,
    ALLOCATION_SAMPLED, THREAD_STATE_RUNNABLE,
};

use super::buffered::{lock, SharedState};
use crate::domain::{SpanContext, ThreadId, Timestamp};
use crate::events::{
    ALLOCATION_OUTSIDE_TLAB_EVENT_NAME, ALLOCATION_SAMPLE_EVENT_NAME, CONTEXT_ATTACHED_EVENT_NAME,
    EXECUTION_SAMPLE_EVENT_NAME,
};

/// Allocations at least this large are recorded as outside-buffer allocations
pub const LARGE_ALLOCATION_THRESHOLD: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct SampleSink {
    state: SharedState,
}

impl SampleSink {
    pub(super) fn new(state: SharedState) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    /// Sample the calling thread's stack.
    pub fn capture_stack(&self) {
        let Some(depth) = self.recording_depth() else {
            return;
        };
        let frames = capture_frames(depth);
        self.record_thread_sample(RawThreadSample {
            thread_id: ThreadId::current().0,
            thread_name: current_thread_name(),
            state: THREAD_STATE_RUNNABLE,
            frames,
        });
    }

    /// Record a stack captured by the host.
    ///
    /// Becomes an execution sample and/or part of the next thread dump,
    /// depending on which events the recording enables.
    pub fn record_thread_sample(&self, sample: RawThreadSample) {
        let now = Timestamp::now();
        let mut state = lock(&self.state);
        let Some(active) = state.active.as_mut() else {
            return;
        };
        if active.settings.is_enabled(EXECUTION_SAMPLE_EVENT_NAME) {
            active.push(RawEvent::ExecutionSample { timestamp_nanos: now.as_nanos(), sample: sample.clone() });
        }
        active.stage_for_dump(sample, now);
    }

    /// Record a full dump of several threads at once.
    pub fn record_thread_dump(&self, threads: Vec<RawThreadSample>) {
        let now = Timestamp::now();
        let mut state = lock(&self.state);
        if let Some(active) = state.active.as_mut() {
            active.push(RawEvent::ThreadDump { timestamp_nanos: now.as_nanos(), threads });
        }
    }

    /// Record an allocation made by the calling thread.
    pub fn record_allocation(&self, object_type: &str, size: u64) {
        let (kind, event_name) = if size >= LARGE_ALLOCATION_THRESHOLD {
            (ALLOCATION_OUTSIDE_TLAB, ALLOCATION_OUTSIDE_TLAB_EVENT_NAME)
        } else {
            (ALLOCATION_SAMPLED, ALLOCATION_SAMPLE_EVENT_NAME)
        };
        let depth = {
            let state = lock(&self.state);
            match &state.active {
                Some(active) if active.settings.is_enabled(event_name) => state.stack_depth,
                _ => return,
            }
        };

        let event = RawEvent::Allocation(RawAllocation {
            timestamp_nanos: Timestamp::now().as_nanos(),
            thread_id: ThreadId::current().0,
            thread_name: current_thread_name(),
            kind,
            object_type: object_type.to_string(),
            allocation_size: size,
            tlab_size: 0,
            weight: size,
            frames: capture_frames(depth),
        });
        if let Some(active) = lock(&self.state).active.as_mut() {
            active.push(event);
        }
    }

    pub fn span_entered(&self, span: SpanContext) {
        self.record_context_change(span, true);
    }

    pub fn span_exited(&self, span: SpanContext) {
        self.record_context_change(span, false);
    }

    /// Mark `span` active on the calling thread until the guard drops.
    #[must_use]
    pub fn enter_span(&self, span: SpanContext) -> SpanScope {
        self.span_entered(span);
        SpanScope { sink: self.clone(), span }
    }

    fn record_context_change(&self, span: SpanContext, entering: bool) {
        let now = Timestamp::now();
        let mut state = lock(&self.state);
        let Some(active) = state.active.as_mut() else {
            return;
        };
        if !active.settings.is_enabled(CONTEXT_ATTACHED_EVENT_NAME) {
            return;
        }
        active.push(RawEvent::ContextAttached(RawContextChange {
            timestamp_nanos: now.as_nanos(),
            thread_id: ThreadId::current().0,
            trace_id: span.trace_id.0,
            span_id: span.span_id.0,
            trace_flags: span.trace_flags,
            entering,
        }));
    }

    fn recording_depth(&self) -> Option<usize> {
        let state = lock(&self.state);
        state.active.as_ref().map(|_| state.stack_depth)
    }
}

/// Records the span exit on drop
#[derive(Debug)]
pub struct SpanScope {
    sink: SampleSink,
    span: SpanContext,
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        self.sink.span_exited(self.span);
    }
}

fn current_thread_name() -> String {
    std::thread::current().name().unwrap_or("unnamed").to_string()
}

/// Walk the calling thread's stack, leaf first.
///
/// Capture frames (this function, `backtrace` internals) are kept; the stack
/// filter removes them downstream unless agent-internal frames are wanted.
fn capture_frames(max_depth: usize) -> Vec<RawFrame> {
    let mut frames = Vec::with_capacity(max_depth.min(128));
    backtrace::trace(|frame| {
        if frames.len() >= max_depth {
            return false;
        }
        frames.push(resolve(frame));
        true
    });
    frames
}

fn resolve(frame: &Frame) -> RawFrame {
    let mut function = None;
    let mut file = None;
    let mut line = None;

    backtrace::resolve_frame(frame, |symbol| {
        if function.is_none() {
            function = symbol.name().map(|name| demangled(&name));
        }
        if file.is_none() {
            file = symbol.filename().and_then(|p| p.to_str()).map(str::to_string);
        }
        if line.is_none() {
            line = symbol.lineno();
        }
    });

    RawFrame {
        function: function.unwrap_or_else(|| format!("{:p}", frame.ip())),
        file,
        line,
    }
}

/// Demangled name without the trailing hash
fn demangled(name: &SymbolName<'_>) -> String {
    format!("{name:#}")
}
