use crate::domain::{SpanContext, ThreadId, Timestamp};
use crate::events::{AllocationKind, StackFrame, ThreadState};

/// One sample paired with the span that was active on its thread.
///
/// Built per event by the processors and handed straight to an exporter;
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackToSpanLinkage {
    pub time: Timestamp,
    pub source_event_name: &'static str,
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub thread_state: ThreadState,
    /// Thread-dump style text of the (filtered) stack
    pub raw_stack: String,
    pub frames: Vec<StackFrame>,
    pub span: Option<SpanContext>,
}

impl StackToSpanLinkage {
    #[must_use]
    pub fn has_span_info(&self) -> bool {
        self.span.is_some_and(|s| s.is_valid())
    }
}

/// Allocation-specific payload carried next to the stack linkage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationDetails {
    pub kind: AllocationKind,
    pub object_type: String,
    pub allocation_size: u64,
    pub tlab_size: u64,
    /// Bytes this sample represents (weight for sampled allocations)
    pub allocated_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationLinkage {
    pub stack: StackToSpanLinkage,
    pub allocation: AllocationDetails,
}

/// Render a stack the way a thread dump shows it:
///
/// ```text
/// "worker-1" #42 RUNNABLE
/// 	at myapp::handler::process(src/handler.rs:42)
/// ```
#[must_use]
pub fn format_raw_stack(
    thread_name: &str,
    thread_id: ThreadId,
    state: ThreadState,
    frames: &[StackFrame],
) -> String {
    use std::fmt::Write as _;

    let mut out = format!("\"{thread_name}\" #{thread_id} {}", state.as_str());
    for frame in frames {
        let _ = write!(out, "\n\tat {frame}");
    }
    out
}
