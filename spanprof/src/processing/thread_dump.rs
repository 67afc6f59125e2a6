use std::sync::Arc;

use crate::context::{format_raw_stack, SpanContextualizer, StackToSpanLinkage};
use crate::domain::Timestamp;
use crate::events::ThreadSnapshot;
use crate::export::CpuEventExporter;
use crate::filter::StackTraceFilter;

/// Turns thread snapshots (from thread dumps or execution samples) into
/// span-linked stacks for the CPU exporter.
pub struct ThreadDumpProcessor {
    contextualizer: SpanContextualizer,
    filter: StackTraceFilter,
    exporter: Arc<CpuEventExporter>,
    only_tracing_spans: bool,
}

impl ThreadDumpProcessor {
    pub fn new(
        contextualizer: SpanContextualizer,
        filter: StackTraceFilter,
        exporter: Arc<CpuEventExporter>,
        only_tracing_spans: bool,
    ) -> Self {
        Self { contextualizer, filter, exporter, only_tracing_spans }
    }

    /// Export one snapshot. Returns `false` if it was dropped (no span while
    /// only tracing stacks are wanted, or no frames left after filtering).
    pub fn process(
        &self,
        time: Timestamp,
        source_event_name: &'static str,
        snapshot: &ThreadSnapshot,
    ) -> bool {
        let span = self.contextualizer.link(snapshot.thread_id);
        if self.only_tracing_spans && span.is_none() {
            return false;
        }

        let frames = self.filter.filter(&snapshot.frames);
        if frames.is_empty() {
            return false;
        }

        let raw_stack =
            format_raw_stack(&snapshot.thread_name, snapshot.thread_id, snapshot.state, &frames);
        self.exporter.export(&StackToSpanLinkage {
            time,
            source_event_name,
            thread_id: snapshot.thread_id,
            thread_name: snapshot.thread_name.clone(),
            thread_state: snapshot.state,
            raw_stack,
            frames,
            span,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataFormat;
    use crate::context::SpanRegistry;
    use crate::domain::{SpanContext, SpanId, ThreadId, TraceId};
    use crate::events::{EventPeriods, StackFrame, ThreadState, THREAD_DUMP_EVENT_NAME};
    use crate::export::LogDataCommonAttributes;
    use crate::logs::{InMemorySink, SimpleLogProcessor};

    fn setup(only_tracing: bool) -> (ThreadDumpProcessor, Arc<SpanRegistry>, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        let registry = Arc::new(SpanRegistry::new());
        let exporter = Arc::new(CpuEventExporter::new(
            DataFormat::Text,
            Arc::new(SimpleLogProcessor::new(sink.clone())),
            LogDataCommonAttributes::new(EventPeriods::default()),
        ));
        let processor = ThreadDumpProcessor::new(
            SpanContextualizer::new(registry.clone()),
            StackTraceFilter::new(false, false),
            exporter,
            only_tracing,
        );
        (processor, registry, sink)
    }

    fn snapshot(thread: u64, frames: Vec<StackFrame>) -> ThreadSnapshot {
        ThreadSnapshot {
            thread_id: ThreadId(thread),
            thread_name: format!("t{thread}"),
            state: ThreadState::Waiting,
            frames,
        }
    }

    #[test]
    fn test_stack_linked_to_active_span() {
        let (processor, registry, sink) = setup(false);
        let span = SpanContext::new(TraceId([3; 16]), SpanId([4; 8]), 1);
        registry.enter(ThreadId(1), span);

        let exported = processor.process(
            Timestamp(10),
            THREAD_DUMP_EVENT_NAME,
            &snapshot(1, vec![StackFrame::new("myapp::wait"), StackFrame::new("std::thread::park")]),
        );
        assert!(exported);

        let records = sink.records();
        assert_eq!(records[0].span_context, Some(span));
        assert_eq!(records[0].body, "\"t1\" #1 WAITING\n\tat myapp::wait");
    }

    #[test]
    fn test_only_tracing_spans_drops_unlinked_threads() {
        let (processor, _registry, sink) = setup(true);
        let dropped = !processor.process(
            Timestamp(10),
            THREAD_DUMP_EVENT_NAME,
            &snapshot(2, vec![StackFrame::new("myapp::idle")]),
        );
        assert!(dropped);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_fully_filtered_stack_is_dropped() {
        let (processor, _registry, sink) = setup(false);
        let exported = processor.process(
            Timestamp(10),
            THREAD_DUMP_EVENT_NAME,
            &snapshot(3, vec![StackFrame::new("std::thread::park"), StackFrame::new("_start")]),
        );
        assert!(!exported);
        assert!(sink.records().is_empty());
    }
}
