use std::sync::Arc;

use crate::context::{
    format_raw_stack, AllocationDetails, AllocationLinkage, SpanContextualizer, StackToSpanLinkage,
};
use crate::events::{AllocationSample, ThreadState};
use crate::export::AllocationEventExporter;
use crate::filter::StackTraceFilter;

/// Turns allocation samples into span-linked allocation records.
pub struct TLABProcessor {
    contextualizer: SpanContextualizer,
    filter: StackTraceFilter,
    exporter: Arc<AllocationEventExporter>,
    stack_depth: usize,
    only_tracing_spans: bool,
}

impl TLABProcessor {
    pub fn new(
        contextualizer: SpanContextualizer,
        filter: StackTraceFilter,
        exporter: Arc<AllocationEventExporter>,
        stack_depth: usize,
        only_tracing_spans: bool,
    ) -> Self {
        Self { contextualizer, filter, exporter, stack_depth, only_tracing_spans }
    }

    /// Export one allocation sample; `false` if it was dropped.
    pub fn process(&self, sample: &AllocationSample) -> bool {
        let span = self.contextualizer.link(sample.thread_id);
        if self.only_tracing_spans && span.is_none() {
            return false;
        }

        let mut frames = self.filter.filter(&sample.frames);
        if frames.is_empty() {
            return false;
        }
        frames.truncate(self.stack_depth.max(1));

        // Allocating threads are by definition running
        let state = ThreadState::Runnable;
        let raw_stack = format_raw_stack(&sample.thread_name, sample.thread_id, state, &frames);
        self.exporter.export(&AllocationLinkage {
            stack: StackToSpanLinkage {
                time: sample.time,
                source_event_name: sample.kind.event_name(),
                thread_id: sample.thread_id,
                thread_name: sample.thread_name.clone(),
                thread_state: state,
                raw_stack,
                frames,
                span,
            },
            allocation: AllocationDetails {
                kind: sample.kind,
                object_type: sample.object_type.clone(),
                allocation_size: sample.allocation_size,
                tlab_size: sample.tlab_size,
                allocated_bytes: sample.allocated_bytes(),
            },
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataFormat;
    use crate::context::SpanRegistry;
    use crate::domain::{ThreadId, Timestamp};
    use crate::events::{AllocationKind, EventPeriods, StackFrame};
    use crate::export::{LogDataCommonAttributes, MEMORY_ALLOCATED};
    use crate::logs::{InMemorySink, SimpleLogProcessor};

    #[test]
    fn test_frames_truncated_to_stack_depth() {
        let sink = Arc::new(InMemorySink::new());
        let exporter = Arc::new(AllocationEventExporter::new(
            DataFormat::Text,
            Arc::new(SimpleLogProcessor::new(sink.clone())),
            LogDataCommonAttributes::new(EventPeriods::default()),
        ));
        let processor = TLABProcessor::new(
            SpanContextualizer::new(Arc::new(SpanRegistry::new())),
            StackTraceFilter::new(false, false),
            exporter,
            2,
            false,
        );
        let sample = AllocationSample {
            time: Timestamp(77),
            thread_id: ThreadId(9),
            thread_name: "alloc".to_string(),
            kind: AllocationKind::OutsideTlab,
            object_type: "Box<[u8]>".to_string(),
            allocation_size: 1 << 20,
            tlab_size: 0,
            weight: 0,
            frames: vec![
                StackFrame::new("myapp::a"),
                StackFrame::new("myapp::b"),
                StackFrame::new("myapp::c"),
            ],
        };
        assert!(processor.process(&sample));

        let record = &sink.records()[0];
        assert_eq!(record.body, "\"alloc\" #9 RUNNABLE\n\tat myapp::a\n\tat myapp::b");
        assert_eq!(record.attributes.get_int(MEMORY_ALLOCATED), Some(1 << 20));
        assert_eq!(record.timestamp, Timestamp(77));
    }
}
