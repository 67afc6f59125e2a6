//! # Event Processing Chain
//!
//! Consumes events from one recording file and routes them to the processors.
//!
//! ## Event Routing
//!
//! - `ContextAttached` → replayed into the span registry
//! - `ThreadDump` → every snapshot through [`ThreadDumpProcessor`]
//! - `ExecutionSample` → its single snapshot through [`ThreadDumpProcessor`]
//! - `Allocation` → [`TLABProcessor`]
//! - anything else → dropped
//!
//! ## Ordering
//!
//! Events are buffered and sorted by timestamp before dispatch, so a sample is
//! correlated with the spans that were active at its own time rather than at
//! the time it happened to be written. The buffer is flushed at every thread
//! dump, when it reaches [`MAX_BUFFERED_EVENTS`], and at end of file.

use log::debug;
use std::sync::Arc;

use super::{TLABProcessor, ThreadDumpProcessor};
use crate::config::Configuration;
use crate::context::{SpanContextualizer, SpanRegistry};
use crate::events::{RecordedEvent, EXECUTION_SAMPLE_EVENT_NAME, THREAD_DUMP_EVENT_NAME};
use crate::export::{AllocationEventExporter, CpuEventExporter};
use crate::filter::StackTraceFilter;

/// Events held before a forced flush
pub const MAX_BUFFERED_EVENTS: usize = 10_000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChainStats {
    pub events: u64,
    pub context_changes: u64,
    pub exported: u64,
    /// Stacks dropped by the span requirement or the frame filter
    pub filtered: u64,
    pub unknown_dropped: u64,
}

pub struct EventProcessingChain {
    contextualizer: SpanContextualizer,
    thread_dumps: ThreadDumpProcessor,
    tlab: TLABProcessor,
    buffer: Vec<RecordedEvent>,
    stats: ChainStats,
}

impl EventProcessingChain {
    #[must_use]
    pub fn new(
        contextualizer: SpanContextualizer,
        thread_dumps: ThreadDumpProcessor,
        tlab: TLABProcessor,
    ) -> Self {
        Self { contextualizer, thread_dumps, tlab, buffer: Vec::new(), stats: ChainStats::default() }
    }

    /// Wire the processors from configuration.
    #[must_use]
    pub fn from_config(
        config: &Configuration,
        registry: Arc<SpanRegistry>,
        cpu_exporter: Arc<CpuEventExporter>,
        allocation_exporter: Arc<AllocationEventExporter>,
    ) -> Self {
        let contextualizer = SpanContextualizer::new(registry);
        let filter = StackTraceFilter::new(
            config.include_agent_internal_stacks,
            config.include_runtime_internal_stacks,
        );
        let thread_dumps = ThreadDumpProcessor::new(
            contextualizer.clone(),
            filter,
            cpu_exporter,
            config.tracing_stacks_only,
        );
        let tlab = TLABProcessor::new(
            contextualizer.clone(),
            filter,
            allocation_exporter,
            config.stack_depth,
            config.tracing_stacks_only,
        );
        Self::new(contextualizer, thread_dumps, tlab)
    }

    pub fn accept(&mut self, event: RecordedEvent) {
        self.stats.events += 1;
        let is_dump = matches!(event, RecordedEvent::ThreadDump(_));
        self.buffer.push(event);
        if is_dump || self.buffer.len() >= MAX_BUFFERED_EVENTS {
            self.flush_buffer();
        }
    }

    /// Sort and dispatch everything buffered.
    pub fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        // stable: events with equal timestamps keep file order
        self.buffer.sort_by_key(RecordedEvent::time);
        let events = std::mem::take(&mut self.buffer);
        for event in &events {
            self.dispatch(event);
        }
    }

    /// Counters since the last call.
    pub fn take_stats(&mut self) -> ChainStats {
        let stats = std::mem::take(&mut self.stats);
        debug!(
            "Processed {} events: {} exported, {} filtered, {} context changes, {} unknown",
            stats.events, stats.exported, stats.filtered, stats.context_changes, stats.unknown_dropped
        );
        stats
    }

    fn dispatch(&mut self, event: &RecordedEvent) {
        match event {
            RecordedEvent::ContextAttached(change) => {
                self.stats.context_changes += 1;
                self.contextualizer.update_context(change);
            }
            RecordedEvent::ThreadDump(dump) => {
                for snapshot in &dump.threads {
                    let exported = self.thread_dumps.process(dump.time, THREAD_DUMP_EVENT_NAME, snapshot);
                    self.count(exported);
                }
            }
            RecordedEvent::ExecutionSample(sample) => {
                let exported =
                    self.thread_dumps.process(sample.time, EXECUTION_SAMPLE_EVENT_NAME, &sample.thread);
                self.count(exported);
            }
            RecordedEvent::Allocation(sample) => {
                let exported = self.tlab.process(sample);
                self.count(exported);
            }
            RecordedEvent::Unknown { .. } => self.stats.unknown_dropped += 1,
        }
    }

    fn count(&mut self, exported: bool) {
        if exported {
            self.stats.exported += 1;
        } else {
            self.stats.filtered += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataFormat;
    use crate::domain::{SpanContext, SpanId, ThreadId, Timestamp, TraceId};
    use crate::events::{
        ContextChange, ContextDirection, CpuSample, EventPeriods, StackFrame, ThreadDump,
        ThreadSnapshot, ThreadState,
    };
    use crate::export::LogDataCommonAttributes;
    use crate::logs::{InMemorySink, LogProcessor, SimpleLogProcessor};

    fn chain(sink: &Arc<InMemorySink>, registry: Arc<SpanRegistry>) -> EventProcessingChain {
        let processor: Arc<dyn LogProcessor> = Arc::new(SimpleLogProcessor::new(sink.clone()));
        let common = LogDataCommonAttributes::new(EventPeriods::default());
        EventProcessingChain::from_config(
            &Configuration::default(),
            registry,
            Arc::new(CpuEventExporter::new(DataFormat::Text, processor.clone(), common.clone())),
            Arc::new(AllocationEventExporter::new(DataFormat::Text, processor, common)),
        )
    }

    fn snapshot(thread: u64) -> ThreadSnapshot {
        ThreadSnapshot {
            thread_id: ThreadId(thread),
            thread_name: "worker".to_string(),
            state: ThreadState::Runnable,
            frames: vec![StackFrame::new("myapp::work")],
        }
    }

    fn span() -> SpanContext {
        SpanContext::new(TraceId([1; 16]), SpanId([2; 8]), 1)
    }

    fn context(time: u64, direction: ContextDirection) -> RecordedEvent {
        RecordedEvent::ContextAttached(ContextChange {
            time: Timestamp(time),
            thread_id: ThreadId(1),
            span: span(),
            direction,
        })
    }

    #[test]
    fn test_correlation_uses_sample_time_order() {
        let sink = Arc::new(InMemorySink::new());
        let mut chain = chain(&sink, Arc::new(SpanRegistry::new()));

        // Written out of order: the exit (t=30) precedes the sample (t=20)
        chain.accept(context(10, ContextDirection::In));
        chain.accept(context(30, ContextDirection::Out));
        chain.accept(RecordedEvent::ExecutionSample(CpuSample {
            time: Timestamp(20),
            thread: snapshot(1),
        }));
        chain.accept(RecordedEvent::ExecutionSample(CpuSample {
            time: Timestamp(40),
            thread: snapshot(1),
        }));
        chain.flush_buffer();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].span_context, Some(span()));
        assert_eq!(records[1].span_context, None);
    }

    #[test]
    fn test_thread_dump_flushes_buffer() {
        let sink = Arc::new(InMemorySink::new());
        let mut chain = chain(&sink, Arc::new(SpanRegistry::new()));

        chain.accept(RecordedEvent::ThreadDump(ThreadDump {
            time: Timestamp(5),
            threads: vec![snapshot(1), snapshot(2)],
        }));
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn test_unknown_events_are_counted_and_dropped() {
        let sink = Arc::new(InMemorySink::new());
        let mut chain = chain(&sink, Arc::new(SpanRegistry::new()));

        chain.accept(RecordedEvent::Unknown { kind: 200 });
        chain.accept(context(1, ContextDirection::In));
        chain.flush_buffer();

        let stats = chain.take_stats();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.unknown_dropped, 1);
        assert_eq!(stats.context_changes, 1);
        assert!(sink.records().is_empty());
        assert_eq!(chain.take_stats(), ChainStats::default());
    }

    #[test]
    fn test_buffer_bounded() {
        let sink = Arc::new(InMemorySink::new());
        let mut chain = chain(&sink, Arc::new(SpanRegistry::new()));
        for n in 0..MAX_BUFFERED_EVENTS as u64 {
            chain.accept(RecordedEvent::ExecutionSample(CpuSample {
                time: Timestamp(n),
                thread: snapshot(1),
            }));
        }
        assert_eq!(sink.records().len(), MAX_BUFFERED_EVENTS);
    }
}
