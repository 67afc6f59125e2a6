use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::events::RecordedEventStream;
use crate::export::{AllocationEventExporter, CpuEventExporter};
use crate::processing::{ChainStats, EventProcessingChain};

pub type FileFinishedCallback = Box<dyn FnMut(&Path) + Send>;

/// Processes one finished recording file end to end.
pub struct PathHandler {
    chain: EventProcessingChain,
    cpu_exporter: Arc<CpuEventExporter>,
    allocation_exporter: Arc<AllocationEventExporter>,
    on_file_finished: FileFinishedCallback,
}

impl PathHandler {
    pub fn new(
        chain: EventProcessingChain,
        cpu_exporter: Arc<CpuEventExporter>,
        allocation_exporter: Arc<AllocationEventExporter>,
        on_file_finished: FileFinishedCallback,
    ) -> Self {
        Self { chain, cpu_exporter, allocation_exporter, on_file_finished }
    }

    /// Stream `path` through the chain, flush the exporters, and report the
    /// file as finished.
    ///
    /// Never fails: an unreadable file or a damaged tail is logged, whatever
    /// was readable is exported, and the finish hook runs regardless.
    pub fn accept(&mut self, path: &Path) -> ChainStats {
        match RecordedEventStream::open(path) {
            Ok(mut stream) => {
                for event in stream.by_ref() {
                    self.chain.accept(event);
                }
                if stream.was_truncated() {
                    warn!(
                        "Recording {} is damaged, processed the first {} events",
                        path.display(),
                        stream.events_read()
                    );
                }
            }
            Err(e) => warn!("Skipping recording: {e}"),
        }

        self.chain.flush_buffer();
        self.cpu_exporter.flush();
        self.allocation_exporter.flush();

        let stats = self.chain.take_stats();
        info!(
            "Processed {}: {} events, {} stacks exported",
            path.display(),
            stats.events,
            stats.exported
        );
        (self.on_file_finished)(path);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, DataFormat};
    use crate::context::SpanRegistry;
    use crate::events::EventPeriods;
    use crate::export::LogDataCommonAttributes;
    use crate::logs::{InMemorySink, LogProcessor, SimpleLogProcessor};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[test]
    fn test_missing_file_still_finishes() {
        let sink = Arc::new(InMemorySink::new());
        let processor: Arc<dyn LogProcessor> = Arc::new(SimpleLogProcessor::new(sink.clone()));
        let common = LogDataCommonAttributes::new(EventPeriods::default());
        let cpu = Arc::new(CpuEventExporter::new(DataFormat::Text, processor.clone(), common.clone()));
        let alloc = Arc::new(AllocationEventExporter::new(DataFormat::Text, processor, common));
        let chain = EventProcessingChain::from_config(
            &Configuration::default(),
            Arc::new(SpanRegistry::new()),
            cpu.clone(),
            alloc.clone(),
        );

        let finished = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
        let seen = finished.clone();
        let mut handler = PathHandler::new(
            chain,
            cpu,
            alloc,
            Box::new(move |path| seen.lock().unwrap().push(path.to_path_buf())),
        );

        let missing = PathBuf::from("/nonexistent/spanprof_1_20240101T000000.sprec");
        let stats = handler.accept(&missing);
        assert_eq!(stats.events, 0);
        assert_eq!(*finished.lock().unwrap(), vec![missing]);
        assert!(sink.records().is_empty());
    }
}
