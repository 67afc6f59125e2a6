//! Exporters: linkages in, log records out
//!
//! Each data type has one exporter, picked once from configuration:
//!
//! | Format                | CPU                            | Allocation                            |
//! |-----------------------|--------------------------------|---------------------------------------|
//! | `text`                | [`PlainTextCpuEventExporter`]  | [`PlainTextAllocationEventExporter`]  |
//! | `pprof-gzip-base64`   | [`PprofCpuEventExporter`]      | [`PprofAllocationEventExporter`]      |
//!
//! Plain-text exporters emit immediately; pprof exporters buffer and must be
//! flushed (see [`CpuEventExporter::flush`]).

mod attributes;
mod plain_text;
pub mod pprof;

use std::sync::Arc;

pub use attributes::LogDataCommonAttributes;
pub use plain_text::{PlainTextAllocationEventExporter, PlainTextCpuEventExporter};
pub use pprof::{PprofAllocationEventExporter, PprofCpuEventExporter};

use crate::config::DataFormat;
use crate::context::{AllocationLinkage, StackToSpanLinkage};
use crate::logs::LogProcessor;

// =============================================================================
// ATTRIBUTE NAMES
// =============================================================================

pub const SOURCE_TYPE: &str = "com.splunk.sourcetype";
pub const PROFILING_SOURCE: &str = "otel.profiling";
pub const SOURCE_EVENT_NAME: &str = "source.event.name";
/// Milliseconds, only present for periodic events
pub const SOURCE_EVENT_PERIOD: &str = "source.event.period";
pub const DATA_TYPE: &str = "profiling.data.type";
pub const DATA_FORMAT: &str = "profiling.data.format";
pub const MEMORY_ALLOCATED: &str = "memory.allocated";
pub const MEMORY_ALLOCATION_TYPE: &str = "memory.allocation.type";
pub const THREAD_NAME: &str = "thread.name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilingDataType {
    Cpu,
    Allocation,
}

impl ProfilingDataType {
    #[must_use]
    pub fn value(self) -> &'static str {
        match self {
            ProfilingDataType::Cpu => "cpu",
            ProfilingDataType::Allocation => "allocation",
        }
    }
}

// =============================================================================
// EXPORTER SELECTION
// =============================================================================

pub enum CpuEventExporter {
    PlainText(PlainTextCpuEventExporter),
    Pprof(PprofCpuEventExporter),
}

impl CpuEventExporter {
    pub fn new(
        format: DataFormat,
        processor: Arc<dyn LogProcessor>,
        common: LogDataCommonAttributes,
    ) -> Self {
        match format {
            DataFormat::Text => Self::PlainText(PlainTextCpuEventExporter::new(processor, common)),
            DataFormat::PprofGzipBase64 => Self::Pprof(PprofCpuEventExporter::new(processor, common)),
        }
    }

    pub fn export(&self, linkage: &StackToSpanLinkage) {
        match self {
            Self::PlainText(exporter) => exporter.export(linkage),
            Self::Pprof(exporter) => exporter.export(linkage),
        }
    }

    /// Emit buffered samples. No-op for plain text.
    pub fn flush(&self) {
        if let Self::Pprof(exporter) = self {
            exporter.flush();
        }
    }

    #[must_use]
    pub fn format(&self) -> DataFormat {
        match self {
            Self::PlainText(_) => DataFormat::Text,
            Self::Pprof(_) => DataFormat::PprofGzipBase64,
        }
    }
}

pub enum AllocationEventExporter {
    PlainText(PlainTextAllocationEventExporter),
    Pprof(PprofAllocationEventExporter),
}

impl AllocationEventExporter {
    pub fn new(
        format: DataFormat,
        processor: Arc<dyn LogProcessor>,
        common: LogDataCommonAttributes,
    ) -> Self {
        match format {
            DataFormat::Text => {
                Self::PlainText(PlainTextAllocationEventExporter::new(processor, common))
            }
            DataFormat::PprofGzipBase64 => {
                Self::Pprof(PprofAllocationEventExporter::new(processor, common))
            }
        }
    }

    pub fn export(&self, linkage: &AllocationLinkage) {
        match self {
            Self::PlainText(exporter) => exporter.export(linkage),
            Self::Pprof(exporter) => exporter.export(linkage),
        }
    }

    pub fn flush(&self) {
        if let Self::Pprof(exporter) = self {
            exporter.flush();
        }
    }

    #[must_use]
    pub fn format(&self) -> DataFormat {
        match self {
            Self::PlainText(_) => DataFormat::Text,
            Self::Pprof(_) => DataFormat::PprofGzipBase64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPeriods;
    use crate::logs::{InMemorySink, SimpleLogProcessor};

    #[test]
    fn test_exporter_selected_from_format() {
        let processor: Arc<dyn LogProcessor> =
            Arc::new(SimpleLogProcessor::new(Arc::new(InMemorySink::new())));
        let common = LogDataCommonAttributes::new(EventPeriods::default());

        let cpu = CpuEventExporter::new(DataFormat::PprofGzipBase64, processor.clone(), common.clone());
        assert_eq!(cpu.format(), DataFormat::PprofGzipBase64);
        let alloc = AllocationEventExporter::new(DataFormat::Text, processor, common);
        assert_eq!(alloc.format(), DataFormat::Text);
    }
}
