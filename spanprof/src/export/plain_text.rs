//! Plain-text exporters: one log record per stack, body = thread-dump text

use std::sync::Arc;

use super::{
    LogDataCommonAttributes, ProfilingDataType, DATA_FORMAT, DATA_TYPE, MEMORY_ALLOCATED,
    MEMORY_ALLOCATION_TYPE, THREAD_NAME,
};
use crate::config::DataFormat;
use crate::context::{AllocationLinkage, StackToSpanLinkage};
use crate::logs::{Attributes, LogProcessor, LogRecord};

pub struct PlainTextCpuEventExporter {
    processor: Arc<dyn LogProcessor>,
    common: LogDataCommonAttributes,
}

impl PlainTextCpuEventExporter {
    pub fn new(processor: Arc<dyn LogProcessor>, common: LogDataCommonAttributes) -> Self {
        Self { processor, common }
    }

    pub fn export(&self, linkage: &StackToSpanLinkage) {
        let attributes = self
            .common
            .for_linkage(linkage)
            .with(DATA_TYPE, ProfilingDataType::Cpu.value())
            .with(DATA_FORMAT, DataFormat::Text.value());
        self.processor.emit(stack_record(linkage, attributes));
    }
}

pub struct PlainTextAllocationEventExporter {
    processor: Arc<dyn LogProcessor>,
    common: LogDataCommonAttributes,
}

impl PlainTextAllocationEventExporter {
    pub fn new(processor: Arc<dyn LogProcessor>, common: LogDataCommonAttributes) -> Self {
        Self { processor, common }
    }

    pub fn export(&self, linkage: &AllocationLinkage) {
        let stack = &linkage.stack;
        let attributes = self
            .common
            .for_linkage(stack)
            .with(DATA_TYPE, ProfilingDataType::Allocation.value())
            .with(DATA_FORMAT, DataFormat::Text.value())
            .with(MEMORY_ALLOCATED, linkage.allocation.allocated_bytes)
            .with(MEMORY_ALLOCATION_TYPE, linkage.allocation.object_type.as_str())
            .with(THREAD_NAME, stack.thread_name.as_str());
        self.processor.emit(stack_record(stack, attributes));
    }
}

fn stack_record(linkage: &StackToSpanLinkage, attributes: Attributes) -> LogRecord {
    LogRecord {
        timestamp: linkage.time,
        body: linkage.raw_stack.clone(),
        attributes,
        span_context: linkage.span.filter(|_| linkage.has_span_info()),
    }
}
