//! pprof exporters
//!
//! Samples are aggregated into a [`ProfileBuilder`] and emitted as one log
//! record whose body is `base64(gzip(protobuf))`. A buffered profile is
//! emitted when:
//!
//! - it reaches [`MAX_SAMPLES_PER_PROFILE`] samples
//! - the recording file that produced it has been fully processed
//! - the [`FlushScheduler`] interval elapses

pub mod builder;
pub mod profile;
mod scheduler;

pub use builder::{LabelValue, ProfileBuilder};
pub use profile::Profile;
pub use scheduler::FlushScheduler;

use base64::{engine::general_purpose, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use prost::Message;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use super::{
    LogDataCommonAttributes, ProfilingDataType, DATA_FORMAT, DATA_TYPE, MEMORY_ALLOCATION_TYPE,
    SOURCE_EVENT_NAME, SOURCE_EVENT_PERIOD, THREAD_NAME,
};
use crate::config::DataFormat;
use crate::context::{AllocationLinkage, StackToSpanLinkage};
use crate::domain::{ExportError, Timestamp};
use crate::logs::{LogProcessor, LogRecord};

/// Samples per profile before a flush is forced
pub const MAX_SAMPLES_PER_PROFILE: usize = 2000;

/// Unit of the profile period and the period label
pub const PERIOD_UNIT: &str = "milliseconds";

pub const SOURCE_EVENT_TIME_LABEL: &str = "source.event.time";
pub const THREAD_ID_LABEL: &str = "thread.id";
pub const THREAD_STATE_LABEL: &str = "thread.state";
pub const TRACE_ID_LABEL: &str = "trace_id";
pub const SPAN_ID_LABEL: &str = "span_id";

/// Serialize, gzip and base64 a profile.
///
/// # Errors
/// Returns an error if compression fails
pub fn encode_profile(profile: &Profile) -> Result<String, ExportError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&profile.encode_to_vec())?;
    let compressed = encoder.finish()?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

/// Inverse of [`encode_profile`], for consumers inspecting exported bodies.
///
/// # Errors
/// Returns an error if the body is not base64, not gzip, or not a profile
pub fn decode_profile(body: &str) -> Result<Profile, ExportError> {
    let compressed = general_purpose::STANDARD
        .decode(body.trim())
        .map_err(|e| ExportError::SerializationFailed(e.to_string()))?;
    let mut raw = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;
    Profile::decode(raw.as_slice()).map_err(|e| ExportError::SerializationFailed(e.to_string()))
}

// ============================================================================
// Shared buffering
// ============================================================================

struct PprofBuffer {
    processor: Arc<dyn LogProcessor>,
    common: LogDataCommonAttributes,
    data_type: ProfilingDataType,
    sample_type: (&'static str, &'static str),
    event_name: &'static str,
    builder: Mutex<Option<ProfileBuilder>>,
}

impl PprofBuffer {
    fn new(
        processor: Arc<dyn LogProcessor>,
        common: LogDataCommonAttributes,
        data_type: ProfilingDataType,
        sample_type: (&'static str, &'static str),
        event_name: &'static str,
    ) -> Self {
        Self { processor, common, data_type, sample_type, event_name, builder: Mutex::new(None) }
    }

    /// Buffer one sample. `extra` labels follow the common ones.
    fn add(&self, linkage: &StackToSpanLinkage, value: i64, extra: &[(&str, LabelValue<'_>)]) {
        let period = self
            .common
            .periods()
            .duration(linkage.source_event_name)
            .map(|p| i64::try_from(p.as_millis()).unwrap_or(i64::MAX));
        let trace_id = linkage.span.filter(|_| linkage.has_span_info()).map(|s| s.trace_id.to_hex());
        let span_id = linkage.span.filter(|_| linkage.has_span_info()).map(|s| s.span_id.to_hex());

        let mut labels = vec![
            (SOURCE_EVENT_NAME, LabelValue::Str(linkage.source_event_name)),
            (
                SOURCE_EVENT_TIME_LABEL,
                LabelValue::Num(i64::try_from(linkage.time.as_millis()).unwrap_or(i64::MAX)),
            ),
            (THREAD_ID_LABEL, LabelValue::Num(i64::try_from(linkage.thread_id.0).unwrap_or(i64::MAX))),
            (THREAD_NAME, LabelValue::Str(&linkage.thread_name)),
            (THREAD_STATE_LABEL, LabelValue::Str(linkage.thread_state.as_str())),
        ];
        if let (Some(trace_id), Some(span_id)) = (&trace_id, &span_id) {
            labels.push((TRACE_ID_LABEL, LabelValue::Str(trace_id)));
            labels.push((SPAN_ID_LABEL, LabelValue::Str(span_id)));
        }
        if let Some(period) = period {
            labels.push((SOURCE_EVENT_PERIOD, LabelValue::Num(period)));
        }
        labels.extend_from_slice(extra);

        let full = {
            let mut guard = self.builder.lock().unwrap_or_else(PoisonError::into_inner);
            let builder = guard.get_or_insert_with(|| {
                let mut builder = ProfileBuilder::new(self.sample_type.0, self.sample_type.1);
                if let Some(period) = period {
                    builder.set_period(self.sample_type.0, PERIOD_UNIT, period);
                }
                builder
            });
            builder.add_sample(linkage.time, &linkage.frames, value, &labels);
            if builder.sample_count() >= MAX_SAMPLES_PER_PROFILE {
                guard.take()
            } else {
                None
            }
        };
        if let Some(builder) = full {
            debug!("pprof {} buffer full, flushing", self.data_type.value());
            self.emit(builder);
        }
    }

    fn flush(&self) {
        let pending = self.builder.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(builder) = pending.filter(|b| !b.is_empty()) {
            self.emit(builder);
        }
    }

    /// Encode outside the lock so producers are not blocked on compression.
    fn emit(&self, builder: ProfileBuilder) {
        let samples = builder.sample_count();
        let profile = builder.build();
        let body = match encode_profile(&profile) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode pprof profile with {samples} samples: {e}");
                return;
            }
        };
        let attributes = self
            .common
            .for_event(self.event_name)
            .with(DATA_TYPE, self.data_type.value())
            .with(DATA_FORMAT, DataFormat::PprofGzipBase64.value());
        self.processor.emit(LogRecord {
            timestamp: Timestamp::now(),
            body,
            attributes,
            span_context: None,
        });
    }
}

// ============================================================================
// Exporters
// ============================================================================

pub struct PprofCpuEventExporter {
    buffer: PprofBuffer,
}

impl PprofCpuEventExporter {
    pub fn new(processor: Arc<dyn LogProcessor>, common: LogDataCommonAttributes) -> Self {
        Self {
            buffer: PprofBuffer::new(
                processor,
                common,
                ProfilingDataType::Cpu,
                ("cpu", "samples"),
                crate::events::THREAD_DUMP_EVENT_NAME,
            ),
        }
    }

    pub fn export(&self, linkage: &StackToSpanLinkage) {
        self.buffer.add(linkage, 1, &[]);
    }

    pub fn flush(&self) {
        self.buffer.flush();
    }
}

pub struct PprofAllocationEventExporter {
    buffer: PprofBuffer,
}

impl PprofAllocationEventExporter {
    pub fn new(processor: Arc<dyn LogProcessor>, common: LogDataCommonAttributes) -> Self {
        Self {
            buffer: PprofBuffer::new(
                processor,
                common,
                ProfilingDataType::Allocation,
                ("allocationSize", "bytes"),
                crate::events::ALLOCATION_SAMPLE_EVENT_NAME,
            ),
        }
    }

    pub fn export(&self, linkage: &AllocationLinkage) {
        let bytes = i64::try_from(linkage.allocation.allocated_bytes).unwrap_or(i64::MAX);
        let object_type = [(MEMORY_ALLOCATION_TYPE, LabelValue::Str(&linkage.allocation.object_type))];
        self.buffer.add(&linkage.stack, bytes, &object_type);
    }

    pub fn flush(&self) {
        self.buffer.flush();
    }
}
