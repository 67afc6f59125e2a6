//! Wiring from [`Configuration`] to a running [`ProfilingSession`]
//!
//! ```text
//! RecordingSequencer ─▶ Recorder ─▶ (file) ─▶ DirCleanup::on_new_recording
//!                                         └─▶ PathHandler ─▶ EventProcessingChain ─▶ exporters ─▶ LogProcessor ─▶ LogSink
//!                                                  └─▶ DirCleanup::on_file_finished
//! ```
//!
//! Text exporters share one batching log processor; pprof exporters already
//! aggregate, so they emit through a simple processor.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::config::{log_configuration, Configuration, DataFormat};
use crate::context::SpanRegistry;
use crate::domain::ProfilerError;
use crate::events::EventPeriods;
use crate::export::pprof::FlushScheduler;
use crate::export::{AllocationEventExporter, CpuEventExporter, LogDataCommonAttributes};
use crate::logs::{BatchConfig, BatchLogProcessor, LogProcessor, LogSink, SimpleLogProcessor};
use crate::native::NativeProfiler;
use crate::processing::EventProcessingChain;
use crate::recording::{
    DirCleanup, EscapeHatch, FileFinishedCallback, PathHandler, Recorder, RecordingEscapeHatch,
    RecordingFileNamingConvention, RecordingSequencer,
};

/// Exporters, processors and the chain, without any recording lifecycle.
///
/// Used by live sessions and by offline processing of existing files.
pub struct Pipeline {
    pub cpu_exporter: Arc<CpuEventExporter>,
    pub allocation_exporter: Arc<AllocationEventExporter>,
    processors: Vec<Arc<dyn LogProcessor>>,
    chain: EventProcessingChain,
}

impl Pipeline {
    /// Build the exporters and their log processors.
    ///
    /// # Errors
    /// Returns an error if the batch processor's worker thread cannot be spawned
    pub fn new(
        config: &Configuration,
        sink: Arc<dyn LogSink>,
        registry: Arc<SpanRegistry>,
    ) -> std::io::Result<Self> {
        let common = LogDataCommonAttributes::new(EventPeriods::new(&config.event_settings()));

        let mut batch: Option<Arc<dyn LogProcessor>> = None;
        let mut simple: Option<Arc<dyn LogProcessor>> = None;
        let mut processor_for = |format: DataFormat| -> std::io::Result<Arc<dyn LogProcessor>> {
            let slot = match format {
                DataFormat::Text => &mut batch,
                DataFormat::PprofGzipBase64 => &mut simple,
            };
            if let Some(existing) = slot.as_ref() {
                return Ok(existing.clone());
            }
            let created: Arc<dyn LogProcessor> = match format {
                DataFormat::Text => Arc::new(BatchLogProcessor::new(sink.clone(), BatchConfig::default())?),
                DataFormat::PprofGzipBase64 => Arc::new(SimpleLogProcessor::new(sink.clone())),
            };
            *slot = Some(created.clone());
            Ok(created)
        };

        let cpu_exporter = Arc::new(CpuEventExporter::new(
            config.cpu_data_format,
            processor_for(config.cpu_data_format)?,
            common.clone(),
        ));
        let allocation_exporter = Arc::new(AllocationEventExporter::new(
            config.allocation_data_format,
            processor_for(config.allocation_data_format)?,
            common,
        ));
        let processors = batch.into_iter().chain(simple).collect();

        let chain = EventProcessingChain::from_config(
            config,
            registry,
            cpu_exporter.clone(),
            allocation_exporter.clone(),
        );
        Ok(Self { cpu_exporter, allocation_exporter, processors, chain })
    }

    /// Emit buffered pprof samples and push every processor's queue to the sink.
    pub fn flush(&self) {
        self.cpu_exporter.flush();
        self.allocation_exporter.flush();
        for processor in &self.processors {
            processor.force_flush();
        }
    }

    /// Flush, then stop every processor.
    pub fn shutdown(&self) {
        self.cpu_exporter.flush();
        self.allocation_exporter.flush();
        for processor in &self.processors {
            processor.shutdown();
        }
    }

    /// Split off the file handler; the returned [`PipelineHandle`] keeps the
    /// flush/shutdown controls.
    pub fn into_path_handler(self, on_file_finished: FileFinishedCallback) -> (PathHandler, PipelineHandle) {
        let handle = PipelineHandle {
            cpu_exporter: self.cpu_exporter.clone(),
            allocation_exporter: self.allocation_exporter.clone(),
            processors: self.processors,
        };
        let handler = PathHandler::new(
            self.chain,
            self.cpu_exporter,
            self.allocation_exporter,
            on_file_finished,
        );
        (handler, handle)
    }
}

/// Flush/shutdown controls of a pipeline whose chain has moved to a handler
#[derive(Clone)]
pub struct PipelineHandle {
    cpu_exporter: Arc<CpuEventExporter>,
    allocation_exporter: Arc<AllocationEventExporter>,
    processors: Vec<Arc<dyn LogProcessor>>,
}

impl PipelineHandle {
    pub fn flush_exporters(&self) {
        self.cpu_exporter.flush();
        self.allocation_exporter.flush();
    }

    pub fn shutdown(&self) {
        self.flush_exporters();
        for processor in &self.processors {
            processor.shutdown();
        }
    }
}

pub struct ProfilerActivator {
    config: Configuration,
    sink: Arc<dyn LogSink>,
    profiler: Arc<dyn NativeProfiler>,
    registry: Arc<SpanRegistry>,
    escape_hatch: Option<Box<dyn EscapeHatch>>,
}

impl ProfilerActivator {
    pub fn new(config: Configuration, sink: Arc<dyn LogSink>, profiler: Arc<dyn NativeProfiler>) -> Self {
        Self { config, sink, profiler, registry: Arc::new(SpanRegistry::new()), escape_hatch: None }
    }

    /// Share a thread → span map with the host.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<SpanRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the default disk/backlog escape hatch.
    #[must_use]
    pub fn with_escape_hatch(mut self, hatch: Box<dyn EscapeHatch>) -> Self {
        self.escape_hatch = Some(hatch);
        self
    }

    /// Start profiling.
    ///
    /// Returns `Ok(None)` when profiling is disabled in the configuration.
    ///
    /// # Errors
    /// Returns an error if the native profiler is unavailable or a worker
    /// thread cannot be spawned
    pub fn activate(self) -> Result<Option<ProfilingSession>> {
        let config = self.config;
        if !config.enabled {
            debug!("Profiler disabled");
            return Ok(None);
        }
        if !self.profiler.is_available() {
            warn!("Native profiler is not available, profiling is disabled");
            return Err(ProfilerError::Unavailable("sampling subsystem not present".to_string()).into());
        }
        log_configuration(&config);
        if config.keep_files {
            warn!("Keep files is enabled, leaving recording files in {}", config.directory.display());
        }

        let naming = RecordingFileNamingConvention::new(&config.directory);
        let cleanup =
            Arc::new(DirCleanup::new(naming.clone(), config.keep_files, config.max_retained_files));

        let pipeline = Pipeline::new(&config, self.sink, self.registry.clone())
            .context("Failed to start log batch processor")?;
        let finished_cleanup = cleanup.clone();
        let (mut handler, pipeline) = pipeline
            .into_path_handler(Box::new(move |path| finished_cleanup.on_file_finished(path)));

        let flush_scheduler = if config.cpu_data_format == DataFormat::PprofGzipBase64
            || config.allocation_data_format == DataFormat::PprofGzipBase64
        {
            let scheduled = pipeline.clone();
            Some(
                FlushScheduler::start(config.pprof_flush_interval, move || scheduled.flush_exporters())
                    .context("Failed to start pprof flush scheduler")?,
            )
        } else {
            None
        };

        let new_file_cleanup = cleanup.clone();
        let recorder = Recorder::new(
            self.profiler,
            naming.clone(),
            config.event_settings(),
            config.recording_duration,
            config.stack_depth,
            Box::new(move |path| {
                new_file_cleanup.on_new_recording(path);
                handler.accept(path);
            }),
        );
        let escape_hatch = self.escape_hatch.unwrap_or_else(|| {
            Box::new(RecordingEscapeHatch::new(naming, config.keep_files, config.recording_duration))
        });

        let mut sequencer = RecordingSequencer::new(recorder, escape_hatch, config.recording_duration);
        sequencer.start().context("Failed to start recording sequencer")?;
        info!("Profiler is active");

        Ok(Some(ProfilingSession {
            sequencer,
            flush_scheduler,
            pipeline,
            cleanup,
            registry: self.registry,
            shut_down: false,
        }))
    }
}

/// A running profiler. Dropping it shuts it down.
pub struct ProfilingSession {
    sequencer: RecordingSequencer,
    flush_scheduler: Option<FlushScheduler>,
    pipeline: PipelineHandle,
    cleanup: Arc<DirCleanup>,
    registry: Arc<SpanRegistry>,
    shut_down: bool,
}

impl ProfilingSession {
    #[must_use]
    pub fn registry(&self) -> &Arc<SpanRegistry> {
        &self.registry
    }

    /// Whether recordings are still rotating (false after the escape hatch or
    /// a recorder failure ended the loop).
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.sequencer.is_running()
    }

    /// Stop recording, process the last file, flush every exporter and sweep
    /// the output directory.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Some(recorder) = self.sequencer.stop() {
            info!("Profiler stopped after {} recordings", recorder.files_written());
        }
        if let Some(mut scheduler) = self.flush_scheduler.take() {
            scheduler.stop();
        }
        self.pipeline.shutdown();
        self.cleanup.shutdown_sweep();
    }
}

impl Drop for ProfilingSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
