//! Profiler configuration
//!
//! [`Configuration`] is the fully resolved set of knobs the pipeline consumes.
//! The binary fills it from CLI flags and `SPANPROF_*` environment variables
//! (see [`crate::cli::Args`]); library users can build it directly starting
//! from [`Configuration::default`].

use log::info;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::ConfigError;
use crate::events::{
    EventSettings, ALLOCATION_IN_NEW_TLAB_EVENT_NAME, ALLOCATION_OUTSIDE_TLAB_EVENT_NAME,
    ALLOCATION_SAMPLE_EVENT_NAME, CONTEXT_ATTACHED_EVENT_NAME, EXECUTION_SAMPLE_EVENT_NAME,
    THREAD_DUMP_EVENT_NAME,
};

pub const DEFAULT_RECORDING_DURATION: Duration = Duration::from_secs(20);
pub const DEFAULT_CALL_STACK_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STACK_DEPTH: usize = 1024;
pub const DEFAULT_MAX_RETAINED_FILES: usize = 100;
pub const DEFAULT_PPROF_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Wire encoding of exported profiling records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    #[default]
    Text,
    PprofGzipBase64,
}

impl DataFormat {
    /// Value of the `profiling.data.format` attribute
    #[must_use]
    pub fn value(self) -> &'static str {
        match self {
            DataFormat::Text => "text",
            DataFormat::PprofGzipBase64 => "pprof-gzip-base64",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

impl FromStr for DataFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(DataFormat::Text),
            "pprof-gzip-base64" | "pprof" => Ok(DataFormat::PprofGzipBase64),
            other => Err(ConfigError::UnknownDataFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub enabled: bool,
    /// Directory where recording files are written
    pub directory: PathBuf,
    /// How long each recording runs before it is rotated
    pub recording_duration: Duration,
    /// Leave processed recording files on disk
    pub keep_files: bool,
    /// Cap on retained files when `keep_files` is set (oldest evicted first)
    pub max_retained_files: usize,
    pub stack_depth: usize,
    pub cpu_data_format: DataFormat,
    pub allocation_data_format: DataFormat,
    pub include_agent_internal_stacks: bool,
    pub include_runtime_internal_stacks: bool,
    /// Only export stacks of threads that had an active span
    pub tracing_stacks_only: bool,
    /// Enables allocation events
    pub memory_enabled: bool,
    /// Thread dump period
    pub call_stack_interval: Duration,
    /// Interval of the scheduled flush of pprof exporters
    pub pprof_flush_interval: Duration,
    /// Raw `<event>#<setting>=<value>` overrides, applied last
    pub event_overrides: BTreeMap<String, String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("."),
            recording_duration: DEFAULT_RECORDING_DURATION,
            keep_files: false,
            max_retained_files: DEFAULT_MAX_RETAINED_FILES,
            stack_depth: DEFAULT_STACK_DEPTH,
            cpu_data_format: DataFormat::Text,
            allocation_data_format: DataFormat::Text,
            include_agent_internal_stacks: false,
            include_runtime_internal_stacks: false,
            tracing_stacks_only: false,
            memory_enabled: false,
            call_stack_interval: DEFAULT_CALL_STACK_INTERVAL,
            pprof_flush_interval: DEFAULT_PPROF_FLUSH_INTERVAL,
            event_overrides: BTreeMap::new(),
        }
    }
}

impl Configuration {
    /// Event settings handed to the native profiler.
    ///
    /// Built from defaults, then the memory/call-stack options, then the raw
    /// overrides (which always win).
    #[must_use]
    pub fn event_settings(&self) -> EventSettings {
        let mut settings = EventSettings::new();

        settings.set_enabled(THREAD_DUMP_EVENT_NAME, true);
        settings.set_period(THREAD_DUMP_EVENT_NAME, self.call_stack_interval);
        // Thread dumps already carry every sampled stack
        settings.set_enabled(EXECUTION_SAMPLE_EVENT_NAME, false);
        settings.set_enabled(CONTEXT_ATTACHED_EVENT_NAME, true);

        for name in [
            ALLOCATION_IN_NEW_TLAB_EVENT_NAME,
            ALLOCATION_OUTSIDE_TLAB_EVENT_NAME,
            ALLOCATION_SAMPLE_EVENT_NAME,
        ] {
            settings.set_enabled(name, self.memory_enabled);
        }

        for (key, value) in &self.event_overrides {
            settings.insert(key.clone(), value.clone());
        }
        settings
    }

    /// Parse `<event>#<setting>=<value>` and add it to the overrides.
    ///
    /// # Errors
    /// Returns an error if the string has no `=` or an empty key
    pub fn add_event_override(&mut self, raw: &str) -> Result<(), ConfigError> {
        let (key, value) = parse_event_setting(raw)?;
        self.event_overrides.insert(key, value);
        Ok(())
    }
}

/// Split `key=value`, trimming both sides.
///
/// # Errors
/// Returns an error if there is no `=` or the key is empty
pub fn parse_event_setting(raw: &str) -> Result<(String, String), ConfigError> {
    let (key, value) =
        raw.split_once('=').ok_or_else(|| ConfigError::InvalidEventSetting(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidEventSetting(raw.to_string()));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Parse durations like `20s`, `500ms`, `1m`, `2h`, `10 s` or a bare number of
/// milliseconds.
///
/// # Errors
/// Returns an error for an unknown unit or a non-numeric value
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let s = raw.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;

    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(value)),
        "ns" => Ok(Duration::from_nanos(value)),
        "us" => Ok(Duration::from_micros(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" | "min" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        "d" => Ok(Duration::from_secs(value * 86_400)),
        _ => Err(ConfigError::InvalidDuration(raw.to_string())),
    }
}

/// Log the effective configuration once at startup.
pub fn log_configuration(config: &Configuration) {
    info!("-----------------------");
    info!("Profiler configuration:");
    info!("  enabled                  : {}", config.enabled);
    info!("  directory                : {}", config.directory.display());
    info!("  recording duration       : {:?}", config.recording_duration);
    info!("  keep files               : {}", config.keep_files);
    info!("  max retained files       : {}", config.max_retained_files);
    info!("  stack depth              : {}", config.stack_depth);
    info!("  cpu data format          : {}", config.cpu_data_format);
    info!("  allocation data format   : {}", config.allocation_data_format);
    info!("  include agent internals  : {}", config.include_agent_internal_stacks);
    info!("  include runtime internals: {}", config.include_runtime_internal_stacks);
    info!("  tracing stacks only      : {}", config.tracing_stacks_only);
    info!("  memory profiling         : {}", config.memory_enabled);
    info!("  call stack interval      : {:?}", config.call_stack_interval);
    for (key, value) in &config.event_overrides {
        info!("  override {key} = {value}");
    }
    info!("-----------------------");
}
