//! CLI argument definitions

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    parse_duration, Configuration, DataFormat, DEFAULT_MAX_RETAINED_FILES, DEFAULT_STACK_DEPTH,
};
use crate::domain::ConfigError;

#[derive(Parser, Debug)]
#[command(
    name = "spanprof",
    version,
    about = "Correlate sampled stacks with trace spans and export them as log records",
    after_help = "\
EXAMPLES:
    spanprof process spanprof_1_20240229T134507.sprec    Export an existing recording
    spanprof --cpu-format pprof process *.sprec          Export as gzipped pprof
    spanprof --memory demo --for 30s                     Profile a synthetic workload
    SPANPROF_DIRECTORY=/tmp/prof spanprof demo           Environment fallback"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub profiler: ProfilerArgs,

    /// Append exported records as JSON lines to FILE instead of stdout
    #[arg(long, short, value_name = "FILE", global = true)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export recording files that were written earlier
    Process {
        /// Recording files, processed in the given order
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },
    /// Run a synthetic multi-threaded workload under the profiler
    Demo {
        /// How long the workload runs
        #[arg(long = "for", default_value = "10s", value_parser = parse_duration_arg)]
        run_for: Duration,

        /// Number of worker threads
        #[arg(long, default_value = "4")]
        threads: usize,
    },
}

/// Profiler knobs shared by every subcommand
#[derive(ClapArgs, Debug)]
pub struct ProfilerArgs {
    /// Directory for recording files
    #[arg(long, env = "SPANPROF_DIRECTORY", default_value = ".", global = true)]
    pub directory: PathBuf,

    /// Length of each recording before rotation (e.g. 20s, 500ms)
    #[arg(long, env = "SPANPROF_RECORDING_DURATION", default_value = "20s", value_parser = parse_duration_arg, global = true)]
    pub recording_duration: Duration,

    /// Leave processed recording files on disk
    #[arg(long, env = "SPANPROF_KEEP_FILES", global = true)]
    pub keep_files: bool,

    /// Retained file cap when --keep-files is set (oldest evicted first)
    #[arg(long, env = "SPANPROF_MAX_RETAINED_FILES", default_value_t = DEFAULT_MAX_RETAINED_FILES, global = true)]
    pub max_retained_files: usize,

    /// Maximum captured frames per stack
    #[arg(long, env = "SPANPROF_STACK_DEPTH", default_value_t = DEFAULT_STACK_DEPTH, global = true)]
    pub stack_depth: usize,

    /// Encoding of CPU records: text or pprof-gzip-base64
    #[arg(long, env = "SPANPROF_CPU_DATA_FORMAT", default_value = "text", value_parser = parse_format_arg, global = true)]
    pub cpu_format: DataFormat,

    /// Encoding of allocation records: text or pprof-gzip-base64
    #[arg(long, env = "SPANPROF_MEMORY_DATA_FORMAT", default_value = "text", value_parser = parse_format_arg, global = true)]
    pub memory_format: DataFormat,

    /// Keep the profiler's own frames in exported stacks
    #[arg(long, env = "SPANPROF_INCLUDE_AGENT_INTERNALS", global = true)]
    pub include_agent_internals: bool,

    /// Keep runtime and process entry frames in exported stacks
    #[arg(long, env = "SPANPROF_INCLUDE_RUNTIME_INTERNALS", global = true)]
    pub include_runtime_internals: bool,

    /// Only export stacks of threads inside a span
    #[arg(long, env = "SPANPROF_TRACING_STACKS_ONLY", global = true)]
    pub tracing_stacks_only: bool,

    /// Record allocation events
    #[arg(long, env = "SPANPROF_MEMORY_ENABLED", global = true)]
    pub memory: bool,

    /// Thread dump period (e.g. 10s)
    #[arg(long, env = "SPANPROF_CALL_STACK_INTERVAL", default_value = "10s", value_parser = parse_duration_arg, global = true)]
    pub call_stack_interval: Duration,

    /// Raw event setting override, repeatable: <event>#<setting>=<value>
    #[arg(long = "event-setting", value_name = "KEY=VALUE", global = true)]
    pub event_settings: Vec<String>,
}

fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

fn parse_format_arg(raw: &str) -> Result<DataFormat, String> {
    raw.parse().map_err(|e: ConfigError| e.to_string())
}

impl ProfilerArgs {
    /// Resolve the flags into an enabled [`Configuration`].
    ///
    /// # Errors
    /// Returns an error if an `--event-setting` is malformed
    pub fn to_configuration(&self) -> Result<Configuration, ConfigError> {
        let mut config = Configuration {
            enabled: true,
            directory: self.directory.clone(),
            recording_duration: self.recording_duration,
            keep_files: self.keep_files,
            max_retained_files: self.max_retained_files,
            stack_depth: self.stack_depth,
            cpu_data_format: self.cpu_format,
            allocation_data_format: self.memory_format,
            include_agent_internal_stacks: self.include_agent_internals,
            include_runtime_internal_stacks: self.include_runtime_internals,
            tracing_stacks_only: self.tracing_stacks_only,
            memory_enabled: self.memory,
            call_stack_interval: self.call_stack_interval,
            ..Configuration::default()
        };
        for raw in &self.event_settings {
            config.add_event_override(raw)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_subcommand_with_global_flags() {
        let args = Args::try_parse_from([
            "spanprof",
            "process",
            "a.sprec",
            "b.sprec",
            "--cpu-format",
            "pprof",
            "--event-setting",
            "spanprof.ThreadDump#period=5s",
        ])
        .unwrap();

        let Command::Process { files } = &args.command else {
            panic!("expected process subcommand");
        };
        assert_eq!(files.len(), 2);

        let config = args.profiler.to_configuration().unwrap();
        assert!(config.enabled);
        assert_eq!(config.cpu_data_format, DataFormat::PprofGzipBase64);
        assert_eq!(config.allocation_data_format, DataFormat::Text);
        assert_eq!(
            config.event_overrides.get("spanprof.ThreadDump#period").map(String::as_str),
            Some("5s")
        );
    }

    #[test]
    fn test_demo_defaults() {
        let args = Args::try_parse_from(["spanprof", "demo", "--for", "2s", "--memory"]).unwrap();
        let Command::Demo { run_for, threads } = args.command else {
            panic!("expected demo subcommand");
        };
        assert_eq!(run_for, Duration::from_secs(2));
        assert_eq!(threads, 4);
        assert!(args.profiler.memory);
        assert_eq!(args.profiler.recording_duration, Duration::from_secs(20));
    }

    #[test]
    fn test_bad_event_setting_is_rejected() {
        let args =
            Args::try_parse_from(["spanprof", "process", "a.sprec", "--event-setting", "nonsense"]).unwrap();
        assert!(args.profiler.to_configuration().is_err());
    }

    #[test]
    fn test_process_requires_files() {
        assert!(Args::try_parse_from(["spanprof", "process"]).is_err());
    }
}
