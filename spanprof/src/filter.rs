//! Frame origin classification and stack filtering.
//!
//! Samples carry frames from three kinds of code, and exported stacks are more
//! useful when the noise is removed:
//!
//! - **Agent internal** - the profiler's own machinery (`spanprof::`, stack capture)
//! - **Runtime internal** - the language runtime and process entry (`std::`,
//!   `core::`, `__rust_*`, `_start`, `start_thread`, ...) and frames the
//!   symbolizer could not name
//! - **Application** - everything else
//!
//! # Classification Strategy
//!
//! 1. **File path patterns** - Most reliable when debug info is available
//!    - `/rustc/`, `.rustup/toolchains/` → runtime internal
//!    - `.cargo/registry/.../backtrace-` → agent internal (capture frames)
//!
//! 2. **Function name prefixes** - Fallback when file paths unavailable
//!
//! Filtering is per frame and order preserving: a dropped frame does not take
//! the frames it called with it.

use crate::events::StackFrame;

/// Origin of a stack frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameOrigin {
    /// The profiler's own code
    AgentInternal,
    /// Language runtime, allocator shims and process/thread entry points
    RuntimeInternal,
    /// The profiled application and its libraries
    Application,
    /// Unresolved address or missing symbol
    #[default]
    Unknown,
}

// =============================================================================
// CLASSIFICATION TABLES
// =============================================================================

/// Function prefixes of the profiler itself
const AGENT_PREFIXES: &[&str] = &["spanprof::", "spanprof_common::", "backtrace::"];

/// Function prefixes of the runtime
const RUNTIME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "__rust_",
    "rust_begin_unwind",
    "_start",
    "__libc_start",
    "start_thread",
    "clone3",
    "__clone",
    "<unknown>",
];

/// Source path fragments of the runtime
const RUNTIME_PATH_PATTERNS: &[&str] = &["/rustc/", ".rustup/toolchains/", "/glibc-", "/sysdeps/"];

/// Source path fragments of the profiler's dependencies used for capture
const AGENT_PATH_PATTERNS: &[&str] = &["/backtrace-0.", "/spanprof/src/", "/spanprof-common/src/"];

/// Classify a frame by its function name and source file.
#[must_use]
pub fn classify_frame(function: &str, file: Option<&str>) -> FrameOrigin {
    if function.is_empty() || function.starts_with("0x") {
        return FrameOrigin::Unknown;
    }

    if let Some(path) = file {
        if AGENT_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
            return FrameOrigin::AgentInternal;
        }
        if RUNTIME_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
            return FrameOrigin::RuntimeInternal;
        }
    }

    if AGENT_PREFIXES.iter().any(|p| function.starts_with(p)) {
        return FrameOrigin::AgentInternal;
    }
    if RUNTIME_PREFIXES.iter().any(|p| function.starts_with(p)) {
        return FrameOrigin::RuntimeInternal;
    }
    FrameOrigin::Application
}

/// Drops agent-internal and/or runtime-internal frames from stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackTraceFilter {
    include_agent_internal: bool,
    include_runtime_internal: bool,
}

impl StackTraceFilter {
    #[must_use]
    pub fn new(include_agent_internal: bool, include_runtime_internal: bool) -> Self {
        Self { include_agent_internal, include_runtime_internal }
    }

    #[must_use]
    pub fn includes(&self, frame: &StackFrame) -> bool {
        match classify_frame(&frame.function, frame.file.as_deref()) {
            FrameOrigin::AgentInternal => self.include_agent_internal,
            FrameOrigin::RuntimeInternal => self.include_runtime_internal,
            FrameOrigin::Application | FrameOrigin::Unknown => true,
        }
    }

    /// Keep the included frames, in their original order.
    #[must_use]
    pub fn filter(&self, frames: &[StackFrame]) -> Vec<StackFrame> {
        frames.iter().filter(|f| self.includes(f)).cloned().collect()
    }

    /// Same as [`StackTraceFilter::filter`], reusing the vector.
    #[must_use]
    pub fn filter_owned(&self, mut frames: Vec<StackFrame>) -> Vec<StackFrame> {
        frames.retain(|f| self.includes(f));
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> Vec<StackFrame> {
        vec![
            StackFrame::new("backtrace::backtrace::trace"),
            StackFrame::new("spanprof::native::sink::SampleSink::capture"),
            StackFrame::new("myapp::handler::process").with_location("src/handler.rs", 10),
            StackFrame::new("std::thread::Builder::spawn_unchecked_"),
            StackFrame::new("myapp::main").with_location("src/main.rs", 3),
            StackFrame::new("__libc_start_main"),
        ]
    }

    fn names(frames: &[StackFrame]) -> Vec<&str> {
        frames.iter().map(|f| f.function.as_str()).collect()
    }

    #[test]
    fn test_classification_by_prefix() {
        assert_eq!(classify_frame("spanprof::recording::Recorder::stop", None), FrameOrigin::AgentInternal);
        assert_eq!(classify_frame("core::ops::function::FnOnce::call_once", None), FrameOrigin::RuntimeInternal);
        assert_eq!(classify_frame("myapp::db::query", None), FrameOrigin::Application);
        assert_eq!(classify_frame("0x7f0012345678", None), FrameOrigin::Unknown);
    }

    #[test]
    fn test_classification_by_path_wins() {
        let origin =
            classify_frame("inner_helper", Some("/rustc/abc123/library/std/src/rt.rs"));
        assert_eq!(origin, FrameOrigin::RuntimeInternal);
    }

    #[test]
    fn test_default_filter_keeps_application_frames_in_order() {
        let filtered = StackTraceFilter::new(false, false).filter(&frames());
        assert_eq!(names(&filtered), vec!["myapp::handler::process", "myapp::main"]);
    }

    #[test]
    fn test_include_agent_internal_retains_agent_frames() {
        let filtered = StackTraceFilter::new(true, false).filter(&frames());
        assert_eq!(
            names(&filtered),
            vec![
                "backtrace::backtrace::trace",
                "spanprof::native::sink::SampleSink::capture",
                "myapp::handler::process",
                "myapp::main",
            ]
        );
    }

    #[test]
    fn test_include_everything_is_identity() {
        let filtered = StackTraceFilter::new(true, true).filter_owned(frames());
        assert_eq!(filtered, frames());
    }

    #[test]
    fn test_frames_are_filtered_independently() {
        // A runtime frame between two application frames does not drop its callees
        let filtered = StackTraceFilter::new(false, false).filter(&[
            StackFrame::new("myapp::leaf"),
            StackFrame::new("core::ops::function::FnOnce::call_once"),
            StackFrame::new("myapp::root"),
        ]);
        assert_eq!(names(&filtered), vec!["myapp::leaf", "myapp::root"]);
    }
}
