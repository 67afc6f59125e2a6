//! # spanprof - Continuous Profiling with Trace Correlation
//!
//! spanprof records sampled thread stacks and allocations in fixed-length
//! recordings, pairs every sample with the trace span that was active on its
//! thread, and exports the result as log records (plain text stacks, or
//! gzipped pprof profiles encoded as base64).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Host Application                          │
//! │     SampleSink::enter_span / capture_stack / record_allocation  │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ raw events
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 NativeProfiler (BufferedProfiler)               │
//! │          start(settings) ... stop(id, path) → recording file    │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ RecordingSequencer rotates every duration
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          PathHandler                            │
//! │                                                                 │
//! │  RecordedEventStream ──▶ EventProcessingChain                   │
//! │                            │  (time-ordered replay)             │
//! │          ┌─────────────────┼──────────────────┐                 │
//! │          ▼                 ▼                  ▼                 │
//! │   SpanContextualizer  ThreadDumpProcessor  TLABProcessor        │
//! │                            │                  │                 │
//! │                            ▼                  ▼                 │
//! │                  CpuEventExporter   AllocationEventExporter     │
//! │                       (text | pprof)     (text | pprof)         │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         ▼
//!                LogProcessor ──▶ LogSink (JSON lines)
//! ```
//!
//! ## Module Structure
//!
//! - [`activator`]: configuration → running [`activator::ProfilingSession`]
//! - [`recording`]: recorder, rotation loop, escape hatch, file naming, cleanup
//! - [`native`]: the sampling subsystem boundary and its buffered implementation
//! - [`events`]: recorded event model and the lazy file-backed stream
//! - [`context`]: thread → span registry and stack/span linkage
//! - [`processing`]: the per-file event chain and its processors
//! - [`filter`]: agent/runtime frame classification
//! - [`export`]: text and pprof exporters
//! - [`logs`]: log records, processors and sinks
//! - [`config`], [`cli`], [`domain`]: configuration, flags, shared types and errors

pub mod activator;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod events;
pub mod export;
pub mod filter;
pub mod logs;
pub mod native;
pub mod processing;
pub mod recording;
