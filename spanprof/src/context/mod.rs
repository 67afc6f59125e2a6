//! Span correlation
//!
//! - `span_registry`: the thread-safe thread → span map
//! - `contextualizer`: sample-time lookups and replay of recorded span changes
//! - `linkage`: the per-sample result handed to exporters

pub mod contextualizer;
pub mod linkage;
pub mod span_registry;

pub use contextualizer::SpanContextualizer;
pub use linkage::{format_raw_stack, AllocationDetails, AllocationLinkage, StackToSpanLinkage};
pub use span_registry::SpanRegistry;
