//! Event processing: correlation and dispatch of recorded events
//!
//! - `chain`: [`EventProcessingChain`], ordering and routing per recording file
//! - `thread_dump`: [`ThreadDumpProcessor`], CPU stacks
//! - `tlab`: [`TLABProcessor`], allocation stacks

pub mod chain;
pub mod thread_dump;
pub mod tlab;

pub use chain::{ChainStats, EventProcessingChain, MAX_BUFFERED_EVENTS};
pub use thread_dump::ThreadDumpProcessor;
pub use tlab::TLABProcessor;
