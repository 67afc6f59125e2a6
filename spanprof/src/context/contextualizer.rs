use log::trace;
use std::sync::Arc;

use super::SpanRegistry;
use crate::domain::{SpanContext, ThreadId};
use crate::events::{ContextChange, ContextDirection};

/// Resolves the span active on a thread at sample time.
///
/// Reads go straight to the shared [`SpanRegistry`]. Recorded context changes
/// are replayed into the same registry, in sample-time order, by the event
/// processing chain.
#[derive(Debug, Clone)]
pub struct SpanContextualizer {
    registry: Arc<SpanRegistry>,
}

impl SpanContextualizer {
    #[must_use]
    pub fn new(registry: Arc<SpanRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SpanRegistry> {
        &self.registry
    }

    /// Innermost span active on `thread`, if any.
    #[must_use]
    pub fn link(&self, thread: ThreadId) -> Option<SpanContext> {
        self.registry.active(thread).filter(SpanContext::is_valid)
    }

    /// Apply a recorded span enter/exit.
    pub fn update_context(&self, change: &ContextChange) {
        match change.direction {
            ContextDirection::In => self.registry.enter(change.thread_id, change.span),
            ContextDirection::Out => {
                if !self.registry.exit(change.thread_id, &change.span) {
                    trace!("Span {} left thread {} without entering", change.span, change.thread_id);
                }
            }
        }
    }
}
