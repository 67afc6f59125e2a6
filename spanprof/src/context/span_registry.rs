//! Thread → active span map
//!
//! Each thread carries a stack of spans: entering a nested span pushes, leaving
//! pops, and lookups return the innermost one. The registry is shared through an
//! `Arc` with whoever observes span start/end (instrumentation hooks, or the
//! replay of recorded context events) and is owned by one profiling session.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::domain::{SpanContext, ThreadId};

#[derive(Debug, Default)]
pub struct SpanRegistry {
    threads: RwLock<HashMap<ThreadId, Vec<SpanContext>>>,
}

impl SpanRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `span` active on `thread`, nested inside whatever was active before.
    pub fn enter(&self, thread: ThreadId, span: SpanContext) {
        let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
        threads.entry(thread).or_default().push(span);
    }

    /// Remove `span` from `thread`.
    ///
    /// Spans normally end innermost-first, but out-of-order ends (a parent
    /// finishing before its child) remove the span wherever it sits. Returns
    /// false if the span was not active on that thread.
    pub fn exit(&self, thread: ThreadId, span: &SpanContext) -> bool {
        let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
        let Some(stack) = threads.get_mut(&thread) else {
            return false;
        };
        let Some(pos) = stack.iter().rposition(|s| s == span) else {
            return false;
        };
        stack.remove(pos);
        if stack.is_empty() {
            threads.remove(&thread);
        }
        true
    }

    /// Innermost span active on `thread`.
    #[must_use]
    pub fn active(&self, thread: ThreadId) -> Option<SpanContext> {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        threads.get(&thread).and_then(|stack| stack.last().copied())
    }

    /// Forget every span on `thread` (thread exited).
    pub fn clear_thread(&self, thread: ThreadId) {
        let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
        threads.remove(&thread);
    }

    /// Number of threads that currently have an active span.
    #[must_use]
    pub fn active_thread_count(&self) -> usize {
        self.threads.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SpanId, TraceId};
    use std::sync::Arc;

    fn span(n: u8) -> SpanContext {
        SpanContext::new(TraceId([n; 16]), SpanId([n; 8]), 1)
    }

    #[test]
    fn test_nested_spans_resolve_to_innermost() {
        let registry = SpanRegistry::new();
        let t = ThreadId(10);
        registry.enter(t, span(1));
        registry.enter(t, span(2));
        assert_eq!(registry.active(t), Some(span(2)));

        assert!(registry.exit(t, &span(2)));
        assert_eq!(registry.active(t), Some(span(1)));
        assert!(registry.exit(t, &span(1)));
        assert_eq!(registry.active(t), None);
        assert_eq!(registry.active_thread_count(), 0);
    }

    #[test]
    fn test_out_of_order_exit_removes_outer_span() {
        let registry = SpanRegistry::new();
        let t = ThreadId(1);
        registry.enter(t, span(1));
        registry.enter(t, span(2));
        assert!(registry.exit(t, &span(1)));
        assert_eq!(registry.active(t), Some(span(2)));
    }

    #[test]
    fn test_exit_of_unknown_span_is_noop() {
        let registry = SpanRegistry::new();
        assert!(!registry.exit(ThreadId(1), &span(1)));
        registry.enter(ThreadId(1), span(1));
        assert!(!registry.exit(ThreadId(1), &span(2)));
        assert_eq!(registry.active(ThreadId(1)), Some(span(1)));
    }

    #[test]
    fn test_threads_are_independent() {
        let registry = SpanRegistry::new();
        registry.enter(ThreadId(1), span(1));
        registry.enter(ThreadId(2), span(2));
        registry.clear_thread(ThreadId(1));
        assert_eq!(registry.active(ThreadId(1)), None);
        assert_eq!(registry.active(ThreadId(2)), Some(span(2)));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let registry = Arc::new(SpanRegistry::new());
        let handles: Vec<_> = (0..4u8)
            .map(|n| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let t = ThreadId(u64::from(n));
                    for _ in 0..1000 {
                        registry.enter(t, span(n + 1));
                        assert_eq!(registry.active(t), Some(span(n + 1)));
                        registry.exit(t, &span(n + 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.active_thread_count(), 0);
    }
}
