//! The hand-off boundary for finished span records.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::span::SpanData;

/// Receives finished span records.
///
/// The engine calls [`submit`] exactly once per ended span, on the thread
/// that ended it. Implementations are expected to hand the record off
/// quickly; batching, export and retry pipelines live behind this trait, not
/// in the engine.
///
/// [`submit`]: SpanSink::submit
pub trait SpanSink: Send + Sync + fmt::Debug {
    /// Accepts one finished span record.
    fn submit(&self, span: SpanData);
}

/// A sink that discards every record.
#[derive(Clone, Debug, Default)]
pub struct NoopSpanSink {
    _private: (),
}

impl NoopSpanSink {
    /// Creates a discarding sink.
    pub fn new() -> Self {
        NoopSpanSink { _private: () }
    }
}

impl SpanSink for NoopSpanSink {
    fn submit(&self, _span: SpanData) {}
}

/// An in-memory span sink that stores finished records in memory.
///
/// This sink is useful for testing and debugging purposes. Records can be
/// retrieved using the [`get_finished_spans`] method. Clones share the same
/// storage, so a clone kept by the test observes what the engine submits.
///
/// [`get_finished_spans`]: InMemorySpanSink::get_finished_spans
///
/// # Examples
///
/// ```
/// use instrumenter::span::{InMemorySpanSink, SpanSink};
///
/// let sink = InMemorySpanSink::new();
/// assert!(sink.get_finished_spans().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanSink {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        InMemorySpanSink::default()
    }

    /// Returns the finished spans as a vector of `SpanData`.
    pub fn get_finished_spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .map(|spans_guard| spans_guard.clone())
            .unwrap_or_default()
    }

    /// Clears the internal storage of finished spans.
    pub fn reset(&self) {
        let _ = self.spans.lock().map(|mut spans_guard| spans_guard.clear());
    }
}

impl SpanSink for InMemorySpanSink {
    fn submit(&self, span: SpanData) {
        let _ = self.spans.lock().map(|mut spans_guard| spans_guard.push(span));
    }
}
