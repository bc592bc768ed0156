//! Span suppression.
//!
//! Many libraries are layered: a high-level client wraps a lower-level
//! transport that is independently instrumented. Without suppression the same
//! logical request yields duplicate nested spans of identical kind, inflating
//! trace depth without adding information. The suppression engine walks the
//! ancestor chain carried by the parent [`Context`] and skips span creation
//! when a still recording ancestor of the same semantic kind already covers
//! the operation.

use crate::Context;

/// Enumerated semantic kind of a pipeline, used purely for suppression.
///
/// A pipeline's classifying extractor (or a builder override) attaches one of
/// these; a new span is suppressed when an unended ancestor holds the same
/// key. The key is deliberately separate from [`SpanKind`]: a pipeline may
/// pretend to be a different key for suppression purposes while reporting
/// another visible kind.
///
/// [`SpanKind`]: crate::span::SpanKind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpanKey {
    /// Incoming server-side handling of a remote request.
    Server,
    /// Outgoing HTTP request.
    HttpClient,
    /// Database statement execution.
    DbClient,
    /// Outgoing RPC call.
    RpcClient,
    /// Message publish to a broker.
    MessagingProducer,
    /// Message receive (poll) stage of a consumer.
    ConsumerReceive,
    /// Per-message processing stage of a consumer.
    ConsumerProcess,
}

/// Strategy deciding whether an ancestor chain already covers a new span.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Suppression {
    /// Never suppress. The opt-out for pipelines that want nested same-kind
    /// spans recorded anyway.
    None,

    /// Suppress when a still recording ancestor carries the same [`SpanKey`]
    /// as this pipeline. Ancestors that already ended do not suppress, and a
    /// pipeline without a classifying key is never suppressed.
    #[default]
    BySpanKey,
}

impl Suppression {
    pub(crate) fn should_suppress(&self, parent_cx: &Context, key: Option<SpanKey>) -> bool {
        match self {
            Suppression::None => false,
            Suppression::BySpanKey => match key {
                Some(key) => parent_cx.nearest_recording(key).is_some(),
                None => false,
            },
        }
    }
}
