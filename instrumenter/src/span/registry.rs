//! Span lineage tracking within a [`Context`].
//!
//! Every context carries an optional chain of span entries, one per
//! instrumented operation that is still in scope. The chain is a shared
//! immutable list: deriving a child context pushes a new head node and leaves
//! every existing node untouched, so sibling contexts never observe each
//! other's spans. The suppression engine walks this chain to find still
//! recording ancestors of a given [`SpanKey`].

use std::sync::Arc;

use crate::span::{SpanContext, SpanRecord};
use crate::suppression::SpanKey;
use crate::Context;

/// A node in a context's span ancestor chain.
///
/// `key` is the suppression classification of the pipeline that created the
/// span. Propagated remote entries carry no key, so they parent new spans but
/// never suppress them.
#[derive(Debug)]
pub(crate) struct SpanLineage {
    pub(crate) key: Option<SpanKey>,
    pub(crate) record: SpanRecord,
    pub(crate) parent: Option<Arc<SpanLineage>>,
}

impl Context {
    /// Returns a reference to this context's span record, if one is set.
    ///
    /// # Examples
    ///
    /// ```
    /// use instrumenter::Context;
    ///
    /// let cx = Context::new();
    /// assert!(cx.span().is_none());
    /// ```
    pub fn span(&self) -> Option<&SpanRecord> {
        self.span.as_ref().map(|lineage| &lineage.record)
    }

    /// Returns whether or not a span has been set on this context.
    pub fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    /// Returns a copy of this context with the propagated span context
    /// included.
    ///
    /// This is how extracted upstream trace identity enters a context. The
    /// remote entry participates in parenting, so spans started under the
    /// returned context continue the upstream trace, but it never suppresses
    /// anything.
    pub fn with_remote_span_context(&self, span_context: SpanContext) -> Self {
        self.with_span_entry(None, SpanRecord::propagated(span_context))
    }

    pub(crate) fn with_span_entry(&self, key: Option<SpanKey>, record: SpanRecord) -> Self {
        self.with_lineage(SpanLineage {
            key,
            record,
            parent: self.span.clone(),
        })
    }

    /// Walks the span chain most-recent-first and returns the first still
    /// recording entry classified as `key`. Entries that already ended and
    /// entries with a different (or no) key are skipped.
    pub(crate) fn nearest_recording(&self, key: SpanKey) -> Option<&SpanRecord> {
        let mut node = self.span.as_deref();
        while let Some(lineage) = node {
            if lineage.key == Some(key) && lineage.record.is_recording() {
                return Some(&lineage.record);
            }
            node = lineage.parent.as_deref();
        }
        None
    }
}

/// Access to the local root span of the current trace fragment.
///
/// The local root is the first span started in this process for a given
/// request, the one whose parent is remote or absent. Enrichment code deep in
/// a request often wants to annotate that entry span rather than whatever
/// nested span happens to be current, so the engine stores it as a regular
/// context value when it starts.
///
/// # Examples
///
/// ```
/// use instrumenter::{Context, LocalRootSpan};
///
/// fn handle_checkout(cx: &Context) {
///     if let Some(root) = LocalRootSpan::from_context(cx) {
///         root.set_attribute(instrumenter::KeyValue::new("app.tenant", "acme"));
///     }
/// }
/// # handle_checkout(&Context::new());
/// ```
#[derive(Clone, Debug)]
pub struct LocalRootSpan(SpanRecord);

impl LocalRootSpan {
    /// Returns the local root span record stored in `cx`, if any.
    pub fn from_context(cx: &Context) -> Option<&SpanRecord> {
        cx.get::<LocalRootSpan>().map(|root| &root.0)
    }

    /// A span started under `parent_cx` becomes a local root when the parent
    /// chain holds no span, or only a propagated remote one.
    pub(crate) fn is_local_root(parent_cx: &Context) -> bool {
        match parent_cx.span() {
            Some(record) => {
                let sc = record.span_context();
                !sc.is_valid() || sc.is_remote()
            }
            None => true,
        }
    }

    pub(crate) fn store(cx: &Context, record: &SpanRecord) -> Context {
        cx.with_value(LocalRootSpan(record.clone()))
    }
}
