use std::sync::Arc;

use thiserror::Error;

use crate::metrics::OperationMetrics;
use crate::pipeline::{
    AttributesExtractor, ContextCustomizer, DefaultStatusExtractor, ErrorCauseExtractor,
    IdentityCauseExtractor, SpanLinksExtractor, SpanNameExtractor, SpanStatusExtractor,
};
use crate::span::{IdGenerator, NoopSpanSink, RandomIdGenerator, SpanKind, SpanSink};
use crate::suppression::{SpanKey, Suppression};

use super::{Instrumenter, InstrumenterInner, SpanMode};

/// Errors detected while assembling an [`Instrumenter`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AssemblyError {
    /// Two attributes extractors both declared a span key for the pipeline.
    #[error(
        "extractors classify the pipeline as both {first:?} and {second:?}; \
         at most one extractor may declare a span key"
    )]
    ConflictingSpanKeys {
        /// Key declared by the earlier registered extractor.
        first: SpanKey,
        /// Key declared by the later registered extractor.
        second: SpanKey,
    },
}

/// Configures and assembles an [`Instrumenter`].
///
/// Obtained from [`Instrumenter::builder`] with the name policy, which is the
/// only required piece. Everything else defaults to the quietest choice:
/// kind [`SpanKind::Internal`], span-key suppression, no extractors, the
/// error-is-error status policy, no metrics and a sink that drops finished
/// spans.
pub struct InstrumenterBuilder<Req, Res> {
    span_name: Box<dyn SpanNameExtractor<Req>>,
    span_kind: SpanKind,
    span_mode: SpanMode,
    suppression: Suppression,
    suppression_alias: Option<SpanKey>,
    enabled: bool,
    extractors: Vec<Box<dyn AttributesExtractor<Req, Res>>>,
    links_extractors: Vec<Box<dyn SpanLinksExtractor<Req>>>,
    context_customizers: Vec<Box<dyn ContextCustomizer<Req>>>,
    status_extractor: Box<dyn SpanStatusExtractor<Req, Res>>,
    cause_extractor: Box<dyn ErrorCauseExtractor>,
    metrics: Vec<Box<dyn OperationMetrics>>,
    sink: Box<dyn SpanSink>,
    id_generator: Box<dyn IdGenerator>,
}

impl<Req, Res> std::fmt::Debug for InstrumenterBuilder<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumenterBuilder")
            .field("enabled", &self.enabled)
            .field("span_kind", &self.span_kind)
            .field("span_mode", &self.span_mode)
            .field("suppression", &self.suppression)
            .field("suppression_alias", &self.suppression_alias)
            .field("extractors", &self.extractors.len())
            .finish_non_exhaustive()
    }
}

impl<Req, Res> InstrumenterBuilder<Req, Res> {
    pub(super) fn new<N>(span_name: N) -> Self
    where
        N: SpanNameExtractor<Req> + 'static,
    {
        InstrumenterBuilder {
            span_name: Box::new(span_name),
            span_kind: SpanKind::Internal,
            span_mode: SpanMode::Always,
            suppression: Suppression::default(),
            suppression_alias: None,
            enabled: true,
            extractors: Vec::new(),
            links_extractors: Vec::new(),
            context_customizers: Vec::new(),
            status_extractor: Box::new(DefaultStatusExtractor::new()),
            cause_extractor: Box::new(IdentityCauseExtractor::new()),
            metrics: Vec::new(),
            sink: Box::new(NoopSpanSink::new()),
            id_generator: Box::new(RandomIdGenerator::default()),
        }
    }

    /// Sets the kind recorded on every span of this pipeline.
    pub fn with_kind(mut self, span_kind: SpanKind) -> Self {
        self.span_kind = span_kind;
        self
    }

    /// Sets when spans materialize, see [`SpanMode`].
    pub fn with_span_mode(mut self, span_mode: SpanMode) -> Self {
        self.span_mode = span_mode;
        self
    }

    /// Adds an attributes extractor. Extractors run in registration order,
    /// so a later extractor overwrites keys an earlier one set.
    pub fn with_attributes_extractor<E>(mut self, extractor: E) -> Self
    where
        E: AttributesExtractor<Req, Res> + 'static,
    {
        self.extractors.push(Box::new(extractor));
        self
    }

    /// Adds a links extractor, run once at span start.
    pub fn with_links_extractor<E>(mut self, extractor: E) -> Self
    where
        E: SpanLinksExtractor<Req> + 'static,
    {
        self.links_extractors.push(Box::new(extractor));
        self
    }

    /// Adds a customizer applied to the context returned from `start`.
    pub fn with_context_customizer<C>(mut self, customizer: C) -> Self
    where
        C: ContextCustomizer<Req> + 'static,
    {
        self.context_customizers.push(Box::new(customizer));
        self
    }

    /// Replaces the status policy applied at `end`.
    pub fn with_status_extractor<E>(mut self, extractor: E) -> Self
    where
        E: SpanStatusExtractor<Req, Res> + 'static,
    {
        self.status_extractor = Box::new(extractor);
        self
    }

    /// Replaces the error-cause policy applied at `end` before the status
    /// policy and the recorded error message.
    pub fn with_cause_extractor<E>(mut self, extractor: E) -> Self
    where
        E: ErrorCauseExtractor + 'static,
    {
        self.cause_extractor = Box::new(extractor);
        self
    }

    /// Adds a duration recorder fed on every `end`.
    pub fn with_metrics<M>(mut self, metrics: M) -> Self
    where
        M: OperationMetrics + 'static,
    {
        self.metrics.push(Box::new(metrics));
        self
    }

    /// Sets the sink that receives every finished span.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: SpanSink + 'static,
    {
        self.sink = Box::new(sink);
        self
    }

    /// Replaces the trace and span id source.
    pub fn with_id_generator<G>(mut self, id_generator: G) -> Self
    where
        G: IdGenerator + 'static,
    {
        self.id_generator = Box::new(id_generator);
        self
    }

    /// Enables or disables the pipeline. A disabled instrumenter refuses
    /// every `should_start`.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the suppression strategy consulted by `should_start`.
    pub fn with_suppression(mut self, suppression: Suppression) -> Self {
        self.suppression = suppression;
        self
    }

    /// Overrides the span key the pipeline suppresses under, regardless of
    /// what its classifying extractor declares.
    ///
    /// This lets an internal transport pipeline hide beneath a public kind:
    /// aliased to [`SpanKey::HttpClient`] it stays silent whenever an http
    /// client span is already in flight.
    pub fn with_suppression_alias(mut self, span_key: SpanKey) -> Self {
        self.suppression_alias = Some(span_key);
        self
    }

    /// Assembles the [`Instrumenter`].
    ///
    /// Fails when more than one registered attributes extractor declares a
    /// span key; a pipeline has at most one semantic kind.
    pub fn build(self) -> Result<Instrumenter<Req, Res>, AssemblyError> {
        let mut classified = None;
        for extractor in &self.extractors {
            let Some(key) = extractor.span_key() else {
                continue;
            };
            if let Some(first) = classified {
                return Err(AssemblyError::ConflictingSpanKeys { first, second: key });
            }
            classified = Some(key);
        }

        let span_key = self.suppression_alias.or(classified);

        Ok(Instrumenter {
            inner: Arc::new(InstrumenterInner {
                enabled: self.enabled,
                span_name: self.span_name,
                span_kind: self.span_kind,
                span_mode: self.span_mode,
                span_key,
                suppression: self.suppression,
                extractors: self.extractors,
                links_extractors: self.links_extractors,
                context_customizers: self.context_customizers,
                status_extractor: self.status_extractor,
                cause_extractor: self.cause_extractor,
                metrics: self.metrics,
                sink: self.sink,
                id_generator: self.id_generator,
            }),
        })
    }
}
