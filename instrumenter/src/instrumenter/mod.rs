//! The orchestrator tying names, attributes, suppression, records and sinks
//! into one span lifecycle.
//!
//! An [`Instrumenter`] is assembled once per instrumented library through
//! [`InstrumenterBuilder`] and then drives every operation through the same
//! three calls: [`should_start`] decides, [`start`] opens the span and
//! returns the context to run under, [`end`] seals the span and delivers it.
//! Interception code never touches records or the suppression state
//! directly.
//!
//! [`should_start`]: Instrumenter::should_start
//! [`start`]: Instrumenter::start
//! [`end`]: Instrumenter::end

use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::attributes::AttributeMap;
use crate::inst_debug;
use crate::metrics::OperationMetrics;
use crate::pipeline::{
    run_hook, AttributesExtractor, ContextCustomizer, ErrorCauseExtractor, SpanLinksExtractor,
    SpanNameExtractor, SpanStatusExtractor,
};
use crate::span::{
    IdGenerator, LocalRootSpan, SpanContext, SpanData, SpanId, SpanKind, SpanLink, SpanRecord,
    SpanSink, Status, TraceFlags,
};
use crate::suppression::{SpanKey, Suppression};
use crate::Context;

mod builder;

pub use builder::{AssemblyError, InstrumenterBuilder};

/// Name given to a span whose name policy panicked.
const FALLBACK_SPAN_NAME: &str = "unnamed_operation";

/// When the orchestrator materializes a span record for an operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SpanMode {
    /// Record a span for every started operation.
    #[default]
    Always,

    /// Record a span only for operations that fail.
    ///
    /// `start` captures an [`OperationTimer`] instead of creating a record
    /// and `end` synthesizes a span with the timer's bounds when an error is
    /// present. Successful operations leave no span but still feed duration
    /// metrics. Operations in this mode are invisible to their descendants:
    /// they neither parent nor suppress other spans.
    OnError,
}

/// Paired wall-clock and monotonic capture of an operation's start.
///
/// The wall clock provides span timestamps; the monotonic clock provides
/// durations that cannot go negative when the system clock steps.
#[derive(Clone, Copy, Debug)]
pub struct OperationTimer {
    started_at: SystemTime,
    started_instant: Instant,
}

impl OperationTimer {
    pub(crate) fn start() -> Self {
        OperationTimer {
            started_at: SystemTime::now(),
            started_instant: Instant::now(),
        }
    }

    /// Wall-clock time the operation started.
    pub fn start_time(&self) -> SystemTime {
        self.started_at
    }

    /// Monotonic time elapsed since the operation started.
    pub fn elapsed(&self) -> Duration {
        self.started_instant.elapsed()
    }

    /// Wall-clock end bound derived from the monotonic elapsed time.
    pub(crate) fn end_time(&self) -> SystemTime {
        self.started_at + self.elapsed()
    }
}

/// Start-time capture of an error-only operation, carried in the returned
/// context until `end` decides whether a span materializes.
#[derive(Clone, Debug)]
struct DeferredSpan {
    inner: Arc<DeferredSpanInner>,
}

#[derive(Debug)]
struct DeferredSpanInner {
    timer: OperationTimer,
    name: Cow<'static, str>,
    attributes: AttributeMap,
    links: Vec<SpanLink>,
    parent: Option<SpanContext>,
    ended: AtomicBool,
}

/// Orchestrates the span lifecycle for one instrumented library.
///
/// An `Instrumenter` owns the whole pipeline configured for one kind of
/// operation: the name policy, attribute and link extractors, the status and
/// error-cause policies, suppression, metrics, the sink and the id source.
/// It is cheap to clone; clones share the pipeline.
///
/// # Examples
///
/// ```
/// use std::borrow::Cow;
///
/// use instrumenter::span::{InMemorySpanSink, SpanKind};
/// use instrumenter::{Context, Instrumenter};
///
/// #[derive(Debug)]
/// struct Query {
///     statement: &'static str,
/// }
///
/// let sink = InMemorySpanSink::new();
/// let instrumenter: Instrumenter<Query, u64> =
///     Instrumenter::builder(|_: &Query| Cow::Borrowed("SELECT"))
///         .with_kind(SpanKind::Client)
///         .with_sink(sink.clone())
///         .build()?;
///
/// let query = Query { statement: "SELECT 1" };
/// let parent_cx = Context::current();
/// if instrumenter.should_start(&parent_cx, &query) {
///     let cx = instrumenter.start(&parent_cx, &query);
///     // run the operation under `cx`, then:
///     instrumenter.end(&cx, &query, Some(&1), None);
/// }
///
/// assert_eq!(sink.get_finished_spans().len(), 1);
/// # Ok::<(), instrumenter::AssemblyError>(())
/// ```
pub struct Instrumenter<Req, Res> {
    inner: Arc<InstrumenterInner<Req, Res>>,
}

struct InstrumenterInner<Req, Res> {
    enabled: bool,
    span_name: Box<dyn SpanNameExtractor<Req>>,
    span_kind: SpanKind,
    span_mode: SpanMode,
    span_key: Option<SpanKey>,
    suppression: Suppression,
    extractors: Vec<Box<dyn AttributesExtractor<Req, Res>>>,
    links_extractors: Vec<Box<dyn SpanLinksExtractor<Req>>>,
    context_customizers: Vec<Box<dyn ContextCustomizer<Req>>>,
    status_extractor: Box<dyn SpanStatusExtractor<Req, Res>>,
    cause_extractor: Box<dyn ErrorCauseExtractor>,
    metrics: Vec<Box<dyn OperationMetrics>>,
    sink: Box<dyn SpanSink>,
    id_generator: Box<dyn IdGenerator>,
}

impl<Req, Res> Clone for Instrumenter<Req, Res> {
    fn clone(&self) -> Self {
        Instrumenter {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Res> fmt::Debug for Instrumenter<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumenter")
            .field("enabled", &self.inner.enabled)
            .field("span_kind", &self.inner.span_kind)
            .field("span_mode", &self.inner.span_mode)
            .field("span_key", &self.inner.span_key)
            .finish_non_exhaustive()
    }
}

impl<Req, Res> Instrumenter<Req, Res> {
    /// Starts assembling an instrumenter around the given name policy.
    pub fn builder<N>(span_name: N) -> InstrumenterBuilder<Req, Res>
    where
        N: SpanNameExtractor<Req> + 'static,
    {
        InstrumenterBuilder::new(span_name)
    }

    /// Returns `true` when a span should be started for `request` under
    /// `parent_cx`.
    ///
    /// The decision is pure: the instrumenter must be enabled and the
    /// configured [`Suppression`] strategy must not find a competing ancestor
    /// in `parent_cx`. Interception code gates [`start`] on this so that
    /// suppressed operations skip the pipeline entirely.
    ///
    /// [`start`]: Instrumenter::start
    pub fn should_start(&self, parent_cx: &Context, _request: &Req) -> bool {
        self.inner.enabled
            && !self
                .inner
                .suppression
                .should_suppress(parent_cx, self.inner.span_key)
    }

    /// Returns `true` when this instrumenter records operations at all.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Starts an operation and returns the context to run it under.
    ///
    /// The returned context carries the new span record (or, in
    /// [`SpanMode::OnError`], a timer standing in for it) and is the context
    /// that must later be passed to [`end`]. When the parent context carries
    /// a valid span, local or remote, the new span continues its trace;
    /// otherwise a new trace id is generated.
    ///
    /// `start` assumes [`should_start`] returned `true` and does not
    /// re-check suppression.
    ///
    /// [`end`]: Instrumenter::end
    /// [`should_start`]: Instrumenter::should_start
    pub fn start(&self, parent_cx: &Context, request: &Req) -> Context {
        let timer = OperationTimer::start();

        let name = run_hook("span_name", || self.inner.span_name.name(request))
            .unwrap_or(Cow::Borrowed(FALLBACK_SPAN_NAME));

        let mut attributes = AttributeMap::new();
        for extractor in &self.inner.extractors {
            run_hook("on_start", || {
                extractor.on_start(&mut attributes, parent_cx, request)
            });
        }

        let mut links = Vec::new();
        for extractor in &self.inner.links_extractors {
            run_hook("links", || extractor.extract(&mut links, parent_cx, request));
        }

        let parent = parent_cx
            .span()
            .map(|record| record.span_context().clone())
            .filter(|span_context| span_context.is_valid());

        let mut cx = match self.inner.span_mode {
            SpanMode::Always => {
                let record = SpanRecord::recording(SpanData {
                    span_context: self.child_span_context(parent.as_ref()),
                    parent_span_id: parent_span_id(parent.as_ref()),
                    name,
                    kind: self.inner.span_kind.clone(),
                    start_time: timer.start_time(),
                    end_time: timer.start_time(),
                    attributes: attributes.clone(),
                    links,
                    status: Status::Unset,
                    recorded_error: None,
                });
                let cx = parent_cx.with_span_entry(self.inner.span_key, record.clone());
                let cx = if LocalRootSpan::is_local_root(parent_cx) {
                    LocalRootSpan::store(&cx, &record)
                } else {
                    cx
                };
                cx.with_value(timer)
            }
            SpanMode::OnError => parent_cx.with_value(DeferredSpan {
                inner: Arc::new(DeferredSpanInner {
                    timer,
                    name,
                    attributes: attributes.clone(),
                    links,
                    parent,
                    ended: AtomicBool::new(false),
                }),
            }),
        };

        for customizer in &self.inner.context_customizers {
            if let Some(derived) = run_hook("context_customizer", || {
                customizer.customize(cx.clone(), request, &attributes)
            }) {
                cx = derived;
            }
        }
        cx
    }

    /// Ends the operation started with [`start`].
    ///
    /// `cx` must be the context [`start`] returned. Runs the `on_end`
    /// extractors, resolves the root cause and the status, seals the record,
    /// hands the finished [`SpanData`] to the sink and records the duration
    /// into every configured [`OperationMetrics`]. A second `end` for the
    /// same operation and an `end` on a context that carries no record are
    /// no-ops.
    ///
    /// [`start`]: Instrumenter::start
    pub fn end(
        &self,
        cx: &Context,
        request: &Req,
        response: Option<&Res>,
        error: Option<&(dyn Error + 'static)>,
    ) {
        let cause = error.map(|error| {
            run_hook("error_cause", || self.inner.cause_extractor.cause(error)).unwrap_or(error)
        });

        let mut end_attributes = AttributeMap::new();
        for extractor in &self.inner.extractors {
            run_hook("on_end", || {
                extractor.on_end(&mut end_attributes, cx, request, response, cause)
            });
        }

        let status = run_hook("span_status", || {
            self.inner.status_extractor.status(request, response, cause)
        })
        .unwrap_or(Status::Unset);

        match self.inner.span_mode {
            SpanMode::Always => self.end_recorded(cx, end_attributes, status, cause),
            SpanMode::OnError => self.end_deferred(cx, end_attributes, status, cause),
        }
    }

    fn end_recorded(
        &self,
        cx: &Context,
        end_attributes: AttributeMap,
        status: Status,
        cause: Option<&(dyn Error + 'static)>,
    ) {
        let Some(record) = cx.span() else {
            inst_debug!(
                name: "Instrumenter.EndWithoutRecord",
                message = "end called on a context that carries no span record"
            );
            return;
        };

        record.with_data(move |data| data.attributes.extend(end_attributes));
        if let Some(cause) = cause {
            record.record_error(cause);
        }
        record.set_status(status);

        let Some(data) = record.end() else {
            inst_debug!(
                name: "Instrumenter.DoubleEnd",
                message = "span record was already ended"
            );
            return;
        };

        let duration = operation_duration(cx, &data);
        for metrics in &self.inner.metrics {
            metrics.record(duration, &data.attributes);
        }
        self.inner.sink.submit(data);
    }

    fn end_deferred(
        &self,
        cx: &Context,
        end_attributes: AttributeMap,
        status: Status,
        cause: Option<&(dyn Error + 'static)>,
    ) {
        let Some(deferred) = cx.get::<DeferredSpan>() else {
            inst_debug!(
                name: "Instrumenter.EndWithoutRecord",
                message = "end called on a context that carries no pending operation"
            );
            return;
        };
        if deferred.inner.ended.swap(true, Ordering::SeqCst) {
            inst_debug!(
                name: "Instrumenter.DoubleEnd",
                message = "pending operation was already ended"
            );
            return;
        }

        let timer = deferred.inner.timer;
        let mut attributes = deferred.inner.attributes.clone();
        attributes.extend(end_attributes);

        if let Some(cause) = cause {
            let parent = deferred.inner.parent.as_ref();
            self.inner.sink.submit(SpanData {
                span_context: self.child_span_context(parent),
                parent_span_id: parent_span_id(parent),
                name: deferred.inner.name.clone(),
                kind: self.inner.span_kind.clone(),
                start_time: timer.start_time(),
                end_time: timer.end_time(),
                attributes: attributes.clone(),
                links: deferred.inner.links.clone(),
                status,
                recorded_error: Some(cause.to_string()),
            });
        }

        for metrics in &self.inner.metrics {
            metrics.record(timer.elapsed(), &attributes);
        }
    }

    fn child_span_context(&self, parent: Option<&SpanContext>) -> SpanContext {
        let (trace_id, trace_flags) = match parent {
            Some(parent) => (parent.trace_id(), parent.trace_flags()),
            // Locally rooted traces start sampled.
            None => (self.inner.id_generator.new_trace_id(), TraceFlags::SAMPLED),
        };
        SpanContext::new(
            trace_id,
            self.inner.id_generator.new_span_id(),
            trace_flags,
            false,
        )
    }
}

fn parent_span_id(parent: Option<&SpanContext>) -> SpanId {
    parent
        .map(|parent| parent.span_id())
        .unwrap_or(SpanId::INVALID)
}

fn operation_duration(cx: &Context, data: &SpanData) -> Duration {
    match cx.get::<OperationTimer>() {
        Some(timer) => timer.elapsed(),
        None => data
            .end_time
            .duration_since(data.start_time)
            .unwrap_or_default(),
    }
}
