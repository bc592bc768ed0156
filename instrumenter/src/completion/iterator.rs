use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Context, ContextGuard, Instrumenter};

/// Marks one logical result set so that only its first traversal is
/// instrumented.
///
/// The owner of the result set keeps the gate next to the data and passes it
/// to [`MaybeInstrumented::first_traversal`] whenever a traversal begins.
/// The claim is a plain atomic flag, not a lock: it keeps repeat and
/// concurrent traversals out of the instrumented path best-effort, it does
/// not serialize them.
#[derive(Debug, Default)]
pub struct TraversalGate {
    claimed: AtomicBool,
}

impl TraversalGate {
    /// Creates an unclaimed gate.
    pub fn new() -> Self {
        TraversalGate::default()
    }

    /// Returns `true` for the first caller and `false` for every later one.
    pub fn try_claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }
}

struct InFlight<Req> {
    cx: Context,
    request: Req,
    guard: ContextGuard,
}

/// An iterator of requests with one span per consumed element.
///
/// Yielding an element starts its span and attaches the span's context as
/// current, so that work done between this `next` call and the following one
/// attributes to the element. The following `next` call, exhaustion, or
/// dropping the iterator ends the outstanding span and restores the previous
/// current context.
///
/// Elements are requests of the wrapped pipeline; `Req: Clone` because the
/// element is both yielded to the caller and retained until its span ends.
pub struct InstrumentedIterator<I, Req, Res> {
    iter: I,
    instrumenter: Instrumenter<Req, Res>,
    parent_cx: Context,
    in_flight: Option<InFlight<Req>>,
}

impl<I, Req, Res> InstrumentedIterator<I, Req, Res> {
    /// Wraps `iter` so every consumed element is spanned under `parent_cx`.
    pub fn new(iter: I, instrumenter: Instrumenter<Req, Res>, parent_cx: Context) -> Self {
        InstrumentedIterator {
            iter,
            instrumenter,
            parent_cx,
            in_flight: None,
        }
    }

    fn end_in_flight(&mut self) {
        if let Some(InFlight { cx, request, guard }) = self.in_flight.take() {
            // Restore the previous current context before ending.
            drop(guard);
            self.instrumenter.end(&cx, &request, None, None);
        }
    }
}

impl<I, Req, Res> Iterator for InstrumentedIterator<I, Req, Res>
where
    I: Iterator<Item = Req>,
    Req: Clone,
{
    type Item = Req;

    fn next(&mut self) -> Option<Req> {
        self.end_in_flight();
        let item = self.iter.next()?;
        if self.instrumenter.should_start(&self.parent_cx, &item) {
            let cx = self.instrumenter.start(&self.parent_cx, &item);
            let guard = cx.clone().attach();
            self.in_flight = Some(InFlight {
                cx,
                request: item.clone(),
                guard,
            });
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<I, Req, Res> Drop for InstrumentedIterator<I, Req, Res> {
    fn drop(&mut self) {
        self.end_in_flight();
    }
}

impl<I, Req, Res> fmt::Debug for InstrumentedIterator<I, Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedIterator")
            .field("in_flight", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

/// A traversal that is either instrumented or passed through untouched.
pub enum MaybeInstrumented<I, Req, Res> {
    /// First traversal of the result set, instrumented per element.
    Instrumented(InstrumentedIterator<I, Req, Res>),
    /// Repeat traversal, yielded unchanged.
    Raw(I),
}

impl<I, Req, Res> MaybeInstrumented<I, Req, Res> {
    /// Instruments `iter` only when `gate` has not been claimed yet.
    pub fn first_traversal(
        iter: I,
        instrumenter: Instrumenter<Req, Res>,
        parent_cx: Context,
        gate: &TraversalGate,
    ) -> Self {
        if gate.try_claim() {
            MaybeInstrumented::Instrumented(InstrumentedIterator::new(
                iter,
                instrumenter,
                parent_cx,
            ))
        } else {
            MaybeInstrumented::Raw(iter)
        }
    }
}

impl<I, Req, Res> Iterator for MaybeInstrumented<I, Req, Res>
where
    I: Iterator<Item = Req>,
    Req: Clone,
{
    type Item = Req;

    fn next(&mut self) -> Option<Req> {
        match self {
            MaybeInstrumented::Instrumented(iter) => iter.next(),
            MaybeInstrumented::Raw(iter) => iter.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            MaybeInstrumented::Instrumented(iter) => iter.size_hint(),
            MaybeInstrumented::Raw(iter) => iter.size_hint(),
        }
    }
}

impl<I, Req, Res> fmt::Debug for MaybeInstrumented<I, Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeInstrumented::Instrumented(iter) => {
                f.debug_tuple("Instrumented").field(iter).finish()
            }
            MaybeInstrumented::Raw(_) => f.debug_tuple("Raw").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    use crate::span::{InMemorySpanSink, SpanContext, SpanId, SpanKind, TraceFlags, TraceId};
    use crate::suppression::SpanKey;
    use crate::AttributeMap;

    #[derive(Clone, Debug)]
    struct Delivery {
        offset: i64,
    }

    struct OffsetExtractor;

    impl crate::pipeline::AttributesExtractor<Delivery, ()> for OffsetExtractor {
        fn span_key(&self) -> Option<SpanKey> {
            Some(SpanKey::ConsumerProcess)
        }

        fn on_start(
            &self,
            attributes: &mut AttributeMap,
            _parent_cx: &Context,
            delivery: &Delivery,
        ) {
            attributes.insert(crate::KeyValue::new("messaging.kafka.offset", delivery.offset));
        }
    }

    fn consumer(sink: InMemorySpanSink) -> Instrumenter<Delivery, ()> {
        Instrumenter::builder(|_: &Delivery| Cow::Borrowed("process orders"))
            .with_kind(SpanKind::Consumer)
            .with_attributes_extractor(OffsetExtractor)
            .with_sink(sink)
            .build()
            .unwrap()
    }

    fn deliveries() -> Vec<Delivery> {
        vec![
            Delivery { offset: 10 },
            Delivery { offset: 11 },
            Delivery { offset: 12 },
        ]
    }

    #[test]
    fn each_consumed_element_gets_its_own_span() {
        let sink = InMemorySpanSink::new();
        let iter =
            InstrumentedIterator::new(deliveries().into_iter(), consumer(sink.clone()), Context::new());

        let consumed: Vec<Delivery> = iter.collect();

        assert_eq!(consumed.len(), 3);
        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 3);
        let offsets: Vec<_> = spans
            .iter()
            .map(|span| span.attributes.get("messaging.kafka.offset").cloned())
            .collect();
        assert_eq!(
            offsets,
            vec![
                Some(crate::Value::I64(10)),
                Some(crate::Value::I64(11)),
                Some(crate::Value::I64(12)),
            ]
        );
    }

    #[test]
    fn previous_span_ends_when_the_next_element_is_consumed() {
        let sink = InMemorySpanSink::new();
        let mut iter =
            InstrumentedIterator::new(deliveries().into_iter(), consumer(sink.clone()), Context::new());

        let _first = iter.next();
        assert!(sink.get_finished_spans().is_empty());

        let _second = iter.next();
        assert_eq!(sink.get_finished_spans().len(), 1);

        drop(iter);
        assert_eq!(sink.get_finished_spans().len(), 2);
    }

    #[test]
    fn consumption_runs_under_the_element_span() {
        let sink = InMemorySpanSink::new();
        let iter =
            InstrumentedIterator::new(deliveries().into_iter(), consumer(sink.clone()), Context::new());

        let mut observed = Vec::new();
        for _delivery in iter {
            observed.push(Context::current().has_active_span());
        }

        assert_eq!(observed, vec![true, true, true]);
        assert!(!Context::current().has_active_span());
    }

    #[test]
    fn element_spans_continue_the_receive_trace() {
        let sink = InMemorySpanSink::new();
        let remote = SpanContext::new(
            TraceId::from(0xfeed),
            SpanId::from(0xbeef),
            TraceFlags::SAMPLED,
            true,
        );
        let parent_cx = Context::new().with_remote_span_context(remote);
        let iter =
            InstrumentedIterator::new(deliveries().into_iter(), consumer(sink.clone()), parent_cx);

        let _consumed: Vec<Delivery> = iter.collect();

        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 3);
        for span in &spans {
            assert_eq!(span.span_context.trace_id(), TraceId::from(0xfeed));
            assert_eq!(span.parent_span_id, SpanId::from(0xbeef));
        }
    }

    #[test]
    fn only_the_first_traversal_is_instrumented() {
        let sink = InMemorySpanSink::new();
        let instrumenter = consumer(sink.clone());
        let gate = TraversalGate::new();

        let first = MaybeInstrumented::first_traversal(
            deliveries().into_iter(),
            instrumenter.clone(),
            Context::new(),
            &gate,
        );
        assert!(matches!(&first, MaybeInstrumented::Instrumented(_)));
        assert_eq!(first.count(), 3);

        let second = MaybeInstrumented::first_traversal(
            deliveries().into_iter(),
            instrumenter,
            Context::new(),
            &gate,
        );
        assert!(matches!(&second, MaybeInstrumented::Raw(_)));
        assert_eq!(second.count(), 3);

        assert_eq!(sink.get_finished_spans().len(), 3);
    }

    #[test]
    fn disabled_pipeline_yields_elements_untouched() {
        let sink = InMemorySpanSink::new();
        let instrumenter = Instrumenter::builder(|_: &Delivery| Cow::Borrowed("process orders"))
            .with_attributes_extractor(OffsetExtractor)
            .with_enabled(false)
            .with_sink(sink.clone())
            .build()
            .unwrap();
        let iter = InstrumentedIterator::new(deliveries().into_iter(), instrumenter, Context::new());

        let consumed: Vec<Delivery> = iter.collect();

        assert_eq!(consumed.len(), 3);
        assert!(sink.get_finished_spans().is_empty());
    }
}
