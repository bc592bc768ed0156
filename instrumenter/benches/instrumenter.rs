use std::borrow::Cow;
use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use instrumenter::pipeline::AttributesExtractor;
use instrumenter::propagation::{TextMapPropagator, TraceContextPropagator};
use instrumenter::span::{NoopSpanSink, SpanKind};
use instrumenter::{AttributeMap, Context, Instrumenter, KeyValue, SpanKey};

// Run this benchmark with:
// cargo bench --bench instrumenter

struct Request;

struct RequestAttributes;

impl AttributesExtractor<Request, ()> for RequestAttributes {
    fn span_key(&self) -> Option<SpanKey> {
        Some(SpanKey::HttpClient)
    }

    fn on_start(&self, attributes: &mut AttributeMap, _cx: &Context, _request: &Request) {
        attributes.insert(KeyValue::new("http.request.method", "GET"));
        attributes.insert(KeyValue::new("server.address", "localhost"));
    }
}

fn pipeline() -> Instrumenter<Request, ()> {
    Instrumenter::builder(|_: &Request| Cow::Borrowed("GET"))
        .with_kind(SpanKind::Client)
        .with_attributes_extractor(RequestAttributes)
        .with_sink(NoopSpanSink::new())
        .build()
        .expect("pipeline assembles")
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrumenter");

    let instrumenter = pipeline();

    group.bench_function("start_end_span", |b| {
        let root = Context::new();
        b.iter(|| {
            let cx = instrumenter.start(&root, &Request);
            instrumenter.end(&cx, &Request, Some(&()), None);
        });
    });

    group.bench_function("should_start_allowed", |b| {
        let root = Context::new();
        b.iter(|| {
            black_box(instrumenter.should_start(&root, &Request));
        });
    });

    // The suppressed path runs on every nested call of a layered client, so
    // it has to stay cheap.
    group.bench_function("should_start_suppressed", |b| {
        let parent = instrumenter.start(&Context::new(), &Request);
        b.iter(|| {
            black_box(instrumenter.should_start(&parent, &Request));
        });
    });

    group.bench_function("inject_traceparent", |b| {
        let propagator = TraceContextPropagator::new();
        let cx = instrumenter.start(&Context::new(), &Request);
        let mut headers = HashMap::new();
        b.iter(|| {
            propagator.inject_context(&cx, &mut headers);
        });
    });

    group.bench_function("extract_traceparent", |b| {
        let propagator = TraceContextPropagator::new();
        let mut headers = HashMap::new();
        headers.insert(
            "traceparent".to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        );
        let base = Context::new();
        b.iter(|| {
            black_box(propagator.extract_with_context(&base, &headers));
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(1))
        .measurement_time(std::time::Duration::from_secs(2));
    targets = criterion_benchmark
}
criterion_main!(benches);
