//! An in-process instrumentation engine for library interception code.
//!
//! # Overview
//!
//! This crate is the core that instrumentation authors program against when
//! they wrap a library operation (an HTTP request, a database statement, a
//! message delivery) in a span. It deliberately contains no exporter, no
//! sampler and no knowledge of any particular library: interception code
//! supplies request and response types plus small extractor values, and the
//! engine handles everything that is easy to get wrong at that boundary.
//!
//! Here's a breakdown of its components:
//!
//! - **[`Context`]:** an immutable, cheaply clonable bag of typed values that
//!   carries the active span chain across call frames, threads and `await`
//!   points. A thread's *current* context is a dynamic-extent binding managed
//!   by guards, so the engine itself stays purely functional over explicit
//!   context parameters.
//! - **[`propagation`]:** carrier adapters that read a remote parent from
//!   header-like maps and write the active span's identity back out,
//!   including a copy-on-write path for carriers that refuse in-place
//!   mutation.
//! - **[`span`]:** the span record and its identity types, the id sources
//!   and the [`SpanSink`] boundary behind which an exporter of your choice
//!   lives.
//! - **[`pipeline`]:** ordered, pluggable extractors contributing attributes
//!   at start and end, plus the name, status, link and error-cause policies.
//!   Hooks are panic-isolated; a broken extractor costs its output, never
//!   the instrumented call.
//! - **Suppression ([`SpanKey`], [`Suppression`]):** layered clients
//!   (a high-level API wrapping an instrumented transport) produce one span
//!   per logical operation instead of nested duplicates of the same kind.
//! - **[`CallDepth`]:** a re-entrancy guard for libraries whose public entry
//!   points call each other.
//! - **[`Instrumenter`]:** the orchestrator gluing the above together behind
//!   the three-call contract `should_start` / `start` / `end`.
//! - **[`completion`]:** adapters that defer `end` to a callback, a future's
//!   resolution or per-element iterator consumption, exactly once, with
//!   cancellation on drop.
//!
//! # Getting started
//!
//! ```
//! use std::borrow::Cow;
//! use std::collections::HashMap;
//!
//! use instrumenter::pipeline::AttributesExtractor;
//! use instrumenter::propagation::{TextMapPropagator, TraceContextPropagator};
//! use instrumenter::span::{InMemorySpanSink, SpanKind};
//! use instrumenter::{AttributeMap, Context, Instrumenter, KeyValue, SpanKey};
//!
//! struct HttpRequest {
//!     method: &'static str,
//!     url: &'static str,
//!     headers: HashMap<String, String>,
//! }
//!
//! struct HttpAttributes;
//!
//! impl AttributesExtractor<HttpRequest, u16> for HttpAttributes {
//!     fn span_key(&self) -> Option<SpanKey> {
//!         Some(SpanKey::HttpClient)
//!     }
//!
//!     fn on_start(&self, attributes: &mut AttributeMap, _cx: &Context, request: &HttpRequest) {
//!         attributes.insert(KeyValue::new("http.request.method", request.method));
//!     }
//!
//!     fn on_end(
//!         &self,
//!         attributes: &mut AttributeMap,
//!         _cx: &Context,
//!         _request: &HttpRequest,
//!         response: Option<&u16>,
//!         _error: Option<&(dyn std::error::Error + 'static)>,
//!     ) {
//!         if let Some(status) = response {
//!             attributes.insert(KeyValue::new("http.response.status_code", *status as i64));
//!         }
//!     }
//! }
//!
//! let sink = InMemorySpanSink::new();
//! let instrumenter: Instrumenter<HttpRequest, u16> =
//!     Instrumenter::builder(|r: &HttpRequest| Cow::Owned(format!("{} {}", r.method, r.url)))
//!         .with_kind(SpanKind::Client)
//!         .with_attributes_extractor(HttpAttributes)
//!         .with_sink(sink.clone())
//!         .build()
//!         .unwrap();
//!
//! let mut request = HttpRequest {
//!     method: "GET",
//!     url: "/users",
//!     headers: HashMap::new(),
//! };
//!
//! let parent_cx = Context::current();
//! if instrumenter.should_start(&parent_cx, &request) {
//!     let cx = instrumenter.start(&parent_cx, &request);
//!     // hand the span identity to the downstream service
//!     TraceContextPropagator::new().inject_context(&cx, &mut request.headers);
//!     instrumenter.end(&cx, &request, Some(&200), None);
//! }
//!
//! assert!(request.headers.contains_key("traceparent"));
//! assert_eq!(sink.get_finished_spans().len(), 1);
//! ```
//!
//! # Asynchronous operations
//!
//! When the outcome surfaces later than the interception site, hand the
//! started context to an adapter from the [`completion`] module instead of
//! calling `end` inline. Whichever of success, failure, timeout or
//! cancellation happens first ends the span; everything after that is a
//! no-op.
//!
//! # Feature flags
//!
//! * `internal-logs` (default): engine self-diagnostics via `tracing`.
//!   Disabling it compiles the diagnostics out entirely.
//! * `testing`: deterministic helpers such as the incrementing id generator,
//!   for use in instrumentation test suites.
//!
//! # Supported Rust Versions
//!
//! This crate is built against the latest stable release. The minimum
//! supported version is 1.75. The current version is not guaranteed to build
//! on Rust versions earlier than the minimum supported version.
//!
//! [`SpanSink`]: crate::span::SpanSink
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![allow(clippy::needless_doctest_main)]
#![cfg_attr(
    docsrs,
    feature(doc_cfg, doc_auto_cfg),
    deny(rustdoc::broken_intra_doc_links)
)]
#![cfg_attr(test, deny(warnings))]

mod context;

pub use context::{
    Context, ContextGuard, FutureContextExt, SinkContextExt, StreamContextExt, WithContext,
};

mod common;

pub use common::{Array, Key, KeyValue, StringValue, Value};

mod attributes;

pub use attributes::AttributeMap;

mod suppression;

pub use suppression::{SpanKey, Suppression};

mod call_depth;

pub use call_depth::CallDepth;

mod internal_logging;

pub mod completion;

pub mod metrics;

pub mod pipeline;

pub mod propagation;

pub mod span;

pub use span::LocalRootSpan;

mod instrumenter;

pub use crate::instrumenter::{
    AssemblyError, Instrumenter, InstrumenterBuilder, OperationTimer, SpanMode,
};

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
