//! Span records and their identity.
//!
//! A span is the recorded, timed, attributed representation of one logical
//! operation. The orchestrator creates a [`SpanRecord`] at operation start,
//! extractors and interception code mutate it while it is current, and `end`
//! seals it into an immutable [`SpanData`] payload for the configured sink.

use std::borrow::Cow;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::attributes::AttributeMap;
use crate::common::KeyValue;

mod id_generator;
mod identity;
pub(crate) mod registry;
mod sink;

#[cfg(any(feature = "testing", test))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use identity::{SpanContext, SpanId, TraceFlags, TraceId};
pub use registry::LocalRootSpan;
pub use sink::{InMemorySpanSink, NoopSpanSink, SpanSink};

/// `SpanKind` describes the relationship between the span, its parents, and
/// its children in a trace.
///
/// A single span should not serve more than one purpose: a server-side span
/// should not double as the parent of an outgoing remote call. Interception
/// code creates a new span before serializing identity for a remote call.
#[derive(Clone, Debug, PartialEq)]
pub enum SpanKind {
    /// The span describes a request to some remote service. This span is
    /// usually the parent of a remote `SpanKind::Server` span and does not
    /// end until the response is received.
    Client,

    /// The span covers server-side handling of a synchronous RPC or other
    /// remote request. This span is often the child of a remote
    /// `SpanKind::Client` span that was expected to wait for a response.
    Server,

    /// The span describes the initiator of an asynchronous request. This
    /// parent span will often end before the corresponding child
    /// `SpanKind::Consumer` span, possibly even before the child span starts.
    Producer,

    /// The span describes a child of an asynchronous `SpanKind::Producer`
    /// request.
    Consumer,

    /// Default value.
    ///
    /// The span represents an internal operation within an application, as
    /// opposed to an operation with remote parents or children.
    Internal,
}

/// The status of a span.
///
/// These values form a total order: Ok > Error > Unset. This means that
/// setting `Status::Ok` will override any prior or future attempts to set a
/// status with `Status::Error` or `Status::Unset`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd)]
pub enum Status {
    /// The default status.
    Unset,

    /// The operation contains an error.
    Error {
        /// The description of the error
        description: Cow<'static, str>,
    },

    /// The operation has been validated to have completed successfully.
    Ok,
}

impl Status {
    /// Create a new error status with a given description.
    ///
    /// # Examples
    ///
    /// ```
    /// use instrumenter::span::Status;
    ///
    /// // record error with `str` description
    /// let error_status = Status::error("something went wrong");
    ///
    /// // or with `String` description
    /// let error_status = Status::error(format!("too many foos: {}", 42));
    /// # drop(error_status);
    /// ```
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Unset
    }
}

/// A causal reference to another span, recorded at start time.
///
/// Links connect spans that are related but not in a parent/child
/// relationship, such as a batch consumer span referring to the producer
/// spans of every message in the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanLink {
    /// Identity of the linked span.
    pub span_context: SpanContext,
    /// Attributes describing the link.
    pub attributes: Vec<KeyValue>,
}

impl SpanLink {
    /// Create a new link to `span_context` carrying `attributes`.
    pub fn new(span_context: SpanContext, attributes: Vec<KeyValue>) -> Self {
        SpanLink {
            span_context,
            attributes,
        }
    }
}

/// The payload of one finished (or still recording) span.
///
/// While an operation is in flight its `SpanData` lives inside the
/// [`SpanRecord`] handle; `end` moves it out and hands it to the sink, after
/// which nothing in this engine touches it again.
#[derive(Clone, Debug)]
pub struct SpanData {
    /// Identity of this span.
    pub span_context: SpanContext,
    /// Span id of the parent, or [`SpanId::INVALID`] for a trace root.
    pub parent_span_id: SpanId,
    /// Operation name. Mutable until end for router-style late renames.
    pub name: Cow<'static, str>,
    /// Semantic kind of the operation.
    pub kind: SpanKind,
    /// Wall-clock start time.
    pub start_time: SystemTime,
    /// Wall-clock end time. Equal to `start_time` until the span ends.
    pub end_time: SystemTime,
    /// Ordered attributes, last write wins per key.
    pub attributes: AttributeMap,
    /// Links recorded at start.
    pub links: Vec<SpanLink>,
    /// Completion status.
    pub status: Status,
    /// Root-cause message of the recorded error, if the operation failed.
    pub recorded_error: Option<String>,
}

/// Handle to the mutable-until-ended record of one operation.
///
/// Handles are cheap to clone and all clones share the same underlying
/// record. While the record is recording, mutation goes through any handle;
/// `end` takes the payload out exactly once, so a second `end` and every
/// post-end mutation observe an empty slot and do nothing.
///
/// A handle can also represent a propagated-only remote span, which carries
/// identity for child spans and injection but never records.
#[derive(Clone, Debug)]
pub struct SpanRecord {
    span_context: SpanContext,
    inner: Option<Arc<Mutex<Option<SpanData>>>>,
}

impl SpanRecord {
    pub(crate) fn recording(data: SpanData) -> Self {
        SpanRecord {
            span_context: data.span_context.clone(),
            inner: Some(Arc::new(Mutex::new(Some(data)))),
        }
    }

    pub(crate) fn propagated(span_context: SpanContext) -> Self {
        SpanRecord {
            span_context,
            inner: None,
        }
    }

    /// Identity of this span.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    pub(crate) fn with_data<T>(&self, f: impl FnOnce(&mut SpanData) -> T) -> Option<T> {
        let inner = self.inner.as_ref()?;
        // A poisoned lock means a mutating thread panicked; degrade to the
        // ended state instead of propagating.
        let mut guard = inner.lock().ok()?;
        guard.as_mut().map(f)
    }

    /// Returns `true` while the record accepts mutation, i.e. it was started
    /// locally and has not yet ended.
    pub fn is_recording(&self) -> bool {
        self.with_data(|_| ()).is_some()
    }

    /// Set an attribute on the record. Last write wins per key. No-op after
    /// end.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.with_data(|data| data.attributes.insert(attribute));
    }

    /// Updates the operation name. No-op after end.
    pub fn update_name<T>(&self, new_name: T)
    where
        T: Into<Cow<'static, str>>,
    {
        let name = new_name.into();
        self.with_data(move |data| data.name = name);
    }

    /// Sets the status of the record.
    ///
    /// Statuses form a total order, so `Status::Ok` is final once set.
    pub fn set_status(&self, status: Status) {
        self.with_data(|data| {
            if status > data.status {
                data.status = status;
            }
        });
    }

    /// Records the failure that ended this operation. No-op after end.
    pub fn record_error(&self, error: &dyn Error) {
        let message = error.to_string();
        self.with_data(move |data| data.recorded_error = Some(message));
    }

    pub(crate) fn end(&self) -> Option<SpanData> {
        self.end_with_timestamp(SystemTime::now())
    }

    pub(crate) fn end_with_timestamp(&self, timestamp: SystemTime) -> Option<SpanData> {
        let inner = self.inner.as_ref()?;
        let mut guard = inner.lock().ok()?;
        let mut data = guard.take()?;
        data.end_time = timestamp;
        Some(data)
    }
}
