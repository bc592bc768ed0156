//! # W3C Trace Context Propagator
//!

use std::sync::OnceLock;

use crate::propagation::{Extractor, FieldIter, Injector, TextMapPropagator};
use crate::span::{SpanContext, SpanId, TraceFlags, TraceId};
use crate::Context;

const SUPPORTED_VERSION: u8 = 0;
const MAX_VERSION: u8 = 254;

/// The carrier key under which span identity travels.
pub const TRACEPARENT_HEADER: &str = "traceparent";

// TODO Replace this with LazyLock once it is stable.
static TRACE_CONTEXT_HEADER_FIELDS: OnceLock<[String; 1]> = OnceLock::new();

fn trace_context_header_fields() -> &'static [String; 1] {
    TRACE_CONTEXT_HEADER_FIELDS.get_or_init(|| [TRACEPARENT_HEADER.to_owned()])
}

/// Exact-length, lowercase-only hex as the header format requires.
fn valid_hex_field(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Propagates span identity in [W3C TraceContext] format under the
/// `traceparent` header.
///
/// The `traceparent` header represents the incoming request in a tracing
/// system in a common format, understood by all vendors. Here's an example of
/// a `traceparent` header.
///
/// `traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
///
/// It has four fields:
///
///    - version
///    - trace-id
///    - parent-id
///    - trace-flags
///
/// Extraction is total: a missing or malformed header never fails, it leaves
/// the given context without a remote parent so the operation starts a new
/// trace. When a carrier holds the header more than once, the last value
/// wins, matching the injection side where a later write replaces an earlier
/// one.
///
/// See the [w3c trace-context docs] for more details.
///
/// [w3c trace-context docs]: https://w3c.github.io/trace-context/
/// [W3C TraceContext]: https://www.w3.org/TR/trace-context/
#[derive(Clone, Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    /// Create a new `TraceContextPropagator`.
    pub fn new() -> Self {
        TraceContextPropagator { _private: () }
    }

    /// Extract span identity from a w3c trace-context header.
    fn extract_span_context(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let values = extractor.get_all(TRACEPARENT_HEADER).ok_or(())?;
        let header_value = values.last().ok_or(())?.trim();
        let parts = header_value.split_terminator('-').collect::<Vec<&str>>();
        // Ensure parts are not out of range.
        if parts.len() < 4 {
            return Err(());
        }

        // Ensure version is within range, for version 0 there must be 4 parts.
        if !valid_hex_field(parts[0], 2) {
            return Err(());
        }
        let version = u8::from_str_radix(parts[0], 16).map_err(|_| ())?;
        if version > MAX_VERSION || version == 0 && parts.len() != 4 {
            return Err(());
        }

        // Parse trace id section
        if !valid_hex_field(parts[1], 32) {
            return Err(());
        }
        let trace_id = TraceId::from_hex(parts[1]).map_err(|_| ())?;

        // Parse span id section
        if !valid_hex_field(parts[2], 16) {
            return Err(());
        }
        let span_id = SpanId::from_hex(parts[2]).map_err(|_| ())?;

        // Parse trace flags section
        if !valid_hex_field(parts[3], 2) {
            return Err(());
        }
        let opts = u8::from_str_radix(parts[3], 16).map_err(|_| ())?;

        // Ensure opts are valid for version 0
        if version == 0 && opts > 2 {
            return Err(());
        }

        // Build trace flags clearing all flags other than the trace-context
        // supported sampling bit.
        let trace_flags = TraceFlags::new(opts) & TraceFlags::SAMPLED;

        let span_context = SpanContext::new(trace_id, span_id, trace_flags, true);

        // Ensure span is valid
        if !span_context.is_valid() {
            return Err(());
        }

        Ok(span_context)
    }
}

impl TextMapPropagator for TraceContextPropagator {
    /// Properly encodes the values of the span identity in `cx` and injects
    /// them into the `Injector`.
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        if let Some(record) = cx.span() {
            let span_context = record.span_context();
            if span_context.is_valid() {
                let header_value = format!(
                    "{:02x}-{}-{}-{:02x}",
                    SUPPORTED_VERSION,
                    span_context.trace_id(),
                    span_context.span_id(),
                    span_context.trace_flags() & TraceFlags::SAMPLED
                );
                injector.set(TRACEPARENT_HEADER, header_value);
            }
        }
    }

    /// Retrieves encoded span identity using the `Extractor`. If no identity
    /// was retrieved OR if the retrieved identity is invalid then the given
    /// context is returned unchanged, without a remote parent.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.extract_span_context(extractor)
            .map(|sc| cx.with_remote_span_context(sc))
            .unwrap_or_else(|_| cx.clone())
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(trace_context_header_fields())
    }
}
