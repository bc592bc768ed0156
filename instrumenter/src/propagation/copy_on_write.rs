//! Injection into carriers that refuse in-place mutation.

use thiserror::Error;

use crate::propagation::{Injector, TextMapPropagator};
use crate::{inst_warn, Context};

/// The carrier refused an in-place write.
#[derive(Debug, Error)]
#[error("carrier is sealed and cannot be mutated in place")]
pub struct CarrierSealed;

/// An injection target that may refuse in-place writes.
///
/// Some transports hand out carriers that must not be mutated after a point
/// in their lifecycle. A message record polled from a broker and re-published
/// downstream is the usual case: its header block is shared with the consumer
/// loop, so a new record has to be built instead. Such carriers implement
/// [`try_set`] to refuse the write and [`rebuild`] to produce a fresh,
/// writable copy holding the current entries.
///
/// [`try_set`]: TrySetInjector::try_set
/// [`rebuild`]: TrySetInjector::rebuild
pub trait TrySetInjector: Sized {
    /// Attempts to add a key and value in place.
    fn try_set(&mut self, key: &str, value: String) -> Result<(), CarrierSealed>;

    /// Builds a fresh, writable carrier preserving the current entries.
    fn rebuild(&self) -> Self;
}

/// Tracks refusals while presenting a plain [`Injector`] to the propagator.
struct CopyOnWrite<'a, C> {
    carrier: &'a mut C,
    refused: bool,
}

impl<C: TrySetInjector> Injector for CopyOnWrite<'_, C> {
    fn set(&mut self, key: &str, value: String) {
        if self.carrier.try_set(key, value).is_err() {
            self.refused = true;
        }
    }
}

/// Injects `cx` into `carrier`, rebuilding the carrier once if it refuses.
///
/// If the carrier accepts all writes it is returned as-is. If any write is
/// refused, a writable copy is built via [`TrySetInjector::rebuild`] and
/// injection runs once more against the copy, which is returned in place of
/// the original. A second refusal is logged and ignored, so the caller always
/// gets a usable carrier back even when identity could not be attached.
pub fn inject_copy_on_write<C, P>(propagator: &P, cx: &Context, mut carrier: C) -> C
where
    C: TrySetInjector,
    P: TextMapPropagator + ?Sized,
{
    let mut attempt = CopyOnWrite {
        carrier: &mut carrier,
        refused: false,
    };
    propagator.inject_context(cx, &mut attempt);
    if !attempt.refused {
        return carrier;
    }

    let mut rebuilt = carrier.rebuild();
    let mut retry = CopyOnWrite {
        carrier: &mut rebuilt,
        refused: false,
    };
    propagator.inject_context(cx, &mut retry);
    if retry.refused {
        inst_warn!(
            name: "Propagation.CarrierRefusedTwice",
            message = "rebuilt carrier refused injection as well; span identity not attached"
        );
    }
    rebuilt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::trace_context::{TraceContextPropagator, TRACEPARENT_HEADER};
    use crate::span::{SpanContext, SpanId, TraceFlags, TraceId};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Header block that seals after construction, like a polled record.
    struct RecordHeaders {
        entries: HashMap<String, String>,
        sealed: bool,
        rebuilds: Arc<AtomicUsize>,
        reseal: bool,
    }

    impl RecordHeaders {
        fn writable() -> Self {
            RecordHeaders {
                entries: HashMap::new(),
                sealed: false,
                rebuilds: Arc::new(AtomicUsize::new(0)),
                reseal: false,
            }
        }

        fn sealed() -> Self {
            RecordHeaders {
                sealed: true,
                ..RecordHeaders::writable()
            }
        }

        fn permanently_sealed() -> Self {
            RecordHeaders {
                sealed: true,
                reseal: true,
                ..RecordHeaders::writable()
            }
        }
    }

    impl TrySetInjector for RecordHeaders {
        fn try_set(&mut self, key: &str, value: String) -> Result<(), CarrierSealed> {
            if self.sealed {
                return Err(CarrierSealed);
            }
            self.entries.insert(key.to_lowercase(), value);
            Ok(())
        }

        fn rebuild(&self) -> Self {
            self.rebuilds.fetch_add(1, Ordering::SeqCst);
            RecordHeaders {
                entries: self.entries.clone(),
                sealed: self.reseal,
                rebuilds: self.rebuilds.clone(),
                reseal: self.reseal,
            }
        }
    }

    fn cx_with_span() -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736u128),
            SpanId::from(0x00f0_67aa_0ba9_02b7u64),
            TraceFlags::SAMPLED,
            true,
        ))
    }

    #[test]
    fn writable_carrier_is_mutated_in_place() {
        let propagator = TraceContextPropagator::new();
        let carrier = inject_copy_on_write(&propagator, &cx_with_span(), RecordHeaders::writable());

        assert_eq!(
            carrier.entries.get(TRACEPARENT_HEADER).map(String::as_str),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );
        assert_eq!(carrier.rebuilds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sealed_carrier_is_rebuilt_once() {
        let propagator = TraceContextPropagator::new();
        let mut original = RecordHeaders::sealed();
        original
            .entries
            .insert("content-type".to_string(), "application/json".to_string());

        let carrier = inject_copy_on_write(&propagator, &cx_with_span(), original);

        // Existing entries survive the rebuild and the header lands in the copy.
        assert_eq!(
            carrier.entries.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert!(carrier.entries.contains_key(TRACEPARENT_HEADER));
        assert_eq!(carrier.rebuilds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_refusal_gives_up() {
        let propagator = TraceContextPropagator::new();
        let carrier = inject_copy_on_write(
            &propagator,
            &cx_with_span(),
            RecordHeaders::permanently_sealed(),
        );

        assert!(!carrier.entries.contains_key(TRACEPARENT_HEADER));
        assert_eq!(carrier.rebuilds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_span_means_no_writes() {
        let propagator = TraceContextPropagator::new();
        let carrier = inject_copy_on_write(&propagator, &Context::new(), RecordHeaders::sealed());

        assert!(carrier.entries.is_empty());
        assert_eq!(carrier.rebuilds.load(Ordering::SeqCst), 0);
    }
}
