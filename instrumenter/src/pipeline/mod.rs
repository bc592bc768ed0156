//! Extractor pipeline run at span start and end.
//!
//! A pipeline is the ordered set of hooks an [`Instrumenter`] invokes around
//! an operation: attribute extractors, the name policy, the status policy,
//! the error-cause policy, link extractors and context customizers. All hooks
//! are read-only with respect to the request and response they observe; their
//! only outputs are attributes, names, statuses and derived contexts.
//!
//! Hooks run on the instrumented caller's thread. A panic inside one hook is
//! caught, logged and dropped so the span still completes and the remaining
//! hooks still run.
//!
//! [`Instrumenter`]: crate::Instrumenter

use std::error::Error;
use std::panic;

use crate::attributes::AttributeMap;
use crate::inst_error;
use crate::suppression::SpanKey;
use crate::Context;

mod error_cause;
mod links;
mod name;
mod status;

pub use error_cause::{ErrorCauseExtractor, IdentityCauseExtractor, WrapperCauseExtractor};
pub use links::SpanLinksExtractor;
pub use name::{FallbackNameExtractor, SpanNameExtractor};
pub use status::{DefaultStatusExtractor, SpanStatusExtractor};

/// Populates span attributes from the request at start and from the outcome
/// at end.
///
/// Both hooks default to no-ops so an extractor can contribute to only one
/// side. Extractors run in registration order against a shared attribute map,
/// so when two extractors write the same key the later registered one wins.
/// An extractor that cannot find a field in the request simply omits the
/// attribute.
pub trait AttributesExtractor<Req, Res>: Send + Sync {
    /// The semantic kind this extractor classifies its pipeline as, used for
    /// suppression. At most one extractor per pipeline may return a key.
    fn span_key(&self) -> Option<SpanKey> {
        None
    }

    /// Populates attributes available before the operation runs.
    #[allow(unused_variables)]
    fn on_start(&self, attributes: &mut AttributeMap, parent_cx: &Context, request: &Req) {}

    /// Populates attributes available once the operation finished.
    #[allow(unused_variables)]
    fn on_end(
        &self,
        attributes: &mut AttributeMap,
        cx: &Context,
        request: &Req,
        response: Option<&Res>,
        error: Option<&(dyn Error + 'static)>,
    ) {
    }
}

/// Derives the returned context further once the span has started.
///
/// Customizers run after attribute extraction with the context that already
/// carries the new span, and may attach additional values to it.
pub trait ContextCustomizer<Req>: Send + Sync {
    /// Returns the context to hand back to the caller.
    fn customize(&self, cx: Context, request: &Req, start_attributes: &AttributeMap) -> Context;
}

impl<Req, F> ContextCustomizer<Req> for F
where
    F: Fn(Context, &Req, &AttributeMap) -> Context + Send + Sync,
{
    fn customize(&self, cx: Context, request: &Req, start_attributes: &AttributeMap) -> Context {
        self(cx, request, start_attributes)
    }
}

/// Runs one pipeline hook, containing any panic it raises.
///
/// Returns the hook's output, or `None` when the hook panicked; callers fall
/// back to a default in that case.
pub(crate) fn run_hook<T>(stage: &'static str, hook: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(panic::AssertUnwindSafe(hook)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic payload");
            inst_error!(
                name: "Pipeline.HookPanicked",
                stage = stage,
                message = format!("pipeline hook panicked, output dropped: {reason}")
            );
            None
        }
    }
}
