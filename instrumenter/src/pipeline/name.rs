//! Span naming policy.

use std::borrow::Cow;
use std::fmt;

/// Derives the span name from the request.
///
/// Names should be low-cardinality descriptions of the operation class, such
/// as `"GET /users/{id}"`, never of the single call.
pub trait SpanNameExtractor<Req>: Send + Sync {
    /// Returns the span name for `request`.
    fn name(&self, request: &Req) -> Cow<'static, str>;
}

impl<Req, F> SpanNameExtractor<Req> for F
where
    F: Fn(&Req) -> Cow<'static, str> + Send + Sync,
{
    fn name(&self, request: &Req) -> Cow<'static, str> {
        self(request)
    }
}

/// Name policy with a fixed default for requests the preferred policy cannot
/// name.
///
/// Semantic conventions usually want a templated name built from request
/// fields, degrading to a constant when a field is absent, for example
/// `"<verb> <route>"` degrading to just `"<verb>"` when no route template is
/// known. The preferred policy signals that by returning `None`.
pub struct FallbackNameExtractor<F> {
    preferred: F,
    default: Cow<'static, str>,
}

impl<F> FallbackNameExtractor<F> {
    /// Creates a policy trying `preferred` first and using `default` when it
    /// returns `None`.
    pub fn new(preferred: F, default: impl Into<Cow<'static, str>>) -> Self {
        FallbackNameExtractor {
            preferred,
            default: default.into(),
        }
    }
}

impl<F> fmt::Debug for FallbackNameExtractor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackNameExtractor")
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl<Req, F> SpanNameExtractor<Req> for FallbackNameExtractor<F>
where
    F: Fn(&Req) -> Option<Cow<'static, str>> + Send + Sync,
{
    fn name(&self, request: &Req) -> Cow<'static, str> {
        (self.preferred)(request).unwrap_or_else(|| self.default.clone())
    }
}
