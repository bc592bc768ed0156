//! Span link extraction.

use crate::span::SpanLink;
use crate::Context;

/// Contributes links to other spans when a span starts.
///
/// Links express causality that parenting cannot: a batch-processing span is
/// the child of its consumer loop, while the producers whose messages it
/// processes are attached as links extracted from the message headers.
pub trait SpanLinksExtractor<Req>: Send + Sync {
    /// Appends links derived from `request` to `links`.
    fn extract(&self, links: &mut Vec<SpanLink>, parent_cx: &Context, request: &Req);
}

impl<Req, F> SpanLinksExtractor<Req> for F
where
    F: Fn(&mut Vec<SpanLink>, &Context, &Req) + Send + Sync,
{
    fn extract(&self, links: &mut Vec<SpanLink>, parent_cx: &Context, request: &Req) {
        self(links, parent_cx, request)
    }
}
