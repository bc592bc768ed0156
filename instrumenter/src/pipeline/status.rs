//! Span status policy.

use std::error::Error;

use crate::span::Status;

/// Derives the final span status from the operation's outcome.
pub trait SpanStatusExtractor<Req, Res>: Send + Sync {
    /// Returns the status for the finished operation.
    fn status(
        &self,
        request: &Req,
        response: Option<&Res>,
        error: Option<&(dyn Error + 'static)>,
    ) -> Status;
}

/// The default policy: a failure outcome marks the span as an error with the
/// error's display text, anything else leaves the status unset.
///
/// Pipelines whose responses encode failure in-band, such as an HTTP response
/// with a 5xx code, install their own response-aware policy instead.
#[derive(Debug, Default)]
pub struct DefaultStatusExtractor {
    _private: (),
}

impl DefaultStatusExtractor {
    /// Creates the default status policy.
    pub fn new() -> Self {
        DefaultStatusExtractor { _private: () }
    }
}

impl<Req, Res> SpanStatusExtractor<Req, Res> for DefaultStatusExtractor {
    fn status(
        &self,
        _request: &Req,
        _response: Option<&Res>,
        error: Option<&(dyn Error + 'static)>,
    ) -> Status {
        match error {
            Some(error) => Status::error(error.to_string()),
            None => Status::Unset,
        }
    }
}
