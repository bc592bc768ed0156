//! Deferred completion for callbacks, futures and iterators.
//!
//! A synchronous interception site calls `start` and `end` around the
//! instrumented call. When the operation completes later, on another thread
//! or not at all, the `end` call has to be carried to wherever the outcome
//! surfaces first. The adapters in this module own that hand-off:
//!
//! * [`OperationEnder`] is the callback-shaped primitive: clones race to
//!   complete the operation and the first of success, failure or
//!   cancellation wins.
//! * [`InstrumentedFuture`] re-enters the captured context on every poll and
//!   completes the operation from the future's own resolution or drop.
//! * [`InstrumentedIterator`] spreads completion over the elements of a
//!   result set, one span per consumed element.
//!
//! Every adapter guarantees that the operation ends exactly once, including
//! when nothing completes it explicitly and the adapter is simply dropped.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Context, Instrumenter, KeyValue};

mod future;
mod iterator;

pub use future::{InstrumentedFuture, InstrumentedFutureExt};
pub use iterator::{InstrumentedIterator, MaybeInstrumented, TraversalGate};

/// Attribute set on spans whose operation was cancelled rather than
/// completed.
pub const OPERATION_CANCELLED: &str = "operation.cancelled";

/// Completes a started operation from wherever its outcome surfaces first.
///
/// An ender owns the started context, the request and a handle to the
/// pipeline. Clones share one completion flag: of all [`succeed`], [`fail`]
/// and [`cancel`] calls across all clones, exactly the first takes effect
/// and ends the span; the rest are no-ops. Dropping the last clone of an
/// uncompleted ender cancels the operation, so a callback that is never
/// invoked still cannot leak an un-ended span.
///
/// [`succeed`]: OperationEnder::succeed
/// [`fail`]: OperationEnder::fail
/// [`cancel`]: OperationEnder::cancel
pub struct OperationEnder<Req, Res> {
    shared: Arc<EnderShared<Req, Res>>,
}

struct EnderShared<Req, Res> {
    instrumenter: Instrumenter<Req, Res>,
    cx: Context,
    request: Req,
    ended: AtomicBool,
}

impl<Req, Res> Clone for OperationEnder<Req, Res> {
    fn clone(&self) -> Self {
        OperationEnder {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Req, Res> fmt::Debug for OperationEnder<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationEnder")
            .field("ended", &self.shared.ended.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<Req, Res> OperationEnder<Req, Res> {
    /// Creates an ender for the operation started under `cx`.
    ///
    /// `cx` must be the context the instrumenter's `start` returned for
    /// `request`.
    pub fn new(instrumenter: Instrumenter<Req, Res>, cx: Context, request: Req) -> Self {
        OperationEnder {
            shared: Arc::new(EnderShared {
                instrumenter,
                cx,
                request,
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// The context the operation runs under.
    pub fn context(&self) -> &Context {
        &self.shared.cx
    }

    /// The request the operation was started for.
    pub fn request(&self) -> &Req {
        &self.shared.request
    }

    /// Ends the operation successfully with `response`. No-op if the
    /// operation already completed.
    pub fn succeed(&self, response: &Res) {
        if self.shared.claim() {
            self.shared.end(Some(response), None);
        }
    }

    /// Ends the operation with `error`. No-op if the operation already
    /// completed.
    pub fn fail(&self, error: &(dyn Error + 'static)) {
        if self.shared.claim() {
            self.shared.end(None, Some(error));
        }
    }

    /// Ends the operation as cancelled: the span is marked with
    /// [`OPERATION_CANCELLED`] and ends without an error. No-op if the
    /// operation already completed.
    pub fn cancel(&self) {
        self.shared.cancel();
    }
}

impl<Req, Res> EnderShared<Req, Res> {
    /// Returns `true` for exactly one caller across all clones.
    fn claim(&self) -> bool {
        !self.ended.swap(true, Ordering::SeqCst)
    }

    fn end(&self, response: Option<&Res>, error: Option<&(dyn Error + 'static)>) {
        self.instrumenter.end(&self.cx, &self.request, response, error);
    }

    fn cancel(&self) {
        if !self.claim() {
            return;
        }
        if let Some(record) = self.cx.span() {
            record.set_attribute(KeyValue::new(OPERATION_CANCELLED, true));
        }
        self.end(None, None);
    }
}

impl<Req, Res> Drop for EnderShared<Req, Res> {
    // Runs when the last clone goes away; a completed ender already holds
    // the flag and this is a no-op.
    fn drop(&mut self) {
        self.cancel();
    }
}
