//! Re-entrancy guard for nested interception of the same library.
//!
//! Libraries often implement public entry points in terms of other public
//! entry points. When both layers are intercepted, the inner call would
//! produce a second span for what is logically one operation. [`CallDepth`]
//! tracks, per thread and per marker type, how deeply interception has
//! re-entered, so adapters can act only on the outermost call.
//!
//! The marker type parameter keeps unrelated instrumentations from sharing a
//! counter. By convention it is the instrumented library's marker type, not
//! the pipeline's request type.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use crate::context::IdHasher;
use crate::inst_warn;

thread_local! {
    static CALL_DEPTHS: RefCell<HashMap<TypeId, usize, BuildHasherDefault<IdHasher>>> =
        RefCell::new(HashMap::default());
}

/// Per-thread, per-marker-type re-entrancy counter.
///
/// [`enter`] and [`exit`] must be paired on the same thread; the counter does
/// not follow work that hops threads. Gate on the depth they return: act when
/// [`enter`] returns 1 (outermost entry) and when [`exit`] returns 0
/// (outermost exit), and pass through otherwise.
///
/// [`enter`]: CallDepth::enter
/// [`exit`]: CallDepth::exit
///
/// # Examples
///
/// ```
/// use instrumenter::CallDepth;
///
/// struct HttpLib;
///
/// fn intercepted_call() {
///     if CallDepth::enter::<HttpLib>() == 1 {
///         // outermost call, start a span here
///     }
///     do_call();
///     if CallDepth::exit::<HttpLib>() == 0 {
///         // outermost exit, end the span here
///     }
/// }
/// # fn do_call() {}
/// # intercepted_call();
/// ```
#[derive(Debug)]
pub struct CallDepth;

impl CallDepth {
    /// Increments the depth for marker type `T` on this thread and returns
    /// the new depth. The outermost entry observes 1.
    pub fn enter<T: 'static>() -> usize {
        CALL_DEPTHS.with(|depths| {
            let mut depths = depths.borrow_mut();
            let depth = depths.entry(TypeId::of::<T>()).or_insert(0);
            *depth += 1;
            *depth
        })
    }

    /// Decrements the depth for marker type `T` on this thread and returns
    /// the resulting depth. The outermost exit observes 0.
    ///
    /// An unmatched exit leaves the depth at 0 rather than going negative, so
    /// one miscounted unwind path cannot permanently disable instrumentation
    /// for the rest of the thread's lifetime.
    pub fn exit<T: 'static>() -> usize {
        CALL_DEPTHS.with(|depths| {
            let mut depths = depths.borrow_mut();
            match depths.get_mut(&TypeId::of::<T>()) {
                Some(depth) if *depth > 0 => {
                    *depth -= 1;
                    if *depth == 0 {
                        depths.remove(&TypeId::of::<T>());
                        0
                    } else {
                        *depth
                    }
                }
                _ => {
                    inst_warn!(
                        name: "CallDepth.Underflow",
                        message = "exit called without a matching enter; depth stays at zero"
                    );
                    0
                }
            }
        })
    }

    /// Clears the depth for marker type `T` on this thread.
    ///
    /// Interception layers that detect they have lost track of entry and exit
    /// pairing, for example after an exception thrown between the two hooks,
    /// call this to recover instead of leaving the counter stuck above zero.
    pub fn reset<T: 'static>() {
        CALL_DEPTHS.with(|depths| {
            depths.borrow_mut().remove(&TypeId::of::<T>());
        });
    }
}
