//! Carrier adapters for cross-process trace propagation.
//!
//! Propagators read and write span identity to and from the messages
//! exchanged by applications. They leverage the [`Context`] to carry the
//! extracted identity into the process and to find the identity to inject on
//! the way out.
//!
//! [`Injector`] and [`Extractor`] adapt concrete carrier types, such as
//! header maps, to the propagators. Each carrier adapter owns its key
//! normalization; the [`HashMap`] impls lowercase keys so header lookup is
//! case insensitive.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::slice;

use crate::Context;

mod copy_on_write;
pub mod trace_context;

pub use copy_on_write::{inject_copy_on_write, CarrierSealed, TrySetInjector};
pub use trace_context::TraceContextPropagator;

/// Injector provides an interface for adding fields to an underlying carrier
/// like `HashMap`.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);

    #[allow(unused_variables)]
    /// Hint to reserve capacity for at least `additional` more entries to be inserted.
    fn reserve(&mut self, additional: usize) {}
}

/// Extractor provides an interface for reading fields from an underlying
/// carrier like `HashMap`.
pub trait Extractor {
    /// Get a value from a key from the underlying data.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;

    /// Get all values from a key from the underlying data.
    ///
    /// Carriers that can hold a key more than once, such as repeated HTTP
    /// headers, override this to expose every value in carrier order.
    fn get_all(&self, key: &str) -> Option<Vec<Cow<'_, str>>> {
        self.get(key).map(|value| vec![value])
    }
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }

    /// Reserves capacity for at least `additional` more entries to be inserted.
    fn reserve(&mut self, additional: usize) {
        self.reserve(additional);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(&key.to_lowercase())
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys()
            .map(|k| Cow::Borrowed(k.as_str()))
            .collect::<Vec<_>>()
    }
}

/// Methods to inject and extract span identity as text into carriers that
/// travel in-band across process boundaries.
pub trait TextMapPropagator: Debug {
    /// Properly encodes the values of the current [`Context`] and injects
    /// them into the [`Injector`].
    fn inject(&self, injector: &mut dyn Injector) {
        Context::map_current(|cx| self.inject_context(cx, injector))
    }

    /// Properly encodes the values of the given [`Context`] and injects them
    /// into the [`Injector`].
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector);

    /// Retrieves encoded data using the provided [`Extractor`]. If no data
    /// for this format was retrieved OR if the retrieved data is invalid,
    /// then the current [`Context`] is returned.
    fn extract(&self, extractor: &dyn Extractor) -> Context {
        Context::map_current(|cx| self.extract_with_context(cx, extractor))
    }

    /// Retrieves encoded data using the provided [`Extractor`]. If no data
    /// for this format was retrieved OR if the retrieved data is invalid,
    /// then the given [`Context`] is returned.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context;

    /// Returns iter of fields used by [`TextMapPropagator`].
    fn fields(&self) -> FieldIter<'_>;
}

/// An iterator over fields of a [`TextMapPropagator`].
#[derive(Debug)]
pub struct FieldIter<'a>(slice::Iter<'a, String>);

impl<'a> FieldIter<'a> {
    /// Create a new `FieldIter` from a slice of propagator fields.
    pub fn new(fields: &'a [String]) -> Self {
        FieldIter(fields.iter())
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|field| field.as_str())
    }
}
