//! Error cause resolution.

use std::error::Error;

/// Resolves the error to record on the span from the error the operation
/// returned.
///
/// Transports tend to wrap the interesting failure in layers of plumbing
/// errors. The cause extractor decides which error in the `source()` chain
/// actually describes what went wrong.
pub trait ErrorCauseExtractor: Send + Sync {
    /// Returns the error to record for `error`.
    fn cause<'a>(&self, error: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static);
}

/// Records the returned error unchanged.
#[derive(Debug, Default)]
pub struct IdentityCauseExtractor {
    _private: (),
}

impl IdentityCauseExtractor {
    /// Creates the identity policy.
    pub fn new() -> Self {
        IdentityCauseExtractor { _private: () }
    }
}

impl ErrorCauseExtractor for IdentityCauseExtractor {
    fn cause<'a>(&self, error: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static) {
        error
    }
}

fn is_type<E: Error + 'static>(error: &(dyn Error + 'static)) -> bool {
    error.downcast_ref::<E>().is_some()
}

/// Unwraps known wrapper error types down to the failure they carry.
///
/// Wrapper types are registered once when the pipeline is assembled; each
/// registration stores a typed membership check, so resolving a cause at
/// runtime is a plain type test with no name-based lookups. Resolution
/// follows [`Error::source`] for as long as the current error is a registered
/// wrapper, then stops, so an unregistered error is returned as-is and a
/// wrapper with no source is recorded itself.
///
/// # Examples
///
/// ```
/// use instrumenter::pipeline::{ErrorCauseExtractor, WrapperCauseExtractor};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("channel closed")]
/// struct ChannelClosed(#[source] std::io::Error);
///
/// let cause_extractor = WrapperCauseExtractor::new().register::<ChannelClosed>();
///
/// let wrapped = ChannelClosed(std::io::Error::other("connection reset"));
/// let cause = cause_extractor.cause(&wrapped);
/// assert_eq!(cause.to_string(), "connection reset");
/// ```
#[derive(Debug, Default)]
pub struct WrapperCauseExtractor {
    wrappers: Vec<fn(&(dyn Error + 'static)) -> bool>,
}

impl WrapperCauseExtractor {
    /// Creates a policy with no registered wrappers.
    pub fn new() -> Self {
        WrapperCauseExtractor::default()
    }

    /// Registers `E` as a wrapper type to unwrap through.
    pub fn register<E: Error + 'static>(mut self) -> Self {
        self.wrappers.push(is_type::<E>);
        self
    }

    fn is_wrapper(&self, error: &(dyn Error + 'static)) -> bool {
        self.wrappers.iter().any(|matches| matches(error))
    }
}

impl ErrorCauseExtractor for WrapperCauseExtractor {
    fn cause<'a>(&self, error: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static) {
        let mut current = error;
        while self.is_wrapper(current) {
            match current.source() {
                Some(source) => current = source,
                None => break,
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Root;

    impl fmt::Display for Root {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "root cause")
        }
    }

    impl Error for Root {}

    #[derive(Debug)]
    struct Wrapper(Box<dyn Error + 'static>);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapper")
        }
    }

    impl Error for Wrapper {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(self.0.as_ref())
        }
    }

    #[derive(Debug)]
    struct OtherWrapper(Box<dyn Error + 'static>);

    impl fmt::Display for OtherWrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "other wrapper")
        }
    }

    impl Error for OtherWrapper {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(self.0.as_ref())
        }
    }

    #[derive(Debug)]
    struct SourcelessWrapper;

    impl fmt::Display for SourcelessWrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sourceless wrapper")
        }
    }

    impl Error for SourcelessWrapper {}

    #[test]
    fn identity_returns_error_unchanged() {
        let error = Wrapper(Box::new(Root));
        let cause = IdentityCauseExtractor::new().cause(&error);

        assert_eq!(cause.to_string(), "wrapper");
    }

    #[test]
    fn registered_wrapper_is_unwrapped() {
        let cause_extractor = WrapperCauseExtractor::new().register::<Wrapper>();
        let error = Wrapper(Box::new(Root));

        assert_eq!(cause_extractor.cause(&error).to_string(), "root cause");
    }

    #[test]
    fn consecutive_wrappers_are_followed() {
        let cause_extractor = WrapperCauseExtractor::new()
            .register::<Wrapper>()
            .register::<OtherWrapper>();
        let error = Wrapper(Box::new(OtherWrapper(Box::new(Root))));

        assert_eq!(cause_extractor.cause(&error).to_string(), "root cause");
    }

    #[test]
    fn unwrapping_stops_at_unregistered_type() {
        let cause_extractor = WrapperCauseExtractor::new().register::<Wrapper>();
        let error = Wrapper(Box::new(OtherWrapper(Box::new(Root))));

        // OtherWrapper is not registered, so it is the recorded cause.
        assert_eq!(cause_extractor.cause(&error).to_string(), "other wrapper");
    }

    #[test]
    fn unregistered_error_is_returned_as_is() {
        let cause_extractor = WrapperCauseExtractor::new().register::<Wrapper>();

        assert_eq!(cause_extractor.cause(&Root).to_string(), "root cause");
    }

    #[test]
    fn wrapper_without_source_is_recorded_itself() {
        let cause_extractor = WrapperCauseExtractor::new().register::<SourcelessWrapper>();

        assert_eq!(
            cause_extractor.cause(&SourcelessWrapper).to_string(),
            "sourceless wrapper"
        );
    }
}
