use crate::Context;
use futures_core::Stream;
use futures_sink::Sink;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

pin_project! {
    /// A future, stream, or sink that has an associated context.
    ///
    /// The associated context is attached as the thread's current context
    /// around every poll of the inner value, and restored afterwards, so
    /// instrumentation running inside the continuation attributes to the
    /// captured context rather than to whatever the polling thread happened
    /// to carry.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        cx: Context,
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.cx.clone().attach();

        this.inner.poll(task_cx)
    }
}

impl<T: Stream> Stream for WithContext<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_next(this.inner, task_cx)
    }
}

impl<I, T: Sink<I>> Sink<I> for WithContext<T> {
    type Error = T::Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_ready(this.inner, task_cx)
    }

    fn start_send(self: Pin<&mut Self>, item: I) -> Result<(), Self::Error> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::start_send(this.inner, item)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_flush(this.inner, task_cx)
    }

    fn poll_close(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _enter = this.cx.clone().attach();
        T::poll_close(this.inner, task_cx)
    }
}

// The following three extension traits are _almost_ identical,
// but need to be separate to avoid overlapping implementation errors.

impl<F: std::future::Future> FutureContextExt for F {}
/// Extension trait allowing a context to travel with a future.
pub trait FutureContextExt: Sized {
    /// Attaches the provided [`Context`] to this future, returning a
    /// `WithContext` wrapper.
    ///
    /// The attached context will be set as current while this future is being
    /// polled.
    ///
    /// [`Context`]: Context
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current [`Context`] to this future, returning a
    /// `WithContext` wrapper.
    ///
    /// The attached context will be set as current while this future is being
    /// polled.
    ///
    /// [`Context`]: Context
    fn with_current_context(self) -> WithContext<Self> {
        let cx = Context::current();
        self.with_context(cx)
    }
}

impl<S: Stream> StreamContextExt for S {}
/// Extension trait allowing a context to travel with a stream.
pub trait StreamContextExt: Sized {
    /// Attaches the provided [`Context`] to this stream, returning a
    /// `WithContext` wrapper.
    ///
    /// The attached context will be set as current while this stream is being
    /// polled.
    ///
    /// [`Context`]: Context
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current [`Context`] to this stream, returning a
    /// `WithContext` wrapper.
    ///
    /// The attached context will be set as current while this stream is being
    /// polled.
    ///
    /// [`Context`]: Context
    fn with_current_context(self) -> WithContext<Self> {
        let cx = Context::current();
        self.with_context(cx)
    }
}

impl<_I, S: Sink<_I>> SinkContextExt<_I> for S {}
/// Extension trait allowing a context to travel with a sink.
///
/// The generic argument is unused.
pub trait SinkContextExt<_I>: Sized {
    /// Attaches the provided [`Context`] to this sink, returning a
    /// `WithContext` wrapper.
    ///
    /// The attached context will be set as current while this sink is being
    /// polled.
    ///
    /// [`Context`]: Context
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current [`Context`] to this sink, returning a
    /// `WithContext` wrapper.
    ///
    /// The attached context will be set as current while this sink is being
    /// polled.
    ///
    /// [`Context`]: Context
    fn with_current_context(self) -> WithContext<Self> {
        let cx = Context::current();
        self.with_context(cx)
    }
}
