use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

use pin_project_lite::pin_project;

use crate::completion::OperationEnder;

pin_project! {
    /// A future whose resolution completes a started operation.
    ///
    /// Every poll runs with the operation's context attached as current, so
    /// instrumentation inside the future attributes to the captured context
    /// rather than to whatever the polling thread happened to carry. When
    /// the future resolves, the operation succeeds or fails with the
    /// `Result`'s outcome; when it is dropped unresolved, for example
    /// because a select raced past it or its task was aborted, the
    /// operation is cancelled instead.
    #[derive(Debug)]
    pub struct InstrumentedFuture<F, Req, Res> {
        #[pin]
        inner: F,
        ender: Option<OperationEnder<Req, Res>>,
    }

    impl<F, Req, Res> PinnedDrop for InstrumentedFuture<F, Req, Res> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(ender) = this.ender.take() {
                ender.cancel();
            }
        }
    }
}

impl<F, Req, Res> InstrumentedFuture<F, Req, Res> {
    /// Wraps `future` so that it completes `ender`'s operation.
    pub fn new(future: F, ender: OperationEnder<Req, Res>) -> Self {
        InstrumentedFuture {
            inner: future,
            ender: Some(ender),
        }
    }
}

impl<F, Req, Res, E> Future for InstrumentedFuture<F, Req, Res>
where
    F: Future<Output = Result<Res, E>>,
    E: Error + 'static,
{
    type Output = Result<Res, E>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let polled = match this.ender.as_ref() {
            Some(ender) => {
                let _guard = ender.context().clone().attach();
                this.inner.poll(task_cx)
            }
            // Polled again after completion; nothing left to attribute.
            None => this.inner.poll(task_cx),
        };
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                if let Some(ender) = this.ender.take() {
                    match &result {
                        Ok(response) => ender.succeed(response),
                        Err(error) => ender.fail(error),
                    }
                }
                Poll::Ready(result)
            }
        }
    }
}

impl<F: Future> InstrumentedFutureExt for F {}

/// Extension trait wiring a result future to a started operation.
pub trait InstrumentedFutureExt: Sized {
    /// Completes `ender`'s operation with this future's outcome and runs
    /// every poll under the operation's context.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::borrow::Cow;
    /// use std::convert::Infallible;
    ///
    /// use instrumenter::completion::{InstrumentedFutureExt, OperationEnder};
    /// use instrumenter::span::InMemorySpanSink;
    /// use instrumenter::{Context, Instrumenter};
    ///
    /// # futures_executor::block_on(async {
    /// let sink = InMemorySpanSink::new();
    /// let instrumenter: Instrumenter<&'static str, u32> =
    ///     Instrumenter::builder(|name: &&'static str| Cow::Borrowed(*name))
    ///         .with_sink(sink.clone())
    ///         .build()
    ///         .unwrap();
    ///
    /// let cx = instrumenter.start(&Context::current(), &"fetch");
    /// let ender = OperationEnder::new(instrumenter, cx, "fetch");
    /// let value = async { Ok::<_, Infallible>(7) }.end_operation(ender).await;
    ///
    /// assert_eq!(value, Ok(7));
    /// assert_eq!(sink.get_finished_spans().len(), 1);
    /// # });
    /// ```
    fn end_operation<Req, Res>(
        self,
        ender: OperationEnder<Req, Res>,
    ) -> InstrumentedFuture<Self, Req, Res> {
        InstrumentedFuture::new(self, ender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use thiserror::Error;

    use crate::completion::OPERATION_CANCELLED;
    use crate::span::{InMemorySpanSink, Status};
    use crate::{Context, Instrumenter, Value};

    #[derive(Debug)]
    struct Fetch {
        url: &'static str,
    }

    #[derive(Debug, PartialEq)]
    struct Body(&'static str);

    #[derive(Debug, Error, PartialEq)]
    #[error("connection refused")]
    struct ConnectionRefused;

    fn fetch_client<Res>(sink: InMemorySpanSink) -> Instrumenter<Fetch, Res> {
        Instrumenter::builder(|fetch: &Fetch| std::borrow::Cow::Borrowed(fetch.url))
            .with_sink(sink)
            .build()
            .unwrap()
    }

    fn started<Res>(sink: &InMemorySpanSink) -> OperationEnder<Fetch, Res> {
        let instrumenter = fetch_client(sink.clone());
        let request = Fetch { url: "GET /feed" };
        let cx = instrumenter.start(&Context::new(), &request);
        OperationEnder::new(instrumenter, cx, request)
    }

    #[test]
    fn resolved_ok_ends_successfully() {
        let sink = InMemorySpanSink::new();
        let ender = started(&sink);

        let body = futures_executor::block_on(
            async { Ok::<_, ConnectionRefused>(Body("hello")) }.end_operation(ender),
        );

        assert_eq!(body, Ok(Body("hello")));
        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::Unset);
        assert_eq!(spans[0].recorded_error, None);
    }

    #[test]
    fn resolved_err_ends_with_the_error() {
        let sink = InMemorySpanSink::new();
        let ender = started(&sink);

        let body = futures_executor::block_on(
            async { Err::<Body, _>(ConnectionRefused) }.end_operation(ender),
        );

        assert_eq!(body, Err(ConnectionRefused));
        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("connection refused"));
        assert_eq!(spans[0].recorded_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn dropped_unresolved_cancels() {
        let sink = InMemorySpanSink::new();
        let ender: OperationEnder<Fetch, Body> = started(&sink);

        let pending = std::future::pending::<Result<Body, ConnectionRefused>>()
            .end_operation(ender);
        drop(pending);

        let spans = sink.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].attributes.get(OPERATION_CANCELLED),
            Some(&Value::Bool(true))
        );
        assert_eq!(spans[0].status, Status::Unset);
    }

    #[test]
    fn poll_runs_under_the_operation_context() {
        let sink = InMemorySpanSink::new();
        let ender = started(&sink);
        let span_id = ender
            .context()
            .span()
            .map(|record| record.span_context().span_id());

        let observed = futures_executor::block_on(
            async {
                let current = Context::current()
                    .span()
                    .map(|record| record.span_context().span_id());
                Ok::<_, ConnectionRefused>(current)
            }
            .end_operation(ender),
        );

        assert!(span_id.is_some());
        assert_eq!(observed.ok().flatten(), span_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn aborted_task_still_ends_the_span() {
        let sink = InMemorySpanSink::new();
        let ender = started(&sink);

        let handle = tokio::spawn(
            std::future::pending::<Result<Body, ConnectionRefused>>().end_operation(ender),
        );
        tokio::task::yield_now().await;
        handle.abort();
        assert!(handle.await.is_err());

        assert_eq!(sink.get_finished_spans().len(), 1);
    }
}
