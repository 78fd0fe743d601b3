//! Bridge from [`Deferred`] to Rust `async`.

use super::{Deferred, Outcome};
use crate::errors::{GrainError, GrainResult};
use futures::channel::oneshot;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future completing with a deferred's outcome.
///
/// Performing happens when the future is created, not on first poll.
pub struct DeferredFuture<T: Send + 'static> {
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T: Send + 'static> Future for DeferredFuture<T> {
    type Output = GrainResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome()),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(GrainError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Send + 'static> IntoFuture for Deferred<T> {
    type Output = GrainResult<T>;
    type IntoFuture = DeferredFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        let (tx, rx) = oneshot::channel();
        self.perform(move |outcome| {
            // Receiver gone means nobody is waiting anymore.
            let _ = tx.send(outcome);
        });
        DeferredFuture { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Resolver;
    use crate::executor::TokioExecutor;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_await_unit() {
        assert_eq!(Deferred::value(5u8).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_await_future_resolved_on_tokio() {
        let executor = Arc::new(TokioExecutor::current());
        let deferred = Deferred::future(|resolver: Resolver<&'static str>| {
            std::thread::spawn(move || resolver.succeed("done"));
        })
        .on(executor);

        assert_eq!(deferred.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_await_failure() {
        let err = Deferred::<u8>::failed(GrainError::Stopped).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
