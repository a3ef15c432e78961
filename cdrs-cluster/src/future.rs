use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::frame::Response;

/// An owned dynamically typed [`Future`] for use in cases where you can't
/// statically type your result or need to add some indirection.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// Handle to a query running in the background. Resolves to the first successful response or
/// the error which ended query execution.
#[derive(Debug)]
pub struct ResponseFuture {
    handle: JoinHandle<Result<Response>>,
}

impl ResponseFuture {
    pub(crate) fn new(handle: JoinHandle<Result<Response>>) -> Self {
        ResponseFuture { handle }
    }

    /// Checks if the query has completed, either successfully or not.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops waiting for the result. Remaining query plan entries are not tried.
    #[inline]
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|result| {
            result.unwrap_or_else(|error| {
                Err(Error::General(format!("Query task failed: {error}")))
            })
        })
    }
}
