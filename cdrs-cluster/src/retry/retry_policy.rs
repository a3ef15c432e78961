use derive_more::Display;

use crate::error::{Error, ServerErrorKind, WriteType};

#[derive(Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Copy, Clone, Display)]
pub enum RetryDecision {
    /// Do not retry on this host. Errors scoped to the host still move on to the next host in
    /// the query plan; other errors are returned to the caller.
    Rethrow,
    /// Send the query to the same host again.
    RetrySameHost,
    /// Move on to the next host in the query plan.
    RetryNextHost,
    /// Drop the error and return an empty result.
    Ignore,
}

/// Information about a failed query.
#[derive(Debug)]
pub struct QueryInfo<'a> {
    pub error: &'a Error,
    pub is_idempotent: bool,
}

/// Query-specific information about current state of retrying.
pub trait RetrySession {
    /// Decide what to do with the failing query.
    fn decide(&mut self, query_info: QueryInfo) -> RetryDecision;
}

/// Retry policy determines what to do when a coordinator answers with an error. Failures to
/// reach a host are always handled by moving to the next host.
pub trait RetryPolicy: Send + Sync {
    /// Called for each new query, starts a session of deciding about retries.
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync>;
}

/// Never retries on the same host. Host-scoped errors fall through to the next host, everything
/// else goes directly to the user.
#[derive(Default, Debug, Copy, Clone)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync> {
        Box::new(FallthroughRetrySession)
    }
}

#[derive(Default)]
struct FallthroughRetrySession;

impl RetrySession for FallthroughRetrySession {
    fn decide(&mut self, _query_info: QueryInfo) -> RetryDecision {
        RetryDecision::Rethrow
    }
}

/// Retries when there is a high chance that a retry might help, at most once per error class.
#[derive(Default, Debug, Copy, Clone)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync> {
        Box::new(DefaultRetrySession::default())
    }
}

#[derive(Default)]
struct DefaultRetrySession {
    was_unavailable_retry: bool,
    was_read_timeout_retry: bool,
    was_write_timeout_retry: bool,
}

impl RetrySession for DefaultRetrySession {
    fn decide(&mut self, query_info: QueryInfo) -> RetryDecision {
        let Error::Server { kind, .. } = query_info.error else {
            return RetryDecision::Rethrow;
        };

        match *kind {
            ServerErrorKind::Overloaded | ServerErrorKind::ServerError => {
                if query_info.is_idempotent {
                    RetryDecision::RetryNextHost
                } else {
                    RetryDecision::Rethrow
                }
            }
            ServerErrorKind::Unavailable { .. } => {
                if !self.was_unavailable_retry {
                    self.was_unavailable_retry = true;
                    RetryDecision::RetryNextHost
                } else {
                    RetryDecision::Rethrow
                }
            }
            ServerErrorKind::ReadTimeout {
                received,
                block_for,
                data_present,
            } => {
                if !self.was_read_timeout_retry && received >= block_for && !data_present {
                    self.was_read_timeout_retry = true;
                    RetryDecision::RetrySameHost
                } else {
                    RetryDecision::Rethrow
                }
            }
            ServerErrorKind::WriteTimeout { write_type, .. } => {
                if !self.was_write_timeout_retry
                    && query_info.is_idempotent
                    && write_type == WriteType::BatchLog
                {
                    self.was_write_timeout_retry = true;
                    RetryDecision::RetrySameHost
                } else {
                    RetryDecision::Rethrow
                }
            }
            ServerErrorKind::IsBootstrapping => RetryDecision::RetryNextHost,
            _ => RetryDecision::Rethrow,
        }
    }
}
