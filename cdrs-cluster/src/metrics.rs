use std::sync::atomic::{AtomicU64, Ordering};

/// Driver-wide counters. Only collected when enabled in
/// [`ClusterConfig`](crate::cluster::ClusterConfig).
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    successful_requests: AtomicU64,
    host_errors: AtomicU64,
    no_host_available_errors: AtomicU64,
    query_timeouts: AtomicU64,
    opened_connections: AtomicU64,
    closed_connections: AtomicU64,
}

impl Metrics {
    /// Number of statements executed.
    #[inline]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    /// Number of per-host failures encountered while iterating query plans.
    #[inline]
    pub fn host_errors(&self) -> u64 {
        self.host_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn no_host_available_errors(&self) -> u64 {
        self.no_host_available_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn query_timeouts(&self) -> u64 {
        self.query_timeouts.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn opened_connections(&self) -> u64 {
        self.opened_connections.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn closed_connections(&self) -> u64 {
        self.closed_connections.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_host_error(&self) {
        self.host_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_no_host_available(&self) {
        self.no_host_available_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_query_timeout(&self) {
        self.query_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_opened_connection(&self) {
        self.opened_connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_closed_connection(&self) {
        self.closed_connections.fetch_add(1, Ordering::Relaxed);
    }
}
