use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cluster::HostDistance;
use crate::error::{Error, Result};

const DEFAULT_MIN_REQUESTS: usize = 25;
const DEFAULT_MAX_REQUESTS: usize = 100;

const DEFAULT_CORE_CONNECTIONS_LOCAL: usize = 2;
const DEFAULT_MAX_CONNECTIONS_LOCAL: usize = 8;
const DEFAULT_CORE_CONNECTIONS_REMOTE: usize = 1;
const DEFAULT_MAX_CONNECTIONS_REMOTE: usize = 2;

struct DistanceOptions {
    min_requests: AtomicUsize,
    max_requests: AtomicUsize,
    core_connections: AtomicUsize,
    max_connections: AtomicUsize,
}

impl DistanceOptions {
    fn new(core_connections: usize, max_connections: usize) -> Self {
        DistanceOptions {
            min_requests: AtomicUsize::new(DEFAULT_MIN_REQUESTS),
            max_requests: AtomicUsize::new(DEFAULT_MAX_REQUESTS),
            core_connections: AtomicUsize::new(core_connections),
            max_connections: AtomicUsize::new(max_connections),
        }
    }
}

/// Connection pool sizing per [`HostDistance`]. Values can be changed while the cluster is
/// running; pools read them on every decision. Ignored hosts never get connections, so every
/// value reads as 0 for them and cannot be changed.
pub struct PoolingOptions {
    local: DistanceOptions,
    remote: DistanceOptions,
}

impl Default for PoolingOptions {
    fn default() -> Self {
        PoolingOptions {
            local: DistanceOptions::new(
                DEFAULT_CORE_CONNECTIONS_LOCAL,
                DEFAULT_MAX_CONNECTIONS_LOCAL,
            ),
            remote: DistanceOptions::new(
                DEFAULT_CORE_CONNECTIONS_REMOTE,
                DEFAULT_MAX_CONNECTIONS_REMOTE,
            ),
        }
    }
}

impl Clone for PoolingOptions {
    fn clone(&self) -> Self {
        let clone_options = |options: &DistanceOptions| DistanceOptions {
            min_requests: AtomicUsize::new(options.min_requests.load(Ordering::Relaxed)),
            max_requests: AtomicUsize::new(options.max_requests.load(Ordering::Relaxed)),
            core_connections: AtomicUsize::new(options.core_connections.load(Ordering::Relaxed)),
            max_connections: AtomicUsize::new(options.max_connections.load(Ordering::Relaxed)),
        };

        PoolingOptions {
            local: clone_options(&self.local),
            remote: clone_options(&self.remote),
        }
    }
}

impl Debug for PoolingOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("PoolingOptions");
        for distance in [HostDistance::Local, HostDistance::Remote] {
            debug.field(
                &format!("{distance}"),
                &(
                    self.min_requests_per_connection(distance),
                    self.max_requests_per_connection(distance),
                    self.core_connections_per_host(distance),
                    self.max_connections_per_host(distance),
                ),
            );
        }

        debug.finish()
    }
}

impl PoolingOptions {
    fn options(&self, distance: HostDistance) -> Option<&DistanceOptions> {
        match distance {
            HostDistance::Local => Some(&self.local),
            HostDistance::Remote => Some(&self.remote),
            HostDistance::Ignored => None,
        }
    }

    fn configurable(&self, distance: HostDistance) -> Result<&DistanceOptions> {
        self.options(distance).ok_or_else(|| {
            Error::Configuration(format!("Cannot set pooling options for {distance} hosts"))
        })
    }

    /// Number of in-flight requests on the least busy connection above which the pool opens
    /// an additional connection.
    #[inline]
    pub fn min_requests_per_connection(&self, distance: HostDistance) -> usize {
        self.options(distance)
            .map(|options| options.min_requests.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Maximum number of in-flight requests on a single connection.
    #[inline]
    pub fn max_requests_per_connection(&self, distance: HostDistance) -> usize {
        self.options(distance)
            .map(|options| options.max_requests.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Number of connections always kept open to a host.
    #[inline]
    pub fn core_connections_per_host(&self, distance: HostDistance) -> usize {
        self.options(distance)
            .map(|options| options.core_connections.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Maximum number of connections to a host.
    #[inline]
    pub fn max_connections_per_host(&self, distance: HostDistance) -> usize {
        self.options(distance)
            .map(|options| options.max_connections.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn set_min_requests_per_connection(
        &self,
        distance: HostDistance,
        min_requests: usize,
    ) -> Result<()> {
        let options = self.configurable(distance)?;
        let max_requests = options.max_requests.load(Ordering::Relaxed);
        if min_requests > max_requests {
            return Err(Error::Configuration(format!(
                "Min requests per connection ({min_requests}) cannot exceed max requests per connection ({max_requests})"
            )));
        }

        options.min_requests.store(min_requests, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_max_requests_per_connection(
        &self,
        distance: HostDistance,
        max_requests: usize,
    ) -> Result<()> {
        let options = self.configurable(distance)?;
        let min_requests = options.min_requests.load(Ordering::Relaxed);
        if max_requests == 0 || max_requests < min_requests {
            return Err(Error::Configuration(format!(
                "Max requests per connection ({max_requests}) must be positive and not less than min requests per connection ({min_requests})"
            )));
        }

        options.max_requests.store(max_requests, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_core_connections_per_host(
        &self,
        distance: HostDistance,
        core_connections: usize,
    ) -> Result<()> {
        let options = self.configurable(distance)?;
        let max_connections = options.max_connections.load(Ordering::Relaxed);
        if core_connections > max_connections {
            return Err(Error::Configuration(format!(
                "Core connections per host ({core_connections}) cannot exceed max connections per host ({max_connections})"
            )));
        }

        options
            .core_connections
            .store(core_connections, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_max_connections_per_host(
        &self,
        distance: HostDistance,
        max_connections: usize,
    ) -> Result<()> {
        let options = self.configurable(distance)?;
        let core_connections = options.core_connections.load(Ordering::Relaxed);
        if max_connections == 0 || max_connections < core_connections {
            return Err(Error::Configuration(format!(
                "Max connections per host ({max_connections}) must be positive and not less than core connections per host ({core_connections})"
            )));
        }

        options
            .max_connections
            .store(max_connections, Ordering::Relaxed);
        Ok(())
    }
}
