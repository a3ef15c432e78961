use cassandra_protocol::compression::Compression;
use derivative::Derivative;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;

use crate::cluster::{NodeAddress, PoolingOptions};
use crate::error::{Error, Result};
use crate::load_balancing::{LoadBalancingPolicy, RoundRobinPolicy};
use crate::retry::{
    ConvictionPolicyFactory, ExponentialReconnectionPolicy, FallthroughRetryPolicy,
    ReconnectionPolicy, RetryPolicy, SimpleConvictionPolicyFactory,
};

pub const DEFAULT_PORT: u16 = 9042;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(12);

/// Resolved cluster configuration. Use [`ClusterConfigBuilder`] to create one.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ClusterConfig {
    pub(crate) contact_points: Vec<SocketAddr>,
    pub(crate) port: u16,
    pub(crate) compression: Compression,
    pub(crate) metrics_enabled: bool,
    pub(crate) pooling_options: PoolingOptions,
    #[derivative(Debug = "ignore")]
    pub(crate) load_balancing_policy: Arc<dyn LoadBalancingPolicy>,
    #[derivative(Debug = "ignore")]
    pub(crate) reconnection_policy: Arc<dyn ReconnectionPolicy>,
    #[derivative(Debug = "ignore")]
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    #[derivative(Debug = "ignore")]
    pub(crate) conviction_policy_factory: Arc<dyn ConvictionPolicyFactory>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) query_timeout: Option<Duration>,
}

impl ClusterConfig {
    #[inline]
    pub fn contact_points(&self) -> &[SocketAddr] {
        &self.contact_points
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    #[inline]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }
}

/// Builder for [`ClusterConfig`]. Hostname contact points are resolved when building, and a
/// single hostname can result in multiple contact points.
pub struct ClusterConfigBuilder {
    contact_points: Vec<NodeAddress>,
    port: u16,
    compression: Compression,
    metrics_enabled: bool,
    pooling_options: PoolingOptions,
    load_balancing_policy: Arc<dyn LoadBalancingPolicy>,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    retry_policy: Arc<dyn RetryPolicy>,
    conviction_policy_factory: Arc<dyn ConvictionPolicyFactory>,
    connect_timeout: Option<Duration>,
    query_timeout: Option<Duration>,
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        ClusterConfigBuilder {
            contact_points: vec![],
            port: DEFAULT_PORT,
            compression: Compression::None,
            metrics_enabled: false,
            pooling_options: Default::default(),
            load_balancing_policy: Arc::new(RoundRobinPolicy::new()),
            reconnection_policy: Arc::new(ExponentialReconnectionPolicy::default()),
            retry_policy: Arc::new(FallthroughRetryPolicy),
            conviction_policy_factory: Arc::new(SimpleConvictionPolicyFactory),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            query_timeout: Some(DEFAULT_QUERY_TIMEOUT),
        }
    }
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a contact point. Hostnames without a port use the configured port.
    #[must_use]
    pub fn with_contact_point(mut self, addr: NodeAddress) -> Self {
        self.contact_points.push(addr);
        self
    }

    #[must_use]
    pub fn with_contact_points(mut self, addrs: impl IntoIterator<Item = NodeAddress>) -> Self {
        self.contact_points.extend(addrs);
        self
    }

    /// Sets the native protocol port used for hostnames without a port and for discovered peers
    /// which do not advertise one.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_metrics_enabled(mut self, metrics_enabled: bool) -> Self {
        self.metrics_enabled = metrics_enabled;
        self
    }

    #[must_use]
    pub fn with_pooling_options(mut self, pooling_options: PoolingOptions) -> Self {
        self.pooling_options = pooling_options;
        self
    }

    #[must_use]
    pub fn with_load_balancing_policy(
        mut self,
        load_balancing_policy: Arc<dyn LoadBalancingPolicy>,
    ) -> Self {
        self.load_balancing_policy = load_balancing_policy;
        self
    }

    #[must_use]
    pub fn with_reconnection_policy(
        mut self,
        reconnection_policy: Arc<dyn ReconnectionPolicy>,
    ) -> Self {
        self.reconnection_policy = reconnection_policy;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    #[must_use]
    pub fn with_conviction_policy_factory(
        mut self,
        conviction_policy_factory: Arc<dyn ConvictionPolicyFactory>,
    ) -> Self {
        self.conviction_policy_factory = conviction_policy_factory;
        self
    }

    /// Sets the timeout for opening a single connection. `None` waits indefinitely.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the overall deadline for executing a statement, including retries. `None` disables
    /// the deadline.
    #[must_use]
    pub fn with_query_timeout(mut self, query_timeout: Option<Duration>) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Finalizes building process
    pub async fn build(self) -> Result<ClusterConfig> {
        if self.contact_points.is_empty() {
            return Err(Error::Configuration(
                "At least one contact point is required".into(),
            ));
        }

        // replace with map() when async lambdas become available
        let mut contact_points = Vec::with_capacity(self.contact_points.len());
        for addr in self.contact_points {
            for addr in Self::resolve(addr, self.port).await? {
                if !contact_points.contains(&addr) {
                    contact_points.push(addr);
                }
            }
        }

        Ok(ClusterConfig {
            contact_points,
            port: self.port,
            compression: self.compression,
            metrics_enabled: self.metrics_enabled,
            pooling_options: self.pooling_options,
            load_balancing_policy: self.load_balancing_policy,
            reconnection_policy: self.reconnection_policy,
            retry_policy: self.retry_policy,
            conviction_policy_factory: self.conviction_policy_factory,
            connect_timeout: self.connect_timeout,
            query_timeout: self.query_timeout,
        })
    }

    async fn resolve(addr: NodeAddress, port: u16) -> Result<Vec<SocketAddr>> {
        match addr {
            NodeAddress::Direct(addr) => Ok(vec![addr]),
            NodeAddress::Hostname(hostname) => {
                let target = if hostname.contains(':') {
                    hostname
                } else {
                    format!("{hostname}:{port}")
                };

                lookup_host(target)
                    .await
                    .map(|addrs| addrs.collect())
                    .map_err(Into::into)
            }
        }
    }
}
