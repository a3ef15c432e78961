use cassandra_protocol::compression::Compression;
use derivative::Derivative;
use futures::future::join_all;
use itertools::Itertools;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::*;

use crate::cluster::connection_pool::new_connection;
use crate::cluster::control_connection::{ControlConnection, ControlConnectionState};
use crate::cluster::session::SessionInner;
use crate::cluster::{ClusterConfig, Host, HostDistance, Metadata, PoolingOptions, Session};
use crate::error::{Error, Result};
use crate::load_balancing::LoadBalancingPolicy;
use crate::metrics::Metrics;
use crate::retry::{ReconnectionPolicy, RetryPolicy};
use crate::transport::{ConnectionFactory, Transport};

/// Resolves once the shutdown flag is raised or the sender is gone.
pub(crate) async fn wait_for_shutdown(receiver: &mut watch::Receiver<bool>) {
    let _ = receiver.wait_for(|is_shutdown| *is_shutdown).await;
}

/// State shared by the cluster handle, its sessions, the control connection and background
/// tasks. Background tasks only keep weak references.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub(crate) struct ClusterInner<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> {
    #[derivative(Debug = "ignore")]
    pub(crate) connection_factory: Arc<CF>,
    pub(crate) metadata: Arc<Metadata>,
    pub(crate) pooling_options: Arc<PoolingOptions>,
    #[derivative(Debug = "ignore")]
    pub(crate) load_balancing_policy: Arc<dyn LoadBalancingPolicy>,
    #[derivative(Debug = "ignore")]
    pub(crate) reconnection_policy: Arc<dyn ReconnectionPolicy>,
    #[derivative(Debug = "ignore")]
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) port: u16,
    pub(crate) compression: Compression,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) query_timeout: Option<Duration>,
    pub(crate) metrics: Option<Arc<Metrics>>,
    #[derivative(Debug = "ignore")]
    pub(crate) control_connection: ControlConnection<T, CF>,
    /// Serializes host registry mutation with shutdown. Holds the shutdown flag.
    pub(crate) lock: tokio::sync::Mutex<bool>,
    #[derivative(Debug = "ignore")]
    sessions: Mutex<Vec<Weak<SessionInner<T, CF>>>>,
    is_shutdown: AtomicBool,
    #[derivative(Debug = "ignore")]
    shutdown_sender: watch::Sender<bool>,
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> ClusterInner<T, CF> {
    #[inline]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_sender.subscribe()
    }

    pub(crate) fn register_session(&self, session: &Arc<SessionInner<T, CF>>) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|session| session.strong_count() > 0);
        sessions.push(Arc::downgrade(session));
    }

    pub(crate) fn unregister_session(&self, session: &SessionInner<T, CF>) {
        self.sessions
            .lock()
            .unwrap()
            .retain(|existing| {
                existing.strong_count() > 0 && !std::ptr::eq(existing.as_ptr(), session)
            });
    }

    fn sessions(&self) -> Vec<Arc<SessionInner<T, CF>>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn remove_pools(&self, addr: SocketAddr) {
        for session in self.sessions() {
            session.remove_pool(addr);
        }
    }

    /// Reassigns distances of all hosts. Pools of hosts which became ignored are torn down.
    pub(crate) fn populate_load_balancing(&self) {
        let hosts = self.metadata.all_hosts();
        self.load_balancing_policy.populate(&hosts);

        for host in hosts
            .iter()
            .filter(|host| host.distance() == HostDistance::Ignored)
        {
            self.remove_pools(host.address());
        }
    }

    pub(crate) fn mark_host_up(&self, host: &Arc<Host>) {
        if host.mark_up() {
            info!(address = %host.address(), "Host is up.");
            self.load_balancing_policy.on_up(host);
        }
    }

    pub(crate) fn on_up(&self, host: &Arc<Host>) {
        host.cancel_reconnection();
        self.mark_host_up(host);
    }

    /// Handles a host which has just been marked down: tears down its pools and starts
    /// reconnecting in the background.
    pub(crate) fn on_down(self: &Arc<Self>, host: &Arc<Host>) {
        if self.is_shutdown() {
            return;
        }

        warn!(address = %host.address(), "Host is down.");

        self.remove_pools(host.address());
        self.load_balancing_policy.on_down(host);
        self.start_reconnection(host);
    }

    pub(crate) fn on_add(&self, host: &Arc<Host>) {
        info!(address = %host.address(), "New host added.");
        self.load_balancing_policy.on_add(host);
    }

    pub(crate) fn on_remove(&self, host: &Arc<Host>) {
        info!(address = %host.address(), "Host removed.");

        host.cancel_reconnection();
        self.remove_pools(host.address());
        self.load_balancing_policy.on_remove(host);
    }

    fn start_reconnection(self: &Arc<Self>, host: &Arc<Host>) {
        if host.is_reconnecting() {
            return;
        }

        let cluster = Arc::downgrade(self);
        let host_clone = host.clone();
        let addr = host.address();
        let connection_factory = self.connection_factory.clone();
        let compression = self.compression;
        let connect_timeout = self.connect_timeout;
        let mut schedule = self.reconnection_policy.new_schedule();
        let mut shutdown = self.shutdown_receiver();

        let handle = tokio::spawn(async move {
            loop {
                let Some(delay) = schedule.next_delay() else {
                    warn!(%addr, "Reconnection schedule exhausted, host stays down.");
                    return;
                };

                debug!(%addr, ?delay, "Scheduling host reconnection.");

                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                match new_connection(
                    connection_factory.as_ref(),
                    addr,
                    compression,
                    connect_timeout,
                    None,
                    None,
                )
                .await
                {
                    Ok(connection) => {
                        connection.close();

                        if let Some(cluster) = cluster.upgrade() {
                            if !cluster.is_shutdown() && cluster.metadata.has_host(addr) {
                                cluster.mark_host_up(&host_clone);
                            }
                        }

                        return;
                    }
                    Err(error) => debug!(%addr, %error, "Host reconnection failed."),
                }
            }
        });

        host.set_reconnection_handle(handle);
    }

    /// Changes the core connection count and eagerly opens missing connections in every pool of
    /// given distance.
    pub(crate) async fn set_core_connections_per_host(
        &self,
        distance: HostDistance,
        core_connections: usize,
    ) -> Result<()> {
        self.pooling_options
            .set_core_connections_per_host(distance, core_connections)?;

        let pools = self
            .sessions()
            .iter()
            .flat_map(|session| session.pools())
            .filter(|pool| pool.host().distance() == distance)
            .collect_vec();

        for (pool, result) in pools.iter().zip(
            join_all(pools.iter().map(|pool| pool.ensure_core_connections())).await,
        ) {
            if let Err(error) = result {
                warn!(address = %pool.host().address(), %error, "Cannot open core connections.");
            }
        }

        Ok(())
    }

    /// Shuts everything down exactly once. Concurrent callers wait for the first one.
    pub(crate) async fn shutdown(&self) {
        let mut is_shutdown = self.lock.lock().await;
        if *is_shutdown {
            return;
        }

        *is_shutdown = true;
        self.is_shutdown.store(true, Ordering::SeqCst);
        self.shutdown_sender.send_replace(true);

        self.control_connection.shutdown();

        for host in self.metadata.all_hosts() {
            host.cancel_reconnection();
        }

        let sessions = std::mem::take(&mut *self.sessions.lock().unwrap());
        for session in sessions.iter().filter_map(Weak::upgrade) {
            session.shutdown();
        }

        info!("Cluster shut down.");
    }
}

/// Entry point of the driver. Discovers the cluster through a control connection, tracks host
/// state and creates [`Session`]s.
///
/// The cluster is cheap to clone; all clones share the same state.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""))]
pub struct Cluster<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> {
    inner: Arc<ClusterInner<T, CF>>,
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> Cluster<T, CF> {
    /// Creates a cluster and connects the control connection to one of the contact points. On
    /// failure, everything started so far is shut down.
    pub async fn new(config: ClusterConfig, connection_factory: CF) -> Result<Self> {
        let (shutdown_sender, _) = watch::channel(false);

        let metadata = Arc::new(Metadata::new(config.conviction_policy_factory.clone()));
        for addr in &config.contact_points {
            metadata.add_host(*addr);
        }

        let inner = Arc::new_cyclic(|cluster| ClusterInner {
            connection_factory: Arc::new(connection_factory),
            metadata,
            pooling_options: Arc::new(config.pooling_options.clone()),
            load_balancing_policy: config.load_balancing_policy.clone(),
            reconnection_policy: config.reconnection_policy.clone(),
            retry_policy: config.retry_policy.clone(),
            port: config.port,
            compression: config.compression,
            connect_timeout: config.connect_timeout,
            query_timeout: config.query_timeout,
            metrics: config
                .metrics_enabled
                .then(|| Arc::new(Metrics::default())),
            control_connection: ControlConnection::new(cluster.clone()),
            lock: tokio::sync::Mutex::new(false),
            sessions: Default::default(),
            is_shutdown: AtomicBool::new(false),
            shutdown_sender,
        });

        inner.populate_load_balancing();

        info!(contact_points = ?config.contact_points, "Connecting to cluster.");

        if let Err(error) = inner.control_connection.connect().await {
            error!(%error, "Cannot connect to cluster.");
            inner.shutdown().await;
            return Err(error);
        }

        Ok(Cluster { inner })
    }

    /// Creates a new session, optionally switching it to given keyspace first.
    pub async fn connect(&self, keyspace: Option<&str>) -> Result<Session<T, CF>> {
        if self.inner.is_shutdown() {
            return Err(Error::ClusterShutdown);
        }

        let session = Session::new(self.inner.clone());
        if let Some(keyspace) = keyspace {
            if let Err(error) = session.set_keyspace(keyspace).await {
                session.shutdown();
                return Err(error);
            }
        }

        Ok(session)
    }

    #[inline]
    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.inner.metadata
    }

    /// Returns collected metrics, if enabled.
    #[inline]
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.inner.metrics.as_ref()
    }

    #[inline]
    pub fn pooling_options(&self) -> &PoolingOptions {
        &self.inner.pooling_options
    }

    #[inline]
    pub fn control_connection_state(&self) -> ControlConnectionState {
        self.inner.control_connection.state()
    }

    /// Host the control connection is currently connected to.
    #[inline]
    pub fn control_connection_host(&self) -> Option<SocketAddr> {
        self.inner.control_connection.host()
    }

    #[inline]
    pub fn min_requests_per_connection(&self, distance: HostDistance) -> usize {
        self.inner
            .pooling_options
            .min_requests_per_connection(distance)
    }

    #[inline]
    pub fn set_min_requests_per_connection(
        &self,
        distance: HostDistance,
        min_requests: usize,
    ) -> Result<()> {
        self.inner
            .pooling_options
            .set_min_requests_per_connection(distance, min_requests)
    }

    #[inline]
    pub fn max_requests_per_connection(&self, distance: HostDistance) -> usize {
        self.inner
            .pooling_options
            .max_requests_per_connection(distance)
    }

    #[inline]
    pub fn set_max_requests_per_connection(
        &self,
        distance: HostDistance,
        max_requests: usize,
    ) -> Result<()> {
        self.inner
            .pooling_options
            .set_max_requests_per_connection(distance, max_requests)
    }

    #[inline]
    pub fn core_connections_per_host(&self, distance: HostDistance) -> usize {
        self.inner.pooling_options.core_connections_per_host(distance)
    }

    /// Changes the core connection count. Existing pools of hosts at given distance open missing
    /// connections before this returns.
    pub async fn set_core_connections_per_host(
        &self,
        distance: HostDistance,
        core_connections: usize,
    ) -> Result<()> {
        self.inner
            .set_core_connections_per_host(distance, core_connections)
            .await
    }

    #[inline]
    pub fn max_connections_per_host(&self, distance: HostDistance) -> usize {
        self.inner.pooling_options.max_connections_per_host(distance)
    }

    #[inline]
    pub fn set_max_connections_per_host(
        &self,
        distance: HostDistance,
        max_connections: usize,
    ) -> Result<()> {
        self.inner
            .pooling_options
            .set_max_connections_per_host(distance, max_connections)
    }

    /// Marks a host as up and stops reconnecting to it. Pools are created again on demand.
    pub fn on_up(&self, host: &Arc<Host>) {
        self.inner.on_up(host);
    }

    /// Marks a host as down, tears down its pools and schedules reconnection.
    pub fn on_down(&self, host: &Arc<Host>) {
        if host.mark_down() {
            self.inner.on_down(host);
        }
    }

    /// Registers a new host and lets the load balancing policy assign its distance.
    pub fn on_add(&self, addr: SocketAddr) -> Option<Arc<Host>> {
        let host = self.inner.metadata.add_host(addr)?;
        self.inner.on_add(&host);
        self.inner.metadata.rebuild_token_map();
        Some(host)
    }

    /// Forgets a host and tears down its pools.
    pub fn on_remove(&self, addr: SocketAddr) -> Option<Arc<Host>> {
        let host = self.inner.metadata.remove_host(addr)?;
        self.inner.on_remove(&host);
        self.inner.metadata.rebuild_token_map();
        Some(host)
    }

    /// Re-reads hosts and the token map through the control connection.
    pub async fn refresh_nodes(&self) -> Result<()> {
        self.inner
            .control_connection
            .refresh_node_list_and_token_map()
            .await
    }

    /// Re-reads schema metadata through the control connection. Without a keyspace, all
    /// keyspaces are refreshed.
    pub async fn refresh_schema(&self, keyspace: Option<&str>, table: Option<&str>) -> Result<()> {
        self.inner
            .control_connection
            .refresh_schema(keyspace, table)
            .await
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Closes the control connection, stops reconnecting and shuts down all sessions. Safe to
    /// call concurrently and more than once.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}
