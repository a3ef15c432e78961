use arc_swap::ArcSwapOption;
use atomic::Atomic;
use bytemuck::NoUninit;
use cassandra_protocol::consistency::Consistency;
use cassandra_protocol::token::Murmur3Token;
use derive_more::Display;
use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::*;

use crate::cluster::cluster_handle::{wait_for_shutdown, ClusterInner};
use crate::cluster::connection_pool::new_connection;
use crate::cluster::{Host, HostInfo, KeyspaceMetadata, Metadata, ReplicationStrategy};
use crate::error::{Error, HostErrors, NoHostAvailableError, Result};
use crate::frame::{EventType, Request, Row, ServerEvent, StatusChangeType};
use crate::load_balancing::rotated;
use crate::transport::{ConnectionFactory, Transport};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);
const EVENT_CHANNEL_CAPACITY: usize = 32;

const SELECT_LOCAL: &str = "SELECT * FROM system.local WHERE key='local'";
const SELECT_PEERS: &str = "SELECT * FROM system.peers";
const SELECT_KEYSPACES: &str = "SELECT keyspace_name, replication FROM system_schema.keyspaces";
const SELECT_TABLES: &str = "SELECT keyspace_name, table_name FROM system_schema.tables";
const SELECT_LEGACY_KEYSPACES: &str =
    "SELECT keyspace_name, strategy_class, strategy_options FROM system.schema_keyspaces";
const SELECT_LEGACY_TABLES: &str =
    "SELECT keyspace_name, columnfamily_name FROM system.schema_columnfamilies";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, NoUninit)]
#[repr(u8)]
pub enum ControlConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Shutdown,
}

/// Dedicated connection used to discover the cluster. Registers for server events and keeps
/// hosts, the token map and schema metadata current. A lost connection is re-established in the
/// background, walking known hosts round-robin.
pub(crate) struct ControlConnection<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> {
    cluster: Weak<ClusterInner<T, CF>>,
    state: Atomic<ControlConnectionState>,
    connection: ArcSwapOption<T>,
    reconnect_lock: tokio::sync::Mutex<()>,
    prev_idx: AtomicUsize,
    event_sender: mpsc::Sender<ServerEvent>,
    event_receiver: Mutex<Option<mpsc::Receiver<ServerEvent>>>,
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> ControlConnection<T, CF> {
    pub(crate) fn new(cluster: Weak<ClusterInner<T, CF>>) -> Self {
        let (event_sender, event_receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        ControlConnection {
            cluster,
            state: Atomic::new(ControlConnectionState::Disconnected),
            connection: Default::default(),
            reconnect_lock: Default::default(),
            prev_idx: Default::default(),
            event_sender,
            event_receiver: Mutex::new(Some(event_receiver)),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> ControlConnectionState {
        self.state.load(Ordering::SeqCst)
    }

    /// Address of the host the control connection is currently connected to.
    pub(crate) fn host(&self) -> Option<SocketAddr> {
        self.connection
            .load_full()
            .map(|connection| connection.address())
    }

    /// Changes state, unless already shut down.
    fn transition(&self, state: ControlConnectionState) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != ControlConnectionState::Shutdown).then_some(state)
            })
            .is_ok()
    }

    /// Connects immediately and starts background monitoring. Does nothing when shut down or
    /// already connected.
    pub(crate) async fn connect(&self) -> Result<()> {
        if matches!(
            self.state(),
            ControlConnectionState::Shutdown | ControlConnectionState::Connected
        ) {
            return Ok(());
        }

        let error_receiver = self.reconnect().await?;
        self.start(error_receiver);
        Ok(())
    }

    fn start(&self, error_receiver: mpsc::Receiver<Error>) {
        let Some(cluster) = self.cluster.upgrade() else {
            return;
        };

        if let Some(event_receiver) = self.event_receiver.lock().unwrap().take() {
            tokio::spawn(Self::process_events(
                self.cluster.clone(),
                event_receiver,
                cluster.shutdown_receiver(),
            ));
        }

        tokio::spawn(Self::monitor(
            self.cluster.clone(),
            error_receiver,
            cluster.shutdown_receiver(),
        ));
    }

    /// Hosts to try for the control connection. Uses its own round-robin cursor, so reconnecting
    /// does not shift query plans of the cluster load balancing policy. Distances are not taken
    /// into account.
    fn query_plan(&self, cluster: &ClusterInner<T, CF>) -> impl Iterator<Item = Arc<Host>> {
        let hosts = Arc::new(cluster.metadata.all_hosts());
        let start = self.prev_idx.fetch_add(1, Ordering::Relaxed);
        rotated(hosts, start).filter(|host| !host.is_down())
    }

    /// Tries known hosts until one accepts the control connection. Reconnections never overlap.
    /// Returns the error channel of the new connection.
    pub(crate) async fn reconnect(&self) -> Result<mpsc::Receiver<Error>> {
        let _guard = self.reconnect_lock.lock().await;

        if !self.transition(ControlConnectionState::Connecting) {
            return Err(Error::ClusterShutdown);
        }

        let cluster = self.cluster.upgrade().ok_or(Error::ClusterShutdown)?;
        let mut errors = HostErrors::default();

        for host in self.query_plan(&cluster) {
            match self.try_connect(&cluster, &host).await {
                Ok(error_receiver) => return Ok(error_receiver),
                Err(Error::ClusterShutdown) => return Err(Error::ClusterShutdown),
                Err(error) => {
                    warn!(address = %host.address(), %error, "Cannot open control connection.");
                    errors.insert(host.address(), error);
                }
            }
        }

        self.transition(ControlConnectionState::Disconnected);

        Err(NoHostAvailableError::new(
            "Unable to connect to any host for the control connection",
            errors,
        )
        .into())
    }

    async fn try_connect(
        &self,
        cluster: &Arc<ClusterInner<T, CF>>,
        host: &Arc<Host>,
    ) -> Result<mpsc::Receiver<Error>> {
        let addr = host.address();
        let (error_sender, error_receiver) = mpsc::channel(1);

        debug!(%addr, "Opening control connection.");

        let connection = Arc::new(
            new_connection(
                cluster.connection_factory.as_ref(),
                addr,
                cluster.compression,
                cluster.connect_timeout,
                Some(self.event_sender.clone()),
                Some(error_sender),
            )
            .await?,
        );

        if let Err(error) = self.initialize(cluster, &connection).await {
            connection.close();
            return Err(error);
        }

        if !self.transition(ControlConnectionState::Connected) {
            connection.close();
            return Err(Error::ClusterShutdown);
        }

        if let Some(previous) = self.connection.swap(Some(connection)) {
            previous.close();
        }

        cluster.mark_host_up(host);
        info!(%addr, "Control connection established.");

        Ok(error_receiver)
    }

    async fn initialize(&self, cluster: &ClusterInner<T, CF>, connection: &Arc<T>) -> Result<()> {
        connection
            .send(&Request::Register(vec![
                EventType::TopologyChange,
                EventType::StatusChange,
                EventType::SchemaChange,
            ]))
            .await?;

        self.refresh_nodes_with(cluster, connection).await?;

        if let Err(error) = self.refresh_schema_with(cluster, connection, None).await {
            warn!(%error, "Cannot refresh schema metadata.");
        }

        Ok(())
    }

    /// Closes a failed connection. The state moves straight from connected to connecting.
    fn begin_reconnect(&self) {
        self.transition(ControlConnectionState::Connecting);
        if let Some(connection) = self.connection.swap(None) {
            connection.close();
        }
    }

    /// Closes the connection for good. Background tasks stop on the cluster shutdown signal.
    pub(crate) fn shutdown(&self) {
        self.state
            .store(ControlConnectionState::Shutdown, Ordering::SeqCst);
        if let Some(connection) = self.connection.swap(None) {
            connection.close();
        }

        debug!("Control connection shut down.");
    }

    async fn monitor(
        cluster: Weak<ClusterInner<T, CF>>,
        mut error_receiver: mpsc::Receiver<Error>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => return,
                error = error_receiver.recv() => match error {
                    Some(error) => warn!(%error, "Control connection failed."),
                    None => warn!("Control connection closed."),
                },
            }

            let mut schedule = match cluster.upgrade() {
                Some(cluster) => {
                    cluster.control_connection.begin_reconnect();
                    cluster.reconnection_policy.new_schedule()
                }
                None => return,
            };

            loop {
                let Some(cluster) = cluster.upgrade() else {
                    return;
                };

                let error = match cluster.control_connection.reconnect().await {
                    Ok(receiver) => {
                        error_receiver = receiver;
                        break;
                    }
                    Err(Error::ClusterShutdown) => return,
                    Err(error) => error,
                };

                drop(cluster);

                let delay = schedule.next_delay().unwrap_or(DEFAULT_RECONNECT_DELAY);
                warn!(%error, ?delay, "Control connection reconnection failed.");

                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    async fn process_events(
        cluster: Weak<ClusterInner<T, CF>>,
        mut event_receiver: mpsc::Receiver<ServerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => return,
                event = event_receiver.recv() => event,
            };

            let Some(event) = event else {
                return;
            };

            let Some(cluster) = cluster.upgrade() else {
                return;
            };

            debug!(?event, "Received server event.");
            cluster.control_connection.handle_event(&cluster, event).await;
        }
    }

    async fn handle_event(&self, cluster: &Arc<ClusterInner<T, CF>>, event: ServerEvent) {
        match event {
            ServerEvent::TopologyChange { .. } => {
                if let Err(error) = self.refresh_node_list_and_token_map().await {
                    warn!(%error, "Cannot refresh node list.");
                }
            }
            ServerEvent::StatusChange {
                change_type: StatusChangeType::Up,
                addr,
            } => match cluster.metadata.get_host(addr) {
                Some(host) => cluster.on_up(&host),
                None => {
                    if let Err(error) = self.refresh_node_list_and_token_map().await {
                        warn!(%error, "Cannot refresh node list.");
                    }
                }
            },
            ServerEvent::StatusChange {
                change_type: StatusChangeType::Down,
                addr,
            } => {
                if let Some(host) = cluster.metadata.get_host(addr) {
                    if host.mark_down() {
                        cluster.on_down(&host);
                    }
                }
            }
            ServerEvent::SchemaChange(change) => {
                if let Err(error) = self
                    .refresh_schema(Some(&change.keyspace), change.table.as_deref())
                    .await
                {
                    warn!(%error, keyspace = %change.keyspace, "Cannot refresh schema metadata.");
                }
            }
        }
    }

    /// Re-reads hosts from system tables, adding, updating and removing hosts as needed, then
    /// rebuilds the token map. Does nothing when not connected.
    pub(crate) async fn refresh_node_list_and_token_map(&self) -> Result<()> {
        let (Some(cluster), Some(connection)) =
            (self.cluster.upgrade(), self.connection.load_full())
        else {
            return Ok(());
        };

        self.refresh_nodes_with(&cluster, &connection).await
    }

    async fn refresh_nodes_with(
        &self,
        cluster: &ClusterInner<T, CF>,
        connection: &Arc<T>,
    ) -> Result<()> {
        let local = query_rows(connection.as_ref(), SELECT_LOCAL).await?;
        let peers = query_rows(connection.as_ref(), SELECT_PEERS).await?;

        let is_shutdown = cluster.lock.lock().await;
        if *is_shutdown {
            return Err(Error::ClusterShutdown);
        }

        let metadata = &cluster.metadata;
        let mut found = FxHashSet::default();
        let mut added = Vec::new();

        match local.first() {
            Some(row) => {
                metadata.set_cluster_info(
                    row.get_text("cluster_name").map(str::to_string),
                    row.get_text("partitioner").map(str::to_string),
                );

                let addr = connection.address();
                found.insert(addr);
                added.extend(update_host(metadata, addr, row));
            }
            None => warn!("No local row found in system tables."),
        }

        for row in &peers {
            let Some(addr) = peer_address(row, cluster.port) else {
                warn!("Skipping peer without an address.");
                continue;
            };

            if found.insert(addr) {
                added.extend(update_host(metadata, addr, row));
            }
        }

        let removed = metadata
            .all_hosts()
            .into_iter()
            .filter(|host| !found.contains(&host.address()))
            .collect_vec();

        for host in &removed {
            metadata.remove_host(host.address());
            cluster.on_remove(host);
        }

        for host in &added {
            cluster.on_add(host);
        }

        metadata.rebuild_token_map();
        cluster.populate_load_balancing();

        debug!(
            hosts = found.len(),
            added = added.len(),
            removed = removed.len(),
            "Refreshed node list and token map."
        );

        Ok(())
    }

    /// Refreshes schema metadata. Without a keyspace, all keyspaces are replaced; otherwise only
    /// given keyspace is updated, or removed if it no longer exists. Does nothing when not
    /// connected.
    pub(crate) async fn refresh_schema(
        &self,
        keyspace: Option<&str>,
        table: Option<&str>,
    ) -> Result<()> {
        let (Some(cluster), Some(connection)) =
            (self.cluster.upgrade(), self.connection.load_full())
        else {
            return Ok(());
        };

        if let Some(table) = table {
            debug!(?keyspace, table, "Refreshing schema after table change.");
        }

        self.refresh_schema_with(&cluster, &connection, keyspace)
            .await
    }

    async fn refresh_schema_with(
        &self,
        cluster: &ClusterInner<T, CF>,
        connection: &Arc<T>,
        keyspace: Option<&str>,
    ) -> Result<()> {
        let filter = keyspace
            .map(|keyspace| {
                format!(
                    " WHERE keyspace_name = '{}'",
                    keyspace.replace('\'', "''")
                )
            })
            .unwrap_or_default();

        let mut keyspaces = match query_keyspaces(connection.as_ref(), &filter).await {
            Ok(keyspaces) => keyspaces,
            Err(error) if error.is_server_error() => {
                debug!(%error, "Falling back to legacy schema tables.");
                query_legacy_keyspaces(connection.as_ref(), &filter).await?
            }
            Err(error) => return Err(error),
        };

        match keyspace {
            Some(keyspace) => cluster
                .metadata
                .update_keyspace(keyspace, keyspaces.remove(keyspace)),
            None => cluster.metadata.set_keyspaces(keyspaces),
        }

        Ok(())
    }
}

async fn query_rows<T: Transport>(connection: &T, query: &str) -> Result<Vec<Row>> {
    connection
        .send(&Request::query(query, Consistency::One))
        .await?
        .into_rows()
        .ok_or_else(|| Error::UnexpectedResponse(format!("Expected rows for: {query}")))
}

/// Adds or updates a host. Returns the host if it is new.
fn update_host(metadata: &Metadata, addr: SocketAddr, row: &Row) -> Option<Arc<Host>> {
    let added = metadata.add_host(addr);
    if let Some(host) = added.clone().or_else(|| metadata.get_host(addr)) {
        host.set_info(host_info(row));
    }

    added
}

fn host_info(row: &Row) -> HostInfo {
    let tokens = row
        .get_text_set("tokens")
        .unwrap_or_default()
        .iter()
        .filter_map(|token| match token.parse::<i64>() {
            Ok(token) => Some(Murmur3Token::new(token)),
            Err(error) => {
                warn!(%token, %error, "Ignoring invalid token.");
                None
            }
        })
        .collect();

    HostInfo::new(
        row.get_uuid("host_id"),
        row.get_text("data_center").map(str::to_string),
        row.get_text("rack").map(str::to_string),
        tokens,
    )
}

/// Peers advertise `rpc_address`, unless it is a wildcard, in which case the listen address in
/// `peer` is used.
fn peer_address(row: &Row, default_port: u16) -> Option<SocketAddr> {
    let ip = match row.get_inet("rpc_address") {
        Some(ip) if !ip.is_unspecified() => ip,
        _ => row.get_inet("peer")?,
    };

    let port = row
        .get_int("native_port")
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(default_port);

    Some(SocketAddr::new(ip, port))
}

async fn query_keyspaces<T: Transport>(
    connection: &T,
    filter: &str,
) -> Result<FxHashMap<String, KeyspaceMetadata>> {
    let keyspace_rows = query_rows(connection, &format!("{SELECT_KEYSPACES}{filter}")).await?;
    let table_rows = query_rows(connection, &format!("{SELECT_TABLES}{filter}")).await?;

    Ok(build_keyspaces(
        &keyspace_rows,
        &table_rows,
        "table_name",
        |row| {
            row.get_text_map("replication")
                .map(ReplicationStrategy::from_replication)
        },
    ))
}

async fn query_legacy_keyspaces<T: Transport>(
    connection: &T,
    filter: &str,
) -> Result<FxHashMap<String, KeyspaceMetadata>> {
    let keyspace_rows =
        query_rows(connection, &format!("{SELECT_LEGACY_KEYSPACES}{filter}")).await?;
    let table_rows = query_rows(connection, &format!("{SELECT_LEGACY_TABLES}{filter}")).await?;

    Ok(build_keyspaces(
        &keyspace_rows,
        &table_rows,
        "columnfamily_name",
        |row| {
            let strategy_class = row.get_text("strategy_class")?;
            let strategy_options = row.get_text("strategy_options").unwrap_or("{}");
            Some(ReplicationStrategy::from_legacy(
                strategy_class,
                strategy_options,
            ))
        },
    ))
}

fn build_keyspaces(
    keyspace_rows: &[Row],
    table_rows: &[Row],
    table_column: &str,
    replication_strategy: impl Fn(&Row) -> Option<Result<ReplicationStrategy>>,
) -> FxHashMap<String, KeyspaceMetadata> {
    let mut tables: FxHashMap<&str, Vec<String>> = FxHashMap::default();
    for row in table_rows {
        if let (Some(keyspace), Some(table)) =
            (row.get_text("keyspace_name"), row.get_text(table_column))
        {
            tables.entry(keyspace).or_default().push(table.to_string());
        }
    }

    keyspace_rows
        .iter()
        .filter_map(|row| {
            let name = row.get_text("keyspace_name")?;
            let strategy = match replication_strategy(row) {
                Some(Ok(strategy)) => strategy,
                Some(Err(error)) => {
                    warn!(keyspace = name, %error, "Unknown replication settings.");
                    ReplicationStrategy::Other
                }
                None => ReplicationStrategy::Other,
            };

            Some((
                name.to_string(),
                KeyspaceMetadata::new(
                    strategy,
                    tables.remove(name).unwrap_or_default(),
                ),
            ))
        })
        .collect()
}
