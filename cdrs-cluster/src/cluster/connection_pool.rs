use cassandra_protocol::compression::Compression;
use cassandra_protocol::consistency::Consistency;
use cassandra_protocol::query::utils::quote;
use futures::future::join_all;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::*;

use crate::cluster::{Host, KeyspaceHolder, PoolingOptions};
use crate::error::{Error, Result};
use crate::frame::{Request, ServerEvent};
use crate::metrics::Metrics;
use crate::transport::{ConnectionFactory, Transport};

/// Opens a new connection, bounded by an optional timeout.
pub(crate) async fn new_connection<T: Transport, CF: ConnectionFactory<T>>(
    connection_factory: &CF,
    addr: SocketAddr,
    compression: Compression,
    timeout: Option<Duration>,
    event_handler: Option<Sender<ServerEvent>>,
    error_handler: Option<Sender<Error>>,
) -> Result<T> {
    let connection = connection_factory.open(addr, compression, event_handler, error_handler);
    if let Some(timeout) = timeout {
        tokio::time::timeout(timeout, connection)
            .await
            .map_err(|_| Error::Timeout(format!("Timeout waiting for connection to: {addr}")))
            .and_then(|result| result)
    } else {
        connection.await
    }
}

/// Switches given connection to a keyspace.
pub(crate) async fn use_keyspace<T: Transport>(connection: &T, keyspace: &str) -> Result<()> {
    let request = Request::query(format!("USE {}", quote(keyspace)), Consistency::One);
    connection.send(&request).await.map(|_| ())
}

/// Creates pools for a single session. All pools share the same settings and keyspace.
pub(crate) struct ConnectionPoolFactory<T: Transport + 'static, CF: ConnectionFactory<T> + 'static>
{
    connection_factory: Arc<CF>,
    pooling_options: Arc<PoolingOptions>,
    keyspace_holder: Arc<KeyspaceHolder>,
    compression: Compression,
    connect_timeout: Option<Duration>,
    metrics: Option<Arc<Metrics>>,
    _transport: PhantomData<T>,
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> ConnectionPoolFactory<T, CF> {
    pub(crate) fn new(
        connection_factory: Arc<CF>,
        pooling_options: Arc<PoolingOptions>,
        keyspace_holder: Arc<KeyspaceHolder>,
        compression: Compression,
        connect_timeout: Option<Duration>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        ConnectionPoolFactory {
            connection_factory,
            pooling_options,
            keyspace_holder,
            compression,
            connect_timeout,
            metrics,
            _transport: Default::default(),
        }
    }

    /// Creates an empty pool. Connections are opened by
    /// [`ConnectionPool::ensure_core_connections`] or on demand.
    pub(crate) fn create(self: &Arc<Self>, host: Arc<Host>) -> Arc<ConnectionPool<T, CF>> {
        debug!(
            address = %host.address(),
            distance = %host.distance(),
            "Creating connection pool."
        );

        Arc::new(ConnectionPool {
            host,
            factory: self.clone(),
            state: Mutex::new(PoolState {
                connections: Vec::new(),
                opening: 0,
                is_shutdown: false,
            }),
            is_growing: AtomicBool::new(false),
        })
    }

    async fn open_connection(&self, addr: SocketAddr) -> Result<T> {
        let connection = new_connection(
            self.connection_factory.as_ref(),
            addr,
            self.compression,
            self.connect_timeout,
            None,
            None,
        )
        .await?;

        if let Some(keyspace) = self.keyspace_holder.current_keyspace() {
            if let Err(error) = use_keyspace(&connection, &keyspace).await {
                connection.close();
                return Err(error);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_opened_connection();
        }

        Ok(connection)
    }

    fn close_connection(&self, connection: &T) {
        connection.close();

        if let Some(metrics) = &self.metrics {
            metrics.record_closed_connection();
        }
    }
}

struct PoolEntry<T> {
    connection: T,
    in_flight: AtomicUsize,
}

struct PoolState<T> {
    connections: Vec<Arc<PoolEntry<T>>>,
    opening: usize,
    is_shutdown: bool,
}

impl<T> PoolState<T> {
    #[inline]
    fn total(&self) -> usize {
        self.connections.len() + self.opening
    }

    fn remove(&mut self, entry: &Arc<PoolEntry<T>>) -> bool {
        let len = self.connections.len();
        self.connections.retain(|existing| !Arc::ptr_eq(existing, entry));
        len != self.connections.len()
    }
}

/// A connection borrowed from a pool. Counts as an in-flight request on its connection until
/// dropped or given back with [`ConnectionPool::return_connection`].
pub struct BorrowedConnection<T> {
    entry: Arc<PoolEntry<T>>,
}

impl<T> Deref for BorrowedConnection<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.entry.connection
    }
}

impl<T> Drop for BorrowedConnection<T> {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T> Debug for BorrowedConnection<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowedConnection")
            .field("in_flight", &self.entry.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

/// Reserved slot for a connection being opened. Released on drop unless the connection made it
/// into the pool, so an abandoned open never leaks capacity.
struct OpeningSlot<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> {
    pool: Arc<ConnectionPool<T, CF>>,
    is_released: bool,
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> OpeningSlot<T, CF> {
    fn new(pool: Arc<ConnectionPool<T, CF>>) -> Self {
        OpeningSlot {
            pool,
            is_released: false,
        }
    }

    /// Adds the opened connection to the pool with given initial in-flight count.
    fn finish(mut self, connection: Result<T>, in_flight: usize) -> Result<Arc<PoolEntry<T>>> {
        self.is_released = true;

        let mut state = self.pool.state.lock().unwrap();
        state.opening -= 1;

        let connection = connection?;
        if state.is_shutdown {
            drop(state);
            self.pool.factory.close_connection(&connection);
            return Err(Error::PoolShutdown(self.pool.host.address()));
        }

        let entry = Arc::new(PoolEntry {
            connection,
            in_flight: AtomicUsize::new(in_flight),
        });

        state.connections.push(entry.clone());
        Ok(entry)
    }
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> Drop for OpeningSlot<T, CF> {
    fn drop(&mut self) {
        if !self.is_released {
            self.pool.state.lock().unwrap().opening -= 1;
        }
    }
}

/// Connections of a single session to a single host. Sized by the distance of the host: keeps at
/// least core connections open, grows on demand up to max connections and never allows more
/// than max requests in flight on a single connection.
pub struct ConnectionPool<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> {
    host: Arc<Host>,
    factory: Arc<ConnectionPoolFactory<T, CF>>,
    state: Mutex<PoolState<T>>,
    is_growing: AtomicBool,
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> Debug for ConnectionPool<T, CF> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ConnectionPool")
            .field("host", &self.host.address())
            .field("open", &state.connections.len())
            .field("opening", &state.opening)
            .field("is_shutdown", &state.is_shutdown)
            .finish()
    }
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> ConnectionPool<T, CF> {
    #[inline]
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Number of open connections.
    #[inline]
    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Number of requests currently in flight on all connections.
    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .connections
            .iter()
            .map(|entry| entry.in_flight.load(Ordering::Relaxed))
            .sum()
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().is_shutdown
    }

    /// Borrows the least busy connection. Opens a new connection if all are saturated and the
    /// pool can still grow; fails with [`Error::PoolExhausted`] otherwise, without waiting.
    pub async fn borrow_connection(self: &Arc<Self>) -> Result<BorrowedConnection<T>> {
        let addr = self.host.address();
        let distance = self.host.distance();
        let pooling_options = &self.factory.pooling_options;
        let max_requests = pooling_options.max_requests_per_connection(distance);
        let min_requests = pooling_options.min_requests_per_connection(distance);
        let max_connections = pooling_options.max_connections_per_host(distance);

        let (slot, broken) = {
            let mut state = self.state.lock().unwrap();
            if state.is_shutdown {
                return Err(Error::PoolShutdown(addr));
            }

            let (broken, healthy): (Vec<_>, Vec<_>) = std::mem::take(&mut state.connections)
                .into_iter()
                .partition(|entry| entry.connection.is_broken());
            state.connections = healthy;

            let least_busy = state
                .connections
                .iter()
                .min_by_key(|entry| entry.in_flight.load(Ordering::Acquire))
                .cloned();

            match least_busy {
                Some(entry) if entry.in_flight.load(Ordering::Acquire) < max_requests => {
                    let in_flight = entry.in_flight.fetch_add(1, Ordering::AcqRel);
                    let should_grow =
                        in_flight >= min_requests && state.total() < max_connections;
                    drop(state);

                    self.close_broken(broken);
                    if should_grow {
                        self.grow_in_background();
                    }

                    return Ok(BorrowedConnection { entry });
                }
                _ if state.total() < max_connections => {
                    state.opening += 1;
                }
                _ => {
                    drop(state);
                    self.close_broken(broken);

                    debug!(%addr, max_connections, max_requests, "Connection pool exhausted.");
                    return Err(Error::PoolExhausted(addr));
                }
            }

            (OpeningSlot::new(self.clone()), broken)
        };

        self.close_broken(broken);

        let connection = self.factory.open_connection(addr).await;
        if let Err(error) = &connection {
            debug!(%error, %addr, "Error opening connection.");
        }

        slot.finish(connection, 1)
            .map(|entry| BorrowedConnection { entry })
    }

    /// Gives back a borrowed connection. Healthy connections stay open; broken ones are removed
    /// and replaced in the background.
    pub fn return_connection(self: &Arc<Self>, connection: BorrowedConnection<T>) {
        if connection.is_broken() {
            debug!(address = %self.host.address(), "Removing broken connection.");
            self.discard_connection(connection);
        }
    }

    /// Removes and closes a connection which cannot be reused, e.g. because a response might
    /// still arrive on it. The pool is refilled to core size in the background.
    pub fn discard_connection(self: &Arc<Self>, connection: BorrowedConnection<T>) {
        let entry = connection.entry.clone();
        drop(connection);

        let removed = self.state.lock().unwrap().remove(&entry);
        if removed {
            self.factory.close_connection(&entry.connection);
        }

        self.refill_in_background();
    }

    /// Opens connections until the pool holds at least core connections for the current distance
    /// of the host. Connections being opened count towards the total. Returns the first error
    /// encountered, if any.
    pub async fn ensure_core_connections(self: &Arc<Self>) -> Result<()> {
        let core_connections = self
            .factory
            .pooling_options
            .core_connections_per_host(self.host.distance());

        let missing = {
            let mut state = self.state.lock().unwrap();
            if state.is_shutdown {
                return Ok(());
            }

            let missing = core_connections.saturating_sub(state.total());
            state.opening += missing;
            missing
        };

        if missing == 0 {
            return Ok(());
        }

        let addr = self.host.address();
        debug!(%addr, missing, core_connections, "Opening core connections.");

        let results = join_all((0..missing).map(|_| {
            let slot = OpeningSlot::new(self.clone());
            async move {
                let connection = self.factory.open_connection(addr).await;
                slot.finish(connection, 0).map(|_| ())
            }
        }))
        .await;

        let mut first_error = None;
        for error in results.into_iter().filter_map(|result| result.err()) {
            warn!(%error, %addr, "Error opening core connection.");
            first_error.get_or_insert(error);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Switches every open connection to given keyspace.
    pub async fn use_keyspace(&self, keyspace: &str) -> Result<()> {
        let entries = self.state.lock().unwrap().connections.clone();

        join_all(
            entries
                .iter()
                .filter(|entry| !entry.connection.is_broken())
                .map(|entry| use_keyspace(&entry.connection, keyspace)),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Closes every connection. Subsequent borrows fail with [`Error::PoolShutdown`]. Does
    /// nothing if already shut down.
    pub fn shutdown(&self) {
        let connections = {
            let mut state = self.state.lock().unwrap();
            if state.is_shutdown {
                return;
            }

            state.is_shutdown = true;
            std::mem::take(&mut state.connections)
        };

        debug!(
            address = %self.host.address(),
            connections = connections.len(),
            "Shutting down connection pool."
        );

        for entry in connections {
            self.factory.close_connection(&entry.connection);
        }
    }

    fn close_broken(&self, broken: Vec<Arc<PoolEntry<T>>>) {
        if broken.is_empty() {
            return;
        }

        debug!(
            address = %self.host.address(),
            count = broken.len(),
            "Removing broken connections."
        );

        for entry in broken {
            self.factory.close_connection(&entry.connection);
        }
    }

    fn grow_in_background(self: &Arc<Self>) {
        if self.is_growing.swap(true, Ordering::AcqRel) {
            return;
        }

        let slot = {
            let mut state = self.state.lock().unwrap();
            let max_connections = self
                .factory
                .pooling_options
                .max_connections_per_host(self.host.distance());

            if state.is_shutdown || state.total() >= max_connections {
                self.is_growing.store(false, Ordering::Release);
                return;
            }

            state.opening += 1;
            OpeningSlot::new(self.clone())
        };

        let pool = self.clone();
        tokio::spawn(async move {
            let addr = pool.host.address();
            debug!(%addr, "Opening additional connection.");

            let connection = pool.factory.open_connection(addr).await;
            if let Err(error) = slot.finish(connection, 0) {
                warn!(%error, %addr, "Error opening additional connection.");
            }

            pool.is_growing.store(false, Ordering::Release);
        });
    }

    fn refill_in_background(self: &Arc<Self>) {
        let pool = self.clone();
        tokio::spawn(async move {
            if let Err(error) = pool.ensure_core_connections().await {
                warn!(%error, address = %pool.host.address(), "Error refilling connection pool.");
            }
        });
    }
}
