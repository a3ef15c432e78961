//! In-memory transport and connection factory for unit tests.
use cassandra_protocol::compression::Compression;
use fxhash::{FxHashMap, FxHashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::cluster::{Cluster, ClusterConfigBuilder};
use crate::error::{Error, Result};
use crate::frame::{ColumnValue, QueryMessage, Request, Response, ResponseBody, Row, ServerEvent};
use crate::future::BoxFuture;
use crate::transport::{ConnectionFactory, Transport};

pub(crate) type Responder = Arc<dyn Fn(SocketAddr, &Request) -> Result<Response> + Send + Sync>;

pub(crate) fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, last_octet], 9042))
}

/// Answers system table queries as if `hosts` formed a single-datacenter cluster, and every other
/// query with an empty result.
pub(crate) fn system_responder(hosts: Vec<SocketAddr>) -> Responder {
    Arc::new(move |addr: SocketAddr, request: &Request| {
        Ok(system_response(addr, &hosts, request))
    })
}

/// Like [`system_responder`], but lets `handler` answer queries first.
pub(crate) fn responder_with(
    hosts: Vec<SocketAddr>,
    handler: impl Fn(SocketAddr, &QueryMessage) -> Option<Result<Response>> + Send + Sync + 'static,
) -> Responder {
    Arc::new(move |addr: SocketAddr, request: &Request| {
        if let Some(result) = request.as_query().and_then(|query| handler(addr, query)) {
            return result;
        }

        Ok(system_response(addr, &hosts, request))
    })
}

#[inline]
pub(crate) fn is_system_query(query: &QueryMessage) -> bool {
    query.query.contains("system") || query.query.starts_with("USE ")
}

pub(crate) type FakeCluster = Cluster<FakeTransport, FakeConnectionFactory>;

pub(crate) async fn connect_cluster(
    factory: FakeConnectionFactory,
    contact_points: &[SocketAddr],
    configure: impl FnOnce(ClusterConfigBuilder) -> ClusterConfigBuilder,
) -> Result<FakeCluster> {
    let builder = contact_points
        .iter()
        .fold(ClusterConfigBuilder::new(), |builder, addr| {
            builder.with_contact_point((*addr).into())
        });

    Cluster::new(configure(builder).build().await?, factory).await
}

/// Waits until `condition` holds, letting background tasks run in between.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("Condition not met in time");
}

pub(crate) fn system_response(
    addr: SocketAddr,
    hosts: &[SocketAddr],
    request: &Request,
) -> Response {
    let Some(query) = request.as_query() else {
        return Response::new(ResponseBody::Ready, None, vec![]);
    };

    let node_row = |addr: SocketAddr, token: i64| {
        Row::default()
            .with_column("data_center", ColumnValue::Text("dc1".into()))
            .with_column("rack", ColumnValue::Text("rack1".into()))
            .with_column("host_id", ColumnValue::Uuid(Uuid::new_v4()))
            .with_column("tokens", ColumnValue::TextSet(vec![token.to_string()]))
            .with_column("rpc_address", ColumnValue::Inet(addr.ip()))
            .with_column("native_port", ColumnValue::Int(addr.port() as i32))
    };

    if query.query.contains("system.local") {
        let token = hosts.iter().position(|host| *host == addr).unwrap_or(0) as i64;
        Response::rows(vec![node_row(addr, token)
            .with_column("cluster_name", ColumnValue::Text("test".into()))
            .with_column(
                "partitioner",
                ColumnValue::Text("org.apache.cassandra.dht.Murmur3Partitioner".into()),
            )])
    } else if query.query.contains("system.peers") {
        Response::rows(
            hosts
                .iter()
                .enumerate()
                .filter(|(_, host)| **host != addr)
                .map(|(index, host)| {
                    node_row(*host, index as i64).with_column("peer", ColumnValue::Inet(host.ip()))
                })
                .collect(),
        )
    } else if query.query.starts_with("USE ") {
        Response::new(
            ResponseBody::SetKeyspace(query.query[4..].trim_matches('"').to_string()),
            None,
            vec![],
        )
    } else if query.query.starts_with("SELECT") {
        Response::rows(vec![])
    } else {
        Response::void()
    }
}

#[derive(Default)]
struct FactoryState {
    refused: Mutex<FxHashSet<SocketAddr>>,
    opened: Mutex<FxHashMap<SocketAddr, usize>>,
    closed: AtomicUsize,
    requests: Mutex<Vec<(SocketAddr, Request)>>,
    error_handlers: Mutex<Vec<(SocketAddr, Sender<Error>)>>,
    event_handlers: Mutex<Vec<Sender<ServerEvent>>>,
    connections: Mutex<Vec<Arc<ConnectionState>>>,
    send_delay: Mutex<Option<Duration>>,
    supports_tracing: AtomicBool,
}

struct ConnectionState {
    addr: SocketAddr,
    broken: AtomicBool,
    closed: AtomicBool,
}

pub(crate) struct FakeTransport {
    state: Arc<ConnectionState>,
    factory: Arc<FactoryState>,
    responder: Responder,
}

impl Transport for FakeTransport {
    fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            let delay = *self.factory.send_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.is_broken() {
                return Err(Error::Connection {
                    addr: self.state.addr,
                    message: "Connection broken".into(),
                });
            }

            self.factory
                .requests
                .lock()
                .unwrap()
                .push((self.state.addr, request.clone()));

            let result = (self.responder)(self.state.addr, request);
            if matches!(&result, Err(error) if error.is_connection_error()) {
                self.state.broken.store(true, Ordering::Relaxed);
            }

            result
        })
    }

    fn close(&self) {
        if !self.state.closed.swap(true, Ordering::Relaxed) {
            self.factory.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn is_broken(&self) -> bool {
        self.state.broken.load(Ordering::Relaxed) || self.state.closed.load(Ordering::Relaxed)
    }

    fn address(&self) -> SocketAddr {
        self.state.addr
    }

    fn supports_tracing(&self) -> bool {
        self.factory.supports_tracing.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub(crate) struct FakeConnectionFactory {
    state: Arc<FactoryState>,
    responder: Responder,
}

impl FakeConnectionFactory {
    pub(crate) fn new(responder: Responder) -> Self {
        let state = FactoryState::default();
        state.supports_tracing.store(true, Ordering::Relaxed);

        FakeConnectionFactory {
            state: Arc::new(state),
            responder,
        }
    }

    pub(crate) fn refuse(&self, addr: SocketAddr) {
        self.state.refused.lock().unwrap().insert(addr);
    }

    pub(crate) fn accept(&self, addr: SocketAddr) {
        self.state.refused.lock().unwrap().remove(&addr);
    }

    pub(crate) fn opened(&self, addr: SocketAddr) -> usize {
        self.state
            .opened
            .lock()
            .unwrap()
            .get(&addr)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_opened(&self) -> usize {
        self.state.opened.lock().unwrap().values().sum()
    }

    pub(crate) fn closed(&self) -> usize {
        self.state.closed.load(Ordering::Relaxed)
    }

    pub(crate) fn requests(&self) -> Vec<(SocketAddr, Request)> {
        self.state.requests.lock().unwrap().clone()
    }

    pub(crate) fn set_send_delay(&self, delay: Option<Duration>) {
        *self.state.send_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_supports_tracing(&self, supports_tracing: bool) {
        self.state
            .supports_tracing
            .store(supports_tracing, Ordering::Relaxed);
    }

    /// Breaks every open connection to `addr` and notifies their error handlers.
    pub(crate) async fn break_connections(&self, addr: SocketAddr) {
        for connection in self.state.connections.lock().unwrap().iter() {
            if connection.addr == addr {
                connection.broken.store(true, Ordering::Relaxed);
            }
        }

        let handlers: Vec<_> = self
            .state
            .error_handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(handler_addr, _)| *handler_addr == addr)
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            let _ = handler
                .send(Error::Connection {
                    addr,
                    message: "Connection reset".into(),
                })
                .await;
        }
    }

    pub(crate) async fn push_event(&self, event: ServerEvent) {
        let handlers: Vec<_> = self.state.event_handlers.lock().unwrap().clone();
        for handler in handlers {
            let _ = handler.send(event.clone()).await;
        }
    }
}

impl ConnectionFactory<FakeTransport> for FakeConnectionFactory {
    fn open(
        &self,
        addr: SocketAddr,
        _compression: Compression,
        event_handler: Option<Sender<ServerEvent>>,
        error_handler: Option<Sender<Error>>,
    ) -> BoxFuture<'_, Result<FakeTransport>> {
        Box::pin(async move {
            if self.state.refused.lock().unwrap().contains(&addr) {
                return Err(Error::Connection {
                    addr,
                    message: "Connection refused".into(),
                });
            }

            *self.state.opened.lock().unwrap().entry(addr).or_default() += 1;

            if let Some(error_handler) = error_handler {
                self.state
                    .error_handlers
                    .lock()
                    .unwrap()
                    .push((addr, error_handler));
            }

            if let Some(event_handler) = event_handler {
                self.state.event_handlers.lock().unwrap().push(event_handler);
            }

            let connection = Arc::new(ConnectionState {
                addr,
                broken: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            });
            self.state
                .connections
                .lock()
                .unwrap()
                .push(connection.clone());

            Ok(FakeTransport {
                state: connection,
                factory: self.state.clone(),
                responder: self.responder.clone(),
            })
        })
    }
}
