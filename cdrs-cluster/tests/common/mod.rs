use cdrs_cluster::cluster::{Cluster, ClusterConfigBuilder};
use cdrs_cluster::compression::Compression;
use cdrs_cluster::error::{Error, Result};
use cdrs_cluster::frame::{ColumnValue, Request, Response, ResponseBody, Row, ServerEvent};
use cdrs_cluster::future::BoxFuture;
use cdrs_cluster::retry::NeverReconnectionPolicy;
use cdrs_cluster::transport::{ConnectionFactory, Transport};
use fxhash::FxHashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

pub type TestCluster = Cluster<TestConnection, TestConnectionFactory>;

pub fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, last_octet], 9042))
}

#[derive(Default)]
struct Shared {
    hosts: Vec<SocketAddr>,
    failing: Mutex<FxHashSet<SocketAddr>>,
    user_queries: Mutex<Vec<SocketAddr>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Connection to an in-memory node of a single-datacenter cluster. Answers system table queries
/// like a real node and every other query with a void result, unless the node is failing.
pub struct TestConnection {
    addr: SocketAddr,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

impl TestConnection {
    fn node_row(&self, addr: SocketAddr) -> Row {
        let token = self
            .shared
            .hosts
            .iter()
            .position(|host| *host == addr)
            .unwrap_or_default();

        Row::default()
            .with_column("data_center", ColumnValue::Text("dc1".into()))
            .with_column("rack", ColumnValue::Text("rack1".into()))
            .with_column("host_id", ColumnValue::Uuid(Uuid::new_v4()))
            .with_column("tokens", ColumnValue::TextSet(vec![token.to_string()]))
            .with_column("rpc_address", ColumnValue::Inet(addr.ip()))
            .with_column("native_port", ColumnValue::Int(addr.port() as i32))
    }

    fn respond(&self, request: &Request) -> Result<Response> {
        let Some(query) = request.as_query() else {
            return Ok(Response::new(ResponseBody::Ready, None, vec![]));
        };

        if query.query.contains("system.local") {
            return Ok(Response::rows(vec![self
                .node_row(self.addr)
                .with_column("cluster_name", ColumnValue::Text("test".into()))]));
        }

        if query.query.contains("system.peers") {
            return Ok(Response::rows(
                self.shared
                    .hosts
                    .iter()
                    .filter(|host| **host != self.addr)
                    .map(|host| {
                        self.node_row(*host)
                            .with_column("peer", ColumnValue::Inet(host.ip()))
                    })
                    .collect(),
            ));
        }

        if query.query.contains("system") {
            return Ok(Response::rows(vec![]));
        }

        if query.query.starts_with("USE ") {
            return Ok(Response::new(
                ResponseBody::SetKeyspace(query.query[4..].trim_matches('"').into()),
                None,
                vec![],
            ));
        }

        self.shared.user_queries.lock().unwrap().push(self.addr);

        if self.shared.failing.lock().unwrap().contains(&self.addr) {
            self.closed.store(true, Ordering::Relaxed);
            return Err(Error::Connection {
                addr: self.addr,
                message: "Connection reset by peer".into(),
            });
        }

        Ok(Response::void())
    }
}

impl Transport for TestConnection {
    fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            if self.is_broken() {
                return Err(Error::Connection {
                    addr: self.addr,
                    message: "Connection closed".into(),
                });
            }

            self.respond(request)
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.shared.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn is_broken(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn address(&self) -> SocketAddr {
        self.addr
    }
}

#[derive(Clone)]
pub struct TestConnectionFactory {
    shared: Arc<Shared>,
}

impl TestConnectionFactory {
    pub fn new(hosts: Vec<SocketAddr>) -> Self {
        TestConnectionFactory {
            shared: Arc::new(Shared {
                hosts,
                ..Default::default()
            }),
        }
    }

    /// Makes every user query sent to `addr` fail with a connection error.
    pub fn fail(&self, addr: SocketAddr) {
        self.shared.failing.lock().unwrap().insert(addr);
    }

    /// Hosts which received user queries, in order.
    pub fn user_queries(&self) -> Vec<SocketAddr> {
        self.shared.user_queries.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::Relaxed)
    }

    pub async fn connect(&self) -> Result<TestCluster> {
        self.connect_with(|builder| builder).await
    }

    pub async fn connect_with(
        &self,
        configure: impl FnOnce(ClusterConfigBuilder) -> ClusterConfigBuilder,
    ) -> Result<TestCluster> {
        let builder = self
            .shared
            .hosts
            .iter()
            .fold(ClusterConfigBuilder::new(), |builder, addr| {
                builder.with_contact_point((*addr).into())
            })
            .with_reconnection_policy(Arc::new(NeverReconnectionPolicy));
        let config = configure(builder).build().await?;

        Cluster::new(config, self.clone()).await
    }
}

impl ConnectionFactory<TestConnection> for TestConnectionFactory {
    fn open(
        &self,
        addr: SocketAddr,
        _compression: Compression,
        _event_handler: Option<Sender<ServerEvent>>,
        _error_handler: Option<Sender<Error>>,
    ) -> BoxFuture<'_, Result<TestConnection>> {
        Box::pin(async move {
            if !self.shared.hosts.contains(&addr) {
                return Err(Error::Connection {
                    addr,
                    message: "Connection refused".into(),
                });
            }

            self.shared.opened.fetch_add(1, Ordering::Relaxed);

            Ok(TestConnection {
                addr,
                closed: AtomicBool::new(false),
                shared: self.shared.clone(),
            })
        })
    }
}
