use cassandra_protocol::query::utils::quote;
use derivative::Derivative;
use futures::future::join_all;
use fxhash::FxHashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::*;

use crate::cluster::cluster_handle::ClusterInner;
use crate::cluster::connection_pool::{ConnectionPool, ConnectionPoolFactory};
use crate::cluster::{Host, HostDistance, KeyspaceHolder};
use crate::error::{Error, HostErrors, NoHostAvailableError, Result};
use crate::frame::{QueryMessage, Request, Response};
use crate::future::ResponseFuture;
use crate::retry::{QueryInfo, RetryDecision, RetrySession};
use crate::statement::SimpleStatement;
use crate::transport::{ConnectionFactory, Transport};

type HostOutcome = ControlFlow<Result<Response>, Error>;

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub(crate) struct SessionInner<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> {
    #[derivative(Debug = "ignore")]
    cluster: Arc<ClusterInner<T, CF>>,
    pools: Mutex<FxHashMap<SocketAddr, Arc<ConnectionPool<T, CF>>>>,
    #[derivative(Debug = "ignore")]
    pool_factory: Arc<ConnectionPoolFactory<T, CF>>,
    keyspace_holder: Arc<KeyspaceHolder>,
    is_shutdown: AtomicBool,
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> SessionInner<T, CF> {
    pub(crate) fn pools(&self) -> Vec<Arc<ConnectionPool<T, CF>>> {
        self.pools.lock().unwrap().values().cloned().collect()
    }

    pub(crate) fn remove_pool(&self, addr: SocketAddr) {
        let pool = self.pools.lock().unwrap().remove(&addr);
        if let Some(pool) = pool {
            pool.shutdown();
        }
    }

    /// Shuts down the session and all of its pools. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        let pools = std::mem::take(&mut *self.pools.lock().unwrap());
        for pool in pools.values() {
            pool.shutdown();
        }

        self.cluster.unregister_session(self);
        debug!(pools = pools.len(), "Session shut down.");
    }

    fn check_open(&self) -> Result<()> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            Err(Error::SessionShutdown)
        } else if self.cluster.is_shutdown() {
            Err(Error::ClusterShutdown)
        } else {
            Ok(())
        }
    }

    /// Returns the pool for given host, creating it if needed. When two callers race, one pool
    /// wins and the other is shut down.
    async fn pool(&self, host: &Arc<Host>) -> Result<Arc<ConnectionPool<T, CF>>> {
        let addr = host.address();
        if host.distance() == HostDistance::Ignored {
            return Err(Error::General(format!("Host {addr} is ignored")));
        }

        if let Some(pool) = self.pools.lock().unwrap().get(&addr) {
            if !pool.is_shutdown() {
                return Ok(pool.clone());
            }
        }

        let new_pool = self.pool_factory.create(host.clone());
        let existing_pool = {
            let mut pools = self.pools.lock().unwrap();
            match pools.get(&addr) {
                Some(pool) if !pool.is_shutdown() => Some(pool.clone()),
                _ => {
                    pools.insert(addr, new_pool.clone());
                    None
                }
            }
        };

        if let Some(pool) = existing_pool {
            new_pool.shutdown();
            return Ok(pool);
        }

        if self.is_shutdown.load(Ordering::SeqCst) {
            self.remove_pool(addr);
            return Err(Error::SessionShutdown);
        }

        if let Err(error) = new_pool.ensure_core_connections().await {
            if new_pool.open_connections() == 0 {
                return Err(error);
            }

            warn!(%addr, %error, "Opened fewer core connections than configured.");
        }

        Ok(new_pool)
    }

    fn handle_connection_error(&self, host: &Arc<Host>, error: &Error) {
        if host.signal_connection_failure(error) {
            self.cluster.on_down(host);
        }
    }

    fn record_timeout(&self) -> Error {
        if let Some(metrics) = &self.cluster.metrics {
            metrics.record_query_timeout();
        }

        Error::QueryTimeout(format!(
            "Query did not complete within {:?}",
            self.cluster.query_timeout.unwrap_or_default()
        ))
    }

    /// Runs `future` to completion or until the query deadline passes.
    async fn within_deadline<F: Future>(
        &self,
        deadline: Option<Instant>,
        future: F,
    ) -> Result<F::Output> {
        match deadline {
            Some(deadline) => timeout_at(deadline, future)
                .await
                .map_err(|_| self.record_timeout()),
            None => Ok(future.await),
        }
    }

    async fn execute(&self, statement: SimpleStatement) -> Result<Response> {
        self.check_open()?;

        if statement.query().trim().is_empty() {
            return Err(Error::InvalidStatement("Query cannot be empty".into()));
        }

        let metrics = self.cluster.metrics.as_deref();
        if let Some(metrics) = metrics {
            metrics.record_request();
        }

        let deadline = self
            .cluster
            .query_timeout
            .map(|query_timeout| Instant::now() + query_timeout);

        let keyspace = statement
            .keyspace()
            .map(str::to_string)
            .or_else(|| self.keyspace_holder.current_keyspace().map(|ks| ks.to_string()));

        let query_plan = self
            .cluster
            .load_balancing_policy
            .make_query_plan(keyspace.as_deref(), Some(&statement));

        let mut retry_session = self.cluster.retry_policy.new_session();
        let mut errors = HostErrors::default();

        for host in query_plan {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(self.record_timeout());
            }

            match self
                .query_host(&host, &statement, &mut retry_session, deadline)
                .await
            {
                ControlFlow::Break(result) => {
                    if let (Some(metrics), Ok(_)) = (metrics, &result) {
                        metrics.record_success();
                    }

                    return result;
                }
                ControlFlow::Continue(error) => {
                    debug!(address = %host.address(), %error, "Host failed, trying next one.");

                    if let Some(metrics) = metrics {
                        metrics.record_host_error();
                    }

                    errors.insert(host.address(), error);
                }
            }
        }

        if let Some(metrics) = metrics {
            metrics.record_no_host_available();
        }

        Err(NoHostAvailableError::new("All hosts in the query plan failed", errors).into())
    }

    /// Sends the statement to a single host. `Break` ends query execution, `Continue` moves on to
    /// the next host with the error recorded for this one.
    async fn query_host(
        &self,
        host: &Arc<Host>,
        statement: &SimpleStatement,
        retry_session: &mut Box<dyn RetrySession + Send + Sync>,
        deadline: Option<Instant>,
    ) -> HostOutcome {
        let pool = match self.within_deadline(deadline, self.pool(host)).await {
            Ok(Ok(pool)) => pool,
            Err(error) => return ControlFlow::Break(Err(error)),
            Ok(Err(error)) => {
                if error.is_connection_error() {
                    self.handle_connection_error(host, &error);
                }

                return ControlFlow::Continue(error);
            }
        };

        loop {
            let connection = match self
                .within_deadline(deadline, pool.borrow_connection())
                .await
            {
                Ok(Ok(connection)) => connection,
                Err(error) => return ControlFlow::Break(Err(error)),
                Ok(Err(error)) => {
                    if error.is_connection_error() {
                        self.handle_connection_error(host, &error);
                    }

                    return ControlFlow::Continue(error);
                }
            };

            let request = Request::Query(
                QueryMessage::new(statement.query(), statement.consistency())
                    .with_tracing(statement.is_tracing() && connection.supports_tracing()),
            );

            let result = match deadline {
                Some(deadline) => match timeout_at(deadline, connection.send(&request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        pool.discard_connection(connection);
                        return ControlFlow::Break(Err(self.record_timeout()));
                    }
                },
                None => connection.send(&request).await,
            };

            pool.return_connection(connection);

            let error = match result {
                Ok(response) => return ControlFlow::Break(Ok(response)),
                Err(error) => error,
            };

            if !error.is_server_error() {
                if error.is_connection_error() {
                    self.handle_connection_error(host, &error);
                }

                return ControlFlow::Continue(error);
            }

            let decision = retry_session.decide(QueryInfo {
                error: &error,
                is_idempotent: statement.is_idempotent(),
            });

            debug!(address = %host.address(), %error, %decision, "Server error.");

            match decision {
                RetryDecision::Rethrow if error.is_host_scoped_server_error() => {
                    return ControlFlow::Continue(error)
                }
                RetryDecision::Rethrow => return ControlFlow::Break(Err(error)),
                RetryDecision::RetryNextHost => return ControlFlow::Continue(error),
                RetryDecision::Ignore => return ControlFlow::Break(Ok(Response::void())),
                RetryDecision::RetrySameHost => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return ControlFlow::Break(Err(self.record_timeout()));
                    }
                }
            }
        }
    }

    async fn set_keyspace(&self, keyspace: &str) -> Result<()> {
        self.execute(SimpleStatement::new(format!("USE {}", quote(keyspace))))
            .await?;

        self.keyspace_holder.update_current_keyspace(keyspace);

        let pools = self.pools();
        for result in join_all(pools.iter().map(|pool| pool.use_keyspace(keyspace))).await {
            result?;
        }

        debug!(keyspace, "Keyspace changed.");
        Ok(())
    }
}

/// Executes statements against the cluster. Each session keeps its own connection pools and
/// current keyspace. Cheap to clone; clones share pools.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""))]
pub struct Session<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> {
    inner: Arc<SessionInner<T, CF>>,
}

impl<T: Transport + 'static, CF: ConnectionFactory<T> + 'static> Session<T, CF> {
    pub(crate) fn new(cluster: Arc<ClusterInner<T, CF>>) -> Self {
        let keyspace_holder = Arc::new(KeyspaceHolder::default());
        let pool_factory = Arc::new(ConnectionPoolFactory::new(
            cluster.connection_factory.clone(),
            cluster.pooling_options.clone(),
            keyspace_holder.clone(),
            cluster.compression,
            cluster.connect_timeout,
            cluster.metrics.clone(),
        ));

        let inner = Arc::new(SessionInner {
            cluster,
            pools: Default::default(),
            pool_factory,
            keyspace_holder,
            is_shutdown: AtomicBool::new(false),
        });

        inner.cluster.register_session(&inner);

        Session { inner }
    }

    /// Starts executing a statement in the background. Hosts are tried in query plan order until
    /// one succeeds, the retry policy ends execution or the query timeout passes.
    pub fn execute_async(&self, statement: impl Into<SimpleStatement>) -> ResponseFuture {
        let inner = self.inner.clone();
        let statement = statement.into();
        ResponseFuture::new(tokio::spawn(
            async move { inner.execute(statement).await },
        ))
    }

    /// Executes a statement and waits for the result.
    pub async fn execute(&self, statement: impl Into<SimpleStatement>) -> Result<Response> {
        self.inner.execute(statement.into()).await
    }

    /// Switches the session to given keyspace. Pooled connections switch immediately, new
    /// connections switch before first use.
    pub async fn set_keyspace(&self, keyspace: &str) -> Result<()> {
        self.inner.check_open()?;
        self.inner.set_keyspace(keyspace).await
    }

    /// Current keyspace, if any has been set.
    #[inline]
    pub fn keyspace(&self) -> Option<Arc<String>> {
        self.inner.keyspace_holder.current_keyspace()
    }

    /// Prepared statements are not supported.
    pub async fn prepare(&self, query: &str) -> Result<()> {
        Err(Error::Unsupported(format!(
            "Preparing statements is not supported: {query}"
        )))
    }

    /// Returns the pool for given host, if one exists.
    pub fn pool(&self, addr: SocketAddr) -> Option<Arc<ConnectionPool<T, CF>>> {
        self.inner.pools.lock().unwrap().get(&addr).cloned()
    }

    #[inline]
    pub fn pools(&self) -> Vec<Arc<ConnectionPool<T, CF>>> {
        self.inner.pools()
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::SeqCst)
    }

    /// Closes all pools. Further queries fail with [`Error::SessionShutdown`].
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    use crate::error::{Error, ServerErrorKind};
    use crate::frame::{Response, ResponseBody};
    use crate::retry::{DefaultRetryPolicy, QueryInfo, RetryDecision, RetryPolicy, RetrySession};
    use crate::statement::SimpleStatement;
    use crate::testing::{
        addr, connect_cluster, is_system_query, responder_with, system_responder,
        FakeConnectionFactory,
    };

    fn hosts() -> Vec<std::net::SocketAddr> {
        vec![addr(1), addr(2), addr(3)]
    }

    fn user_queries(factory: &FakeConnectionFactory) -> Vec<(std::net::SocketAddr, bool)> {
        factory
            .requests()
            .into_iter()
            .filter_map(|(addr, request)| {
                request
                    .as_query()
                    .filter(|query| !is_system_query(query))
                    .map(|query| (addr, query.tracing))
            })
            .collect()
    }

    struct IgnoringRetryPolicy;

    struct IgnoringRetrySession;

    impl RetryPolicy for IgnoringRetryPolicy {
        fn new_session(&self) -> Box<dyn RetrySession + Send + Sync> {
            Box::new(IgnoringRetrySession)
        }
    }

    impl RetrySession for IgnoringRetrySession {
        fn decide(&mut self, _query_info: QueryInfo) -> RetryDecision {
            RetryDecision::Ignore
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_execute_statement() {
        let factory = FakeConnectionFactory::new(system_responder(hosts()));
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| {
            builder.with_metrics_enabled(true)
        })
        .await
        .unwrap();

        let session = cluster.connect(None).await.unwrap();
        let response = session
            .execute_async("SELECT * FROM users")
            .await
            .unwrap();

        assert_eq!(response.body, ResponseBody::Rows(vec![]));
        assert_eq!(user_queries(&factory).len(), 1);

        let metrics = cluster.metrics().unwrap();
        assert_eq!(metrics.requests(), 1);
        assert_eq!(metrics.successful_requests(), 1);
        assert_eq!(metrics.opened_connections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_failing_hosts() {
        let responder = responder_with(hosts(), |addr, query| {
            (!is_system_query(query) && addr != self::addr(3)).then(|| {
                Err(Error::Connection {
                    addr,
                    message: "Connection reset".into(),
                })
            })
        });

        let factory = FakeConnectionFactory::new(responder);
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| builder)
            .await
            .unwrap();

        let session = cluster.connect(None).await.unwrap();
        session.execute("SELECT * FROM users").await.unwrap();

        let tried: Vec<_> = user_queries(&factory)
            .into_iter()
            .map(|(addr, _)| addr)
            .collect();
        assert_eq!(tried, hosts());

        assert!(cluster.metadata().get_host(addr(1)).unwrap().is_down());
        assert!(cluster.metadata().get_host(addr(2)).unwrap().is_down());
        assert!(!cluster.metadata().get_host(addr(3)).unwrap().is_down());
    }

    #[tokio::test(start_paused = true)]
    async fn should_fail_over_on_host_scoped_server_error() {
        let responder = responder_with(hosts(), |addr, query| {
            (!is_system_query(query) && addr == self::addr(2)).then(|| {
                Err(Error::Server {
                    addr,
                    kind: ServerErrorKind::Overloaded,
                    message: "Overloaded".into(),
                })
            })
        });

        let factory = FakeConnectionFactory::new(responder);
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| builder)
            .await
            .unwrap();

        let session = cluster.connect(None).await.unwrap();
        session.execute("SELECT * FROM users").await.unwrap();
        session.execute("SELECT * FROM users").await.unwrap();

        let tried: Vec<_> = user_queries(&factory)
            .into_iter()
            .map(|(addr, _)| addr)
            .collect();
        assert_eq!(tried, vec![addr(1), addr(2), addr(3)]);
        assert!(!cluster.metadata().get_host(addr(2)).unwrap().is_down());
    }

    #[tokio::test(start_paused = true)]
    async fn should_collect_error_of_every_host() {
        let responder = responder_with(hosts(), |addr, query| {
            (!is_system_query(query)).then(|| {
                Err(Error::Connection {
                    addr,
                    message: "Connection reset".into(),
                })
            })
        });

        let cluster = connect_cluster(FakeConnectionFactory::new(responder), &[addr(1)], |b| {
            b.with_metrics_enabled(true)
        })
        .await
        .unwrap();

        let session = cluster.connect(None).await.unwrap();
        let error = session.execute("SELECT * FROM users").await.unwrap_err();

        let errors = error.host_errors().unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors.values().all(Error::is_connection_error));

        let metrics = cluster.metrics().unwrap();
        assert_eq!(metrics.host_errors(), 3);
        assert_eq!(metrics.no_host_available_errors(), 1);

        let error = session.execute("SELECT * FROM users").await.unwrap_err();
        assert!(error.host_errors().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_rethrow_server_errors_by_default() {
        let responder = responder_with(hosts(), |addr, query| {
            (!is_system_query(query)).then(|| {
                Err(Error::Server {
                    addr,
                    kind: ServerErrorKind::SyntaxError,
                    message: "line 1:0 no viable alternative".into(),
                })
            })
        });

        let factory = FakeConnectionFactory::new(responder);
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| builder)
            .await
            .unwrap();

        let session = cluster.connect(None).await.unwrap();
        let error = session.execute("SELEC * FROM users").await.unwrap_err();

        assert!(matches!(
            error,
            Error::Server {
                kind: ServerErrorKind::SyntaxError,
                ..
            }
        ));
        assert_eq!(user_queries(&factory).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_try_every_host_on_unavailable() {
        let responder = responder_with(hosts(), |addr, query| {
            (!is_system_query(query)).then(|| {
                Err(Error::Server {
                    addr,
                    kind: ServerErrorKind::Unavailable {
                        required: 3,
                        alive: 1,
                    },
                    message: "Cannot achieve consistency level".into(),
                })
            })
        });

        let factory = FakeConnectionFactory::new(responder);
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| {
            builder.with_retry_policy(Arc::new(DefaultRetryPolicy))
        })
        .await
        .unwrap();

        let session = cluster.connect(None).await.unwrap();
        let error = session.execute("SELECT * FROM users").await.unwrap_err();

        let errors = error.host_errors().unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors.values().all(Error::is_host_scoped_server_error));
        assert_eq!(user_queries(&factory).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_error_when_told_to() {
        let responder = responder_with(hosts(), |addr, query| {
            (!is_system_query(query)).then(|| {
                Err(Error::Server {
                    addr,
                    kind: ServerErrorKind::Overloaded,
                    message: "Overloaded".into(),
                })
            })
        });

        let cluster = connect_cluster(FakeConnectionFactory::new(responder), &[addr(1)], |b| {
            b.with_retry_policy(Arc::new(IgnoringRetryPolicy))
        })
        .await
        .unwrap();

        let session = cluster.connect(None).await.unwrap();
        assert_eq!(
            session.execute("SELECT * FROM users").await.unwrap(),
            Response::void()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_slow_queries() {
        let factory = FakeConnectionFactory::new(system_responder(hosts()));
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| {
            builder
                .with_query_timeout(Some(Duration::from_secs(1)))
                .with_metrics_enabled(true)
        })
        .await
        .unwrap();

        let session = cluster.connect(None).await.unwrap();
        factory.set_send_delay(Some(Duration::from_secs(5)));

        let closed = factory.closed();
        let result = session.execute("SELECT * FROM users").await;

        assert!(matches!(result, Err(Error::QueryTimeout(_))));
        assert_eq!(factory.closed(), closed + 1);
        assert_eq!(cluster.metrics().unwrap().query_timeouts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_while_creating_pool() {
        let factory = FakeConnectionFactory::new(system_responder(hosts()));
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| {
            builder
                .with_query_timeout(Some(Duration::from_secs(1)))
                .with_connect_timeout(None)
        })
        .await
        .unwrap();

        let session = cluster.connect(Some("ks")).await.unwrap();
        assert!(session.pool(addr(2)).is_none());

        factory.set_send_delay(Some(Duration::from_secs(30)));

        let start = Instant::now();
        let result = session.execute("SELECT * FROM users").await;

        assert!(matches!(result, Err(Error::QueryTimeout(_))));
        assert!(start.elapsed() <= Duration::from_secs(1));
        assert!(session
            .pool(addr(2))
            .is_some_and(|pool| pool.open_connections() == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_empty_statement() {
        let factory = FakeConnectionFactory::new(system_responder(hosts()));
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| builder)
            .await
            .unwrap();

        let session = cluster.connect(None).await.unwrap();
        assert!(matches!(
            session.execute("  ").await,
            Err(Error::InvalidStatement(_))
        ));
        assert!(matches!(
            session.prepare("SELECT * FROM users").await,
            Err(Error::Unsupported(_))
        ));
        assert!(user_queries(&factory).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_forward_tracing_only_when_supported() {
        let factory = FakeConnectionFactory::new(system_responder(hosts()));
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| builder)
            .await
            .unwrap();

        let session = cluster.connect(None).await.unwrap();
        let statement = SimpleStatement::new("SELECT * FROM users").with_tracing(true);

        session.execute(statement.clone()).await.unwrap();
        factory.set_supports_tracing(false);
        session.execute(statement).await.unwrap();

        let tracing: Vec<_> = user_queries(&factory)
            .into_iter()
            .map(|(_, tracing)| tracing)
            .collect();
        assert_eq!(tracing, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_switch_keyspace() {
        let factory = FakeConnectionFactory::new(system_responder(hosts()));
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| builder)
            .await
            .unwrap();

        let session = cluster.connect(Some("ks")).await.unwrap();
        assert_eq!(session.keyspace().as_deref().map(String::as_str), Some("ks"));

        for _ in 0..3 {
            session.execute("SELECT * FROM users").await.unwrap();
        }

        let use_count = factory
            .requests()
            .iter()
            .filter(|(_, request)| {
                request
                    .as_query()
                    .is_some_and(|query| query.query == "USE \"ks\"")
            })
            .count();

        // statement execution plus every connection of the three pools
        assert_eq!(use_count, 1 + 3 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_close_pools_on_shutdown() {
        let factory = FakeConnectionFactory::new(system_responder(hosts()));
        let cluster = connect_cluster(factory.clone(), &[addr(1)], |builder| builder)
            .await
            .unwrap();

        let session = cluster.connect(None).await.unwrap();
        session.execute("SELECT * FROM users").await.unwrap();

        let pools = session.pools();
        assert_eq!(pools.len(), 1);

        session.shutdown();
        session.shutdown();

        assert!(pools[0].is_shutdown());
        assert!(session.pools().is_empty());
        assert_eq!(factory.closed(), 2);
        assert!(matches!(
            session.execute("SELECT * FROM users").await,
            Err(Error::SessionShutdown)
        ));
        assert!(!cluster.is_shutdown());
    }
}
