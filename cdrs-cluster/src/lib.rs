//! **cdrs-cluster** is the cluster control plane of an async Cassandra driver: it discovers
//! nodes, keeps per-host connection pools, balances load, retries failed queries and reacts to
//! topology, status and schema events.
//!
//! The wire protocol itself is pluggable: provide a [`Transport`](crate::transport::Transport)
//! and a [`ConnectionFactory`](crate::transport::ConnectionFactory) which opens it.
//!
//! ## Getting started
//!
//! ```no_run
//! use cdrs_cluster::cluster::{Cluster, ClusterConfigBuilder};
//! use cdrs_cluster::transport::{ConnectionFactory, Transport};
//!
//! async fn run<T: Transport + 'static, CF: ConnectionFactory<T> + 'static>(
//!     connection_factory: CF,
//! ) -> cdrs_cluster::Result<()> {
//!     let config = ClusterConfigBuilder::new()
//!         .with_contact_point("127.0.0.1:9042".into())
//!         .build()
//!         .await?;
//!
//!     let cluster = Cluster::new(config, connection_factory).await?;
//!     let session = cluster.connect(Some("test_ks")).await?;
//!
//!     session.execute("SELECT * FROM users").await?;
//!
//!     cluster.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Hosts and load balancing
//!
//! The [load balancing policy](crate::load_balancing) assigns a
//! [distance](crate::cluster::HostDistance) to every host. Local hosts get more connections than
//! remote ones, and ignored hosts get none. Use
//! [`DcAwareRoundRobinPolicy`](crate::load_balancing::DcAwareRoundRobinPolicy) for
//! multi-datacenter clusters.
//!
//! ## Failures
//!
//! A query tries hosts from the query plan in order. Failures to reach a host move on to the
//! next one, while server errors are handed to the [retry policy](crate::retry). When every host
//! fails, [`Error::NoHostAvailable`](crate::error::Error::NoHostAvailable) carries the error of
//! each host tried.

pub mod cluster;
pub mod error;
pub mod frame;
pub mod future;
pub mod load_balancing;
pub mod metrics;
pub mod retry;
pub mod statement;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cassandra_protocol::compression;
pub use cassandra_protocol::consistency;

pub type Error = error::Error;
pub type Result<T> = error::Result<T>;
