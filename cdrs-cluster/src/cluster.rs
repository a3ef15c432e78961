//! Cluster state: hosts and their lifecycle, connection pools, the control connection and
//! sessions.
pub use self::cluster_handle::Cluster;
pub use self::config::{
    ClusterConfig, ClusterConfigBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT,
    DEFAULT_QUERY_TIMEOUT,
};
pub use self::connection_pool::{BorrowedConnection, ConnectionPool};
pub use self::control_connection::ControlConnectionState;
pub use self::host::{Host, HostInfo};
pub use self::host_distance::HostDistance;
pub use self::host_state::HostState;
pub use self::keyspace_holder::KeyspaceHolder;
pub use self::keyspace_metadata::{KeyspaceMetadata, ReplicationStrategy};
pub use self::metadata::{HostMap, Metadata};
pub use self::node_address::NodeAddress;
pub use self::pooling_options::PoolingOptions;
pub use self::session::Session;
pub use self::token_map::TokenMap;

mod cluster_handle;
mod config;
mod connection_pool;
mod control_connection;
mod host;
mod host_distance;
mod host_state;
mod keyspace_holder;
mod keyspace_metadata;
mod metadata;
mod node_address;
mod pooling_options;
mod session;
mod token_map;
