use arc_swap::{ArcSwap, ArcSwapOption};
use fxhash::FxHashMap;
use itertools::Itertools;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::*;

use crate::cluster::{Host, KeyspaceMetadata, TokenMap};
use crate::retry::ConvictionPolicyFactory;

pub type HostMap = FxHashMap<SocketAddr, Arc<Host>>;

/// Registry of known hosts and schema information. Readers work on immutable snapshots and never
/// block; mutations come from the control connection and cluster lifecycle handlers.
pub struct Metadata {
    hosts: ArcSwap<HostMap>,
    cluster_name: ArcSwapOption<String>,
    partitioner: ArcSwapOption<String>,
    token_map: ArcSwap<TokenMap>,
    keyspaces: ArcSwap<FxHashMap<String, KeyspaceMetadata>>,
    conviction_policy_factory: Arc<dyn ConvictionPolicyFactory>,
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metadata")
            .field("hosts", &self.hosts.load())
            .field("cluster_name", &self.cluster_name.load())
            .field("partitioner", &self.partitioner.load())
            .field("keyspaces", &self.keyspaces.load())
            .finish()
    }
}

impl Metadata {
    pub fn new(conviction_policy_factory: Arc<dyn ConvictionPolicyFactory>) -> Self {
        Metadata {
            hosts: Default::default(),
            cluster_name: Default::default(),
            partitioner: Default::default(),
            token_map: Default::default(),
            keyspaces: Default::default(),
            conviction_policy_factory,
        }
    }

    /// Returns all known hosts, ordered by address.
    pub fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts
            .load()
            .values()
            .sorted_unstable_by_key(|host| host.address())
            .cloned()
            .collect()
    }

    #[inline]
    pub fn get_host(&self, addr: SocketAddr) -> Option<Arc<Host>> {
        self.hosts.load().get(&addr).cloned()
    }

    #[inline]
    pub fn has_host(&self, addr: SocketAddr) -> bool {
        self.hosts.load().contains_key(&addr)
    }

    /// Adds a new host. Returns the host if it was not known before.
    pub(crate) fn add_host(&self, addr: SocketAddr) -> Option<Arc<Host>> {
        let mut added = None;
        self.hosts.rcu(|hosts| {
            if hosts.contains_key(&addr) {
                added = None;
                return hosts.clone();
            }

            let host = Arc::new(Host::new(
                addr,
                self.conviction_policy_factory.new_policy(addr),
            ));
            added = Some(host.clone());

            let mut hosts = HostMap::clone(hosts);
            hosts.insert(addr, host);
            Arc::new(hosts)
        });

        if added.is_some() {
            debug!(%addr, "Added host.");
        }

        added
    }

    /// Removes a host. Returns the host if it was known.
    pub(crate) fn remove_host(&self, addr: SocketAddr) -> Option<Arc<Host>> {
        let mut removed = None;
        self.hosts.rcu(|hosts| {
            if !hosts.contains_key(&addr) {
                removed = None;
                return hosts.clone();
            }

            let mut hosts = HostMap::clone(hosts);
            removed = hosts.remove(&addr);
            Arc::new(hosts)
        });

        if removed.is_some() {
            debug!(%addr, "Removed host.");
        }

        removed
    }

    #[inline]
    pub fn cluster_name(&self) -> Option<Arc<String>> {
        self.cluster_name.load_full()
    }

    #[inline]
    pub fn partitioner(&self) -> Option<Arc<String>> {
        self.partitioner.load_full()
    }

    pub(crate) fn set_cluster_info(
        &self,
        cluster_name: Option<String>,
        partitioner: Option<String>,
    ) {
        self.cluster_name.store(cluster_name.map(Arc::new));
        self.partitioner.store(partitioner.map(Arc::new));
    }

    #[inline]
    pub fn token_map(&self) -> Arc<TokenMap> {
        self.token_map.load_full()
    }

    /// Rebuilds the token ring from current host tokens.
    pub(crate) fn rebuild_token_map(&self) {
        self.token_map.store(Arc::new(TokenMap::new(&self.all_hosts())));
    }

    #[inline]
    pub fn keyspaces(&self) -> Arc<FxHashMap<String, KeyspaceMetadata>> {
        self.keyspaces.load_full()
    }

    #[inline]
    pub fn keyspace(&self, name: &str) -> Option<KeyspaceMetadata> {
        self.keyspaces.load().get(name).cloned()
    }

    pub(crate) fn set_keyspaces(&self, keyspaces: FxHashMap<String, KeyspaceMetadata>) {
        self.keyspaces.store(Arc::new(keyspaces));
    }

    /// Updates or, if `keyspace` is `None`, removes a single keyspace.
    pub(crate) fn update_keyspace(&self, name: &str, keyspace: Option<KeyspaceMetadata>) {
        self.keyspaces.rcu(|keyspaces| {
            let mut keyspaces = FxHashMap::clone(keyspaces);
            match &keyspace {
                Some(keyspace) => {
                    keyspaces.insert(name.to_string(), keyspace.clone());
                }
                None => {
                    keyspaces.remove(name);
                }
            }

            keyspaces
        });
    }
}

#[cfg(test)]
mod tests {
    use cassandra_protocol::token::Murmur3Token;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use crate::cluster::{HostInfo, KeyspaceMetadata, Metadata, ReplicationStrategy};
    use crate::retry::SimpleConvictionPolicyFactory;

    fn metadata() -> Metadata {
        Metadata::new(Arc::new(SimpleConvictionPolicyFactory))
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn should_keep_hosts_unique() {
        let metadata = metadata();

        assert!(metadata.add_host(addr(1)).is_some());
        assert!(metadata.add_host(addr(1)).is_none());
        assert!(metadata.add_host(addr(2)).is_some());

        let addresses: Vec<_> = metadata
            .all_hosts()
            .iter()
            .map(|host| host.address())
            .collect();
        assert_eq!(addresses, vec![addr(1), addr(2)]);
    }

    #[test]
    fn should_remove_hosts() {
        let metadata = metadata();
        metadata.add_host(addr(1));

        assert!(metadata.remove_host(addr(1)).is_some());
        assert!(metadata.remove_host(addr(1)).is_none());
        assert!(metadata.get_host(addr(1)).is_none());
    }

    #[test]
    fn should_keep_old_snapshots_intact() {
        let metadata = metadata();
        metadata.add_host(addr(1));

        let snapshot = metadata.all_hosts();
        metadata.add_host(addr(2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(metadata.all_hosts().len(), 2);
    }

    #[test]
    fn should_rebuild_token_map() {
        let metadata = metadata();
        let host = metadata.add_host(addr(1)).unwrap();
        host.set_info(HostInfo::new(None, None, None, vec![Murmur3Token::new(5)]));

        assert!(metadata.token_map().is_empty());
        metadata.rebuild_token_map();
        assert_eq!(metadata.token_map().len(), 1);
    }

    #[test]
    fn should_update_and_remove_keyspaces() {
        let metadata = metadata();
        let keyspace = KeyspaceMetadata::new(
            ReplicationStrategy::SimpleStrategy {
                replication_factor: 1,
            },
            vec!["users".into()],
        );

        metadata.update_keyspace("ks", Some(keyspace.clone()));
        assert_eq!(metadata.keyspace("ks"), Some(keyspace));

        metadata.update_keyspace("ks", None);
        assert!(metadata.keyspace("ks").is_none());
    }
}
