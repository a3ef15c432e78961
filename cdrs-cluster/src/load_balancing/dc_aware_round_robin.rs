use arc_swap::ArcSwap;
use fxhash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::*;

use crate::cluster::{Host, HostDistance};
use crate::load_balancing::{rotated, LoadBalancingPolicy, QueryPlan};
use crate::statement::SimpleStatement;

/// Round-robin load balancing which prefers hosts in the local datacenter. Hosts with unknown
/// datacenter are treated as local. Up to `used_hosts_per_remote_dc` hosts from every remote
/// datacenter are tried after all local ones; the rest are ignored.
#[derive(Debug)]
pub struct DcAwareRoundRobinPolicy {
    local_dc: String,
    used_hosts_per_remote_dc: usize,
    local_hosts: ArcSwap<Vec<Arc<Host>>>,
    remote_hosts: ArcSwap<Vec<Arc<Host>>>,
    prev_idx: AtomicUsize,
}

impl DcAwareRoundRobinPolicy {
    pub fn new(local_dc: impl Into<String>, used_hosts_per_remote_dc: usize) -> Self {
        DcAwareRoundRobinPolicy {
            local_dc: local_dc.into(),
            used_hosts_per_remote_dc,
            local_hosts: Default::default(),
            remote_hosts: Default::default(),
            prev_idx: Default::default(),
        }
    }

    #[inline]
    pub fn local_dc(&self) -> &str {
        &self.local_dc
    }

    fn is_local(&self, host: &Host) -> bool {
        host.datacenter()
            .map(|datacenter| datacenter == self.local_dc)
            .unwrap_or(true)
    }

    fn remote_hosts_in_dc(&self, datacenter: &str) -> usize {
        self.remote_hosts
            .load()
            .iter()
            .filter(|host| host.datacenter().as_deref() == Some(datacenter))
            .count()
    }
}

impl LoadBalancingPolicy for DcAwareRoundRobinPolicy {
    fn populate(&self, hosts: &[Arc<Host>]) {
        let mut local_hosts = Vec::new();
        let mut remote_hosts = Vec::new();
        let mut used_per_dc: FxHashMap<String, usize> = FxHashMap::default();

        for host in hosts {
            if self.is_local(host) {
                host.set_distance(HostDistance::Local);
                local_hosts.push(host.clone());
                continue;
            }

            let used = used_per_dc
                .entry(host.datacenter().unwrap_or_default())
                .or_default();

            if *used < self.used_hosts_per_remote_dc {
                *used += 1;
                host.set_distance(HostDistance::Remote);
                remote_hosts.push(host.clone());
            } else {
                host.set_distance(HostDistance::Ignored);
            }
        }

        debug!(
            local = local_hosts.len(),
            remote = remote_hosts.len(),
            ignored = hosts.len() - local_hosts.len() - remote_hosts.len(),
            "Populated datacenter-aware policy."
        );

        self.local_hosts.store(Arc::new(local_hosts));
        self.remote_hosts.store(Arc::new(remote_hosts));
    }

    fn distance(&self, host: &Host) -> HostDistance {
        if self.is_local(host) {
            return HostDistance::Local;
        }

        if self
            .remote_hosts
            .load()
            .iter()
            .any(|remote| remote.address() == host.address())
        {
            HostDistance::Remote
        } else {
            HostDistance::Ignored
        }
    }

    fn make_query_plan(
        &self,
        _keyspace: Option<&str>,
        _statement: Option<&SimpleStatement>,
    ) -> QueryPlan {
        let local_hosts = self.local_hosts.load_full();
        let remote_hosts = self.remote_hosts.load_full();
        if local_hosts.is_empty() && remote_hosts.is_empty() {
            return QueryPlan::empty();
        }

        let cur_idx = self.prev_idx.fetch_add(1, Ordering::Relaxed);
        QueryPlan::new(rotated(local_hosts, cur_idx).chain(rotated(remote_hosts, cur_idx)))
    }

    fn on_up(&self, _host: &Arc<Host>) {}

    fn on_down(&self, _host: &Arc<Host>) {}

    fn on_add(&self, host: &Arc<Host>) {
        let contains = |hosts: &[Arc<Host>]| {
            hosts
                .iter()
                .any(|existing| existing.address() == host.address())
        };

        if self.is_local(host) {
            host.set_distance(HostDistance::Local);
            self.local_hosts.rcu(|hosts| {
                let mut hosts = Vec::clone(hosts);
                if !contains(&hosts[..]) {
                    hosts.push(host.clone());
                }

                hosts
            });

            return;
        }

        if contains(&self.remote_hosts.load()[..]) {
            return;
        }

        let datacenter = host.datacenter().unwrap_or_default();
        if self.remote_hosts_in_dc(&datacenter) < self.used_hosts_per_remote_dc {
            host.set_distance(HostDistance::Remote);
            self.remote_hosts.rcu(|hosts| {
                let mut hosts = Vec::clone(hosts);
                hosts.push(host.clone());
                hosts
            });
        } else {
            host.set_distance(HostDistance::Ignored);
        }
    }

    fn on_remove(&self, host: &Arc<Host>) {
        let remove = |hosts: &Arc<Vec<Arc<Host>>>| {
            let mut hosts = Vec::clone(hosts);
            hosts.retain(|existing| existing.address() != host.address());
            hosts
        };

        self.local_hosts.rcu(remove);
        self.remote_hosts.rcu(remove);
    }
}
