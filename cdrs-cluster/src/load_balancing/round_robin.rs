use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cluster::{Host, HostDistance};
use crate::load_balancing::{rotated, LoadBalancingPolicy, QueryPlan};
use crate::statement::SimpleStatement;

/// Simple round-robin load balancing. Every host is local; each query plan starts one host
/// further than the previous one.
#[derive(Default, Debug)]
pub struct RoundRobinPolicy {
    hosts: ArcSwap<Vec<Arc<Host>>>,
    prev_idx: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Default::default()
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn populate(&self, hosts: &[Arc<Host>]) {
        for host in hosts {
            host.set_distance(HostDistance::Local);
        }

        self.hosts.store(Arc::new(hosts.to_vec()));
    }

    #[inline]
    fn distance(&self, _host: &Host) -> HostDistance {
        HostDistance::Local
    }

    fn make_query_plan(
        &self,
        _keyspace: Option<&str>,
        _statement: Option<&SimpleStatement>,
    ) -> QueryPlan {
        let hosts = self.hosts.load_full();
        if hosts.is_empty() {
            return QueryPlan::empty();
        }

        let cur_idx = self.prev_idx.fetch_add(1, Ordering::Relaxed);
        QueryPlan::new(rotated(hosts, cur_idx))
    }

    fn on_up(&self, _host: &Arc<Host>) {}

    fn on_down(&self, _host: &Arc<Host>) {}

    fn on_add(&self, host: &Arc<Host>) {
        host.set_distance(HostDistance::Local);
        self.hosts.rcu(|hosts| {
            let mut hosts = Vec::clone(hosts);
            if !hosts
                .iter()
                .any(|existing| existing.address() == host.address())
            {
                hosts.push(host.clone());
            }

            hosts
        });
    }

    fn on_remove(&self, host: &Arc<Host>) {
        self.hosts.rcu(|hosts| {
            let mut hosts = Vec::clone(hosts);
            hosts.retain(|existing| existing.address() != host.address());
            hosts
        });
    }
}
