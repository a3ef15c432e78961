//! Load balancing policies decide which hosts the driver connects to, how many connections it
//! keeps (through the assigned [`HostDistance`]) and in which order hosts are tried for a query.
mod dc_aware_round_robin;
mod round_robin;

pub use self::dc_aware_round_robin::DcAwareRoundRobinPolicy;
pub use self::round_robin::RoundRobinPolicy;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::cluster::{Host, HostDistance};
use crate::statement::SimpleStatement;

/// Hosts to try for a single query, in order. Plans are evaluated lazily: hosts which became
/// ignored or down after the plan had been created are skipped. A plan can only be iterated once.
pub struct QueryPlan {
    hosts: Box<dyn Iterator<Item = Arc<Host>> + Send>,
}

impl Debug for QueryPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlan").finish_non_exhaustive()
    }
}

impl QueryPlan {
    pub fn new(hosts: impl Iterator<Item = Arc<Host>> + Send + 'static) -> Self {
        QueryPlan {
            hosts: Box::new(hosts),
        }
    }

    /// A plan without any hosts.
    pub fn empty() -> Self {
        QueryPlan::new(std::iter::empty())
    }
}

impl Iterator for QueryPlan {
    type Item = Arc<Host>;

    fn next(&mut self) -> Option<Self::Item> {
        self.hosts.by_ref().find(|host| host.is_usable())
    }
}

/// Iterates all `hosts` once, starting at `start` (modulo length) and wrapping around.
pub(crate) fn rotated(
    hosts: Arc<Vec<Arc<Host>>>,
    start: usize,
) -> impl Iterator<Item = Arc<Host>> + Send + 'static {
    let len = hosts.len();
    let start = if len == 0 { 0 } else { start % len };
    (0..len).map(move |index| hosts[(start + index) % len].clone())
}

/// Load balancing policy. A single instance is shared by the whole cluster, so it must be safe to
/// use concurrently.
pub trait LoadBalancingPolicy: Send + Sync {
    /// Replaces known hosts and assigns a distance to every one of them.
    fn populate(&self, hosts: &[Arc<Host>]);

    /// Computes the distance of given host. Does not change the distance stored in the host.
    fn distance(&self, host: &Host) -> HostDistance;

    /// Returns hosts to try for a query, in order. Called with no statement when a plan is needed
    /// for internal purposes, e.g. choosing the control connection host.
    fn make_query_plan(
        &self,
        keyspace: Option<&str>,
        statement: Option<&SimpleStatement>,
    ) -> QueryPlan;

    fn on_up(&self, host: &Arc<Host>);

    fn on_down(&self, host: &Arc<Host>);

    /// Called for a host discovered after population. Should assign its distance.
    fn on_add(&self, host: &Arc<Host>);

    fn on_remove(&self, host: &Arc<Host>);
}
