use cassandra_protocol::token::Murmur3Token;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cluster::Host;

/// Map of tokens to hosts.
#[derive(Clone, Debug, Default)]
pub struct TokenMap {
    token_ring: BTreeMap<Murmur3Token, Arc<Host>>,
}

impl TokenMap {
    pub fn new(hosts: &[Arc<Host>]) -> Self {
        TokenMap {
            token_ring: hosts
                .iter()
                .flat_map(|host| {
                    host.tokens()
                        .into_iter()
                        .map(move |token| (token, host.clone()))
                })
                .collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.token_ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.token_ring.is_empty()
    }

    /// Returns distinct hosts starting at the owner of given token and going around the ring, in
    /// the direction of replicas.
    pub fn hosts_for_token(&self, token: Murmur3Token) -> impl Iterator<Item = Arc<Host>> + '_ {
        self.token_ring
            .range(token..)
            .chain(self.token_ring.iter())
            .take(self.token_ring.len())
            .map(|(_, host)| host)
            .unique_by(|host| host.address())
            .cloned()
    }

    /// Same as [`TokenMap::hosts_for_token`], but returns at most `replica_count` hosts.
    pub fn hosts_for_token_capped(
        &self,
        token: Murmur3Token,
        replica_count: usize,
    ) -> impl Iterator<Item = Arc<Host>> + '_ {
        self.hosts_for_token(token).take(replica_count)
    }
}
