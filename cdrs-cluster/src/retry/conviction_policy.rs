#[cfg(test)]
use mockall::automock;
use std::net::SocketAddr;

use crate::error::Error;

/// Decides when a host should be considered down, based on connection failures reported for it.
/// Each host owns a separate instance.
#[cfg_attr(test, automock)]
pub trait ConvictionPolicy: Send {
    /// Records a connection failure. Returns `true` if the host should be considered down.
    fn add_failure(&mut self, error: &Error) -> bool;

    /// Forgets recorded failures, e.g. after the host came back up.
    fn reset(&mut self);
}

/// Creates conviction policies for hosts.
pub trait ConvictionPolicyFactory: Send + Sync {
    fn new_policy(&self, addr: SocketAddr) -> Box<dyn ConvictionPolicy>;
}

/// Convicts a host on its first connection failure.
#[derive(Default, Debug, Copy, Clone)]
pub struct SimpleConvictionPolicy;

impl ConvictionPolicy for SimpleConvictionPolicy {
    #[inline]
    fn add_failure(&mut self, _error: &Error) -> bool {
        true
    }

    #[inline]
    fn reset(&mut self) {}
}

#[derive(Default, Debug, Copy, Clone)]
pub struct SimpleConvictionPolicyFactory;

impl ConvictionPolicyFactory for SimpleConvictionPolicyFactory {
    fn new_policy(&self, _addr: SocketAddr) -> Box<dyn ConvictionPolicy> {
        Box::new(SimpleConvictionPolicy)
    }
}
