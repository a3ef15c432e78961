//! Policies deciding how the driver recovers from failures: when to reconnect to a node, whether
//! to retry a failed query and when a node should be considered down.
mod conviction_policy;
mod reconnection_policy;
mod retry_policy;

pub use crate::retry::conviction_policy::{
    ConvictionPolicy, ConvictionPolicyFactory, SimpleConvictionPolicy,
    SimpleConvictionPolicyFactory,
};
pub use crate::retry::reconnection_policy::{
    ConstantReconnectionPolicy, ExponentialReconnectionPolicy, ExponentialReconnectionSchedule,
    NeverReconnectionPolicy, ReconnectionPolicy, ReconnectionSchedule,
};
pub use crate::retry::retry_policy::{
    DefaultRetryPolicy, FallthroughRetryPolicy, QueryInfo, RetryDecision, RetryPolicy,
    RetrySession,
};

#[cfg(test)]
pub use crate::retry::conviction_policy::MockConvictionPolicy;
#[cfg(test)]
pub use crate::retry::reconnection_policy::MockReconnectionPolicy;
