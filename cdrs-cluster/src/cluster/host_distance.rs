use bytemuck::NoUninit;
use derive_more::Display;

/// Determines how the driver will manage connections to a host. Assigned by the
/// [`LoadBalancingPolicy`](crate::load_balancing::LoadBalancingPolicy) when hosts are populated.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Display, NoUninit, Default)]
#[repr(u8)]
pub enum HostDistance {
    /// An "active" distance that, indicates that the driver should maintain connections to the
    /// host; it also marks it as "preferred", meaning that the host may have priority for
    /// some tasks (for example, being chosen as the control connection host).
    Local,
    /// An "active" distance that, indicates that the driver should maintain connections to the
    /// host; it also marks it as "less preferred", meaning that other hosts may have a higher
    /// priority for some tasks.
    Remote,
    /// The driver never connects to the host.
    #[default]
    Ignored,
}
