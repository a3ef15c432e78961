use derive_more::Display;
use std::net::{IpAddr, SocketAddr};

/// Contact point address. Either a direct socket address or a hostname, with an optional
/// `:port` suffix, which can resolve to multiple contact points.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeAddress {
    Direct(SocketAddr),
    Hostname(String),
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        NodeAddress::Direct(addr)
    }
}

impl From<String> for NodeAddress {
    fn from(value: String) -> Self {
        value
            .parse::<SocketAddr>()
            .map(NodeAddress::Direct)
            .unwrap_or(NodeAddress::Hostname(value))
    }
}

impl From<&str> for NodeAddress {
    fn from(value: &str) -> Self {
        value.to_string().into()
    }
}

impl From<(IpAddr, u16)> for NodeAddress {
    fn from(addr: (IpAddr, u16)) -> Self {
        NodeAddress::Direct(addr.into())
    }
}
