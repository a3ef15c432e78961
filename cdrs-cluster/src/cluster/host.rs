use arc_swap::ArcSwap;
use atomic::Atomic;
use cassandra_protocol::token::Murmur3Token;
use derive_more::Constructor;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::*;
use uuid::Uuid;

use crate::cluster::{HostDistance, HostState};
use crate::error::Error;
use crate::retry::ConvictionPolicy;

/// Host information read from system tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Constructor)]
pub struct HostInfo {
    pub host_id: Option<Uuid>,
    pub datacenter: Option<String>,
    pub rack: Option<String>,
    pub tokens: Vec<Murmur3Token>,
}

/// A single node of the cluster. Identified by its address, which never changes; everything else
/// can be updated concurrently with readers.
pub struct Host {
    address: SocketAddr,
    distance: Atomic<HostDistance>,
    state: Atomic<HostState>,
    info: ArcSwap<HostInfo>,
    conviction_policy: Mutex<Box<dyn ConvictionPolicy>>,
    reconnection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for Host {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("distance", &self.distance())
            .field("state", &self.state())
            .field("info", &self.info.load())
            .finish()
    }
}

impl Host {
    pub fn new(address: SocketAddr, conviction_policy: Box<dyn ConvictionPolicy>) -> Self {
        Host {
            address,
            distance: Atomic::new(HostDistance::Ignored),
            state: Atomic::new(HostState::Unknown),
            info: Default::default(),
            conviction_policy: Mutex::new(conviction_policy),
            reconnection_handle: Mutex::new(None),
        }
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Distance assigned by the last population pass of the load balancing policy.
    #[inline]
    pub fn distance(&self) -> HostDistance {
        self.distance.load(Ordering::Relaxed)
    }

    /// Assigns the distance. Meant for load balancing policies.
    #[inline]
    pub fn set_distance(&self, distance: HostDistance) {
        self.distance.store(distance, Ordering::Relaxed);
    }

    #[inline]
    pub fn state(&self) -> HostState {
        self.state.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.state() == HostState::Up
    }

    #[inline]
    pub fn is_down(&self) -> bool {
        self.state() == HostState::Down
    }

    /// Checks if queries can be sent to this host.
    #[inline]
    pub fn is_usable(&self) -> bool {
        !self.is_down() && self.distance() != HostDistance::Ignored
    }

    #[inline]
    pub fn info(&self) -> Arc<HostInfo> {
        self.info.load_full()
    }

    #[inline]
    pub fn datacenter(&self) -> Option<String> {
        self.info.load().datacenter.clone()
    }

    #[inline]
    pub fn rack(&self) -> Option<String> {
        self.info.load().rack.clone()
    }

    #[inline]
    pub fn tokens(&self) -> Vec<Murmur3Token> {
        self.info.load().tokens.clone()
    }

    #[inline]
    pub(crate) fn set_info(&self, info: HostInfo) {
        self.info.store(Arc::new(info));
    }

    /// Reports a connection failure to the conviction policy. Returns `true` only if the host
    /// transitioned to down as a result, so teardown happens once.
    pub(crate) fn signal_connection_failure(&self, error: &Error) -> bool {
        let convicted = self.conviction_policy.lock().unwrap().add_failure(error);
        if !convicted {
            return false;
        }

        debug!(address = %self.address, %error, "Host convicted.");
        self.mark_down()
    }

    /// Marks the host down. Returns `true` if the state changed.
    pub(crate) fn mark_down(&self) -> bool {
        self.state.swap(HostState::Down, Ordering::AcqRel) != HostState::Down
    }

    /// Marks the host up and forgets previous failures. Returns `true` if the state changed.
    pub(crate) fn mark_up(&self) -> bool {
        self.conviction_policy.lock().unwrap().reset();
        self.state.swap(HostState::Up, Ordering::AcqRel) != HostState::Up
    }

    /// Checks if there's a background task trying to reconnect to this host.
    pub fn is_reconnecting(&self) -> bool {
        self.reconnection_handle
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stores the handle of a newly started reconnection task. A task already running is
    /// replaced and aborted.
    pub(crate) fn set_reconnection_handle(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.reconnection_handle.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn cancel_reconnection(&self) {
        if let Some(handle) = self.reconnection_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
