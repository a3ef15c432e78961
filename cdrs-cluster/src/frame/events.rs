use derive_more::Display;
use std::net::SocketAddr;

/// Server event type a connection can subscribe to.
#[derive(Debug, PartialEq, Copy, Clone, Ord, PartialOrd, Eq, Hash, Display)]
pub enum EventType {
    #[display("TOPOLOGY_CHANGE")]
    TopologyChange,
    #[display("STATUS_CHANGE")]
    StatusChange,
    #[display("SCHEMA_CHANGE")]
    SchemaChange,
}

#[derive(Debug, PartialEq, Copy, Clone, Ord, PartialOrd, Eq, Hash, Display)]
pub enum TopologyChangeType {
    NewNode,
    RemovedNode,
}

#[derive(Debug, PartialEq, Copy, Clone, Ord, PartialOrd, Eq, Hash, Display)]
pub enum StatusChangeType {
    Up,
    Down,
}

#[derive(Debug, PartialEq, Copy, Clone, Ord, PartialOrd, Eq, Hash, Display)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

/// Change of a keyspace or, if `table` is present, a table.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct SchemaChange {
    pub change_type: SchemaChangeType,
    pub keyspace: String,
    pub table: Option<String>,
}

/// Event pushed by a node on a registered connection.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum ServerEvent {
    TopologyChange {
        change_type: TopologyChangeType,
        addr: SocketAddr,
    },
    StatusChange {
        change_type: StatusChangeType,
        addr: SocketAddr,
    },
    SchemaChange(SchemaChange),
}

impl ServerEvent {
    #[inline]
    pub fn event_type(&self) -> EventType {
        match self {
            ServerEvent::TopologyChange { .. } => EventType::TopologyChange,
            ServerEvent::StatusChange { .. } => EventType::StatusChange,
            ServerEvent::SchemaChange(_) => EventType::SchemaChange,
        }
    }
}
