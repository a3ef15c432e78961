//! Messages exchanged with transports. Encoding and decoding is done by the transport
//! implementation; the cluster core only builds requests and inspects decoded responses.
use cassandra_protocol::consistency::Consistency;
use derive_more::Constructor;
use uuid::Uuid;

pub mod events;
mod row;

pub use self::events::{
    EventType, SchemaChange, SchemaChangeType, ServerEvent, StatusChangeType, TopologyChangeType,
};
pub use self::row::{ColumnValue, Row};

/// A QUERY message: query text with its consistency level and tracing flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessage {
    pub query: String,
    pub consistency: Consistency,
    pub tracing: bool,
}

impl QueryMessage {
    pub fn new(query: impl Into<String>, consistency: Consistency) -> Self {
        QueryMessage {
            query: query.into(),
            consistency,
            tracing: false,
        }
    }

    /// Requests server-side tracing of this query.
    #[must_use]
    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }
}

/// Request sent over a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Query(QueryMessage),
    /// Subscribes the connection to given server events.
    Register(Vec<EventType>),
}

impl Request {
    #[inline]
    pub fn query(query: impl Into<String>, consistency: Consistency) -> Self {
        Request::Query(QueryMessage::new(query, consistency))
    }

    /// Returns the query message, if this is a query.
    #[inline]
    pub fn as_query(&self) -> Option<&QueryMessage> {
        match self {
            Request::Query(query) => Some(query),
            Request::Register(_) => None,
        }
    }
}

/// Decoded body of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Void,
    Rows(Vec<Row>),
    SetKeyspace(String),
    SchemaChange(SchemaChange),
    Ready,
}

/// Successful response to a request.
#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct Response {
    pub body: ResponseBody,
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
}

impl Response {
    /// A response without any content.
    #[inline]
    pub fn void() -> Self {
        Response::new(ResponseBody::Void, None, vec![])
    }

    #[inline]
    pub fn rows(rows: Vec<Row>) -> Self {
        Response::new(ResponseBody::Rows(rows), None, vec![])
    }

    /// Returns contained rows, if any.
    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self.body {
            ResponseBody::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}
