use cassandra_protocol::consistency::Consistency;

/// A query executed by a [`Session`](crate::cluster::session::Session). Raw query text can be
/// used anywhere a statement is expected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleStatement {
    query: String,
    consistency: Consistency,
    tracing: bool,
    keyspace: Option<String>,
    is_idempotent: bool,
}

impl SimpleStatement {
    pub fn new(query: impl Into<String>) -> Self {
        SimpleStatement {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Sets new statement consistency.
    #[must_use]
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Enables server-side tracing, if supported by the transport.
    #[must_use]
    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    /// Sets the keyspace this statement targets. Used by load balancing only; the query itself is
    /// not altered.
    #[must_use]
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Marks the statement as safe to apply more than once.
    #[must_use]
    pub fn with_idempotent(mut self, is_idempotent: bool) -> Self {
        self.is_idempotent = is_idempotent;
        self
    }

    #[inline]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[inline]
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    #[inline]
    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    #[inline]
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    #[inline]
    pub fn is_idempotent(&self) -> bool {
        self.is_idempotent
    }
}

impl From<&str> for SimpleStatement {
    fn from(query: &str) -> Self {
        SimpleStatement::new(query)
    }
}

impl From<String> for SimpleStatement {
    fn from(query: String) -> Self {
        SimpleStatement::new(query)
    }
}
