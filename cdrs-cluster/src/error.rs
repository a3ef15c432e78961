use derive_more::Display;
use fxhash::FxHashMap;
use std::fmt::{Display as FmtDisplay, Formatter};
use std::io;
use std::net::SocketAddr;
use std::result;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors encountered per host while trying a query plan.
pub type HostErrors = FxHashMap<SocketAddr, Error>;

/// Error class reported by a coordinator in an error response.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
pub enum ServerErrorKind {
    /// Not enough replicas alive to satisfy the requested consistency.
    #[display("Unavailable {{ required: {required}, alive: {alive} }}")]
    Unavailable { required: i32, alive: i32 },
    /// The coordinator is overloaded.
    Overloaded,
    /// The coordinator is still bootstrapping.
    IsBootstrapping,
    /// Replicas did not answer a read in time.
    #[display("ReadTimeout {{ received: {received}, block_for: {block_for}, data_present: {data_present} }}")]
    ReadTimeout {
        received: i32,
        block_for: i32,
        data_present: bool,
    },
    /// Replicas did not answer a write in time.
    #[display("WriteTimeout {{ received: {received}, block_for: {block_for}, write_type: {write_type} }}")]
    WriteTimeout {
        received: i32,
        block_for: i32,
        write_type: WriteType,
    },
    /// Internal server error.
    ServerError,
    /// Malformed query.
    SyntaxError,
    /// Syntactically correct, but invalid query.
    Invalid,
    /// Insufficient permissions.
    Unauthorized,
    /// Query conflicts with server configuration.
    ConfigError,
    /// Schema object already exists.
    AlreadyExists,
    /// Any other error code.
    #[display("Other({_0})")]
    Other(i32),
}

impl ServerErrorKind {
    /// Checks if the error concerns only the coordinator which reported it, so another host
    /// might still handle the query.
    pub fn is_host_scoped(&self) -> bool {
        !matches!(
            self,
            ServerErrorKind::SyntaxError
                | ServerErrorKind::Invalid
                | ServerErrorKind::Unauthorized
                | ServerErrorKind::ConfigError
                | ServerErrorKind::AlreadyExists
        )
    }
}

/// Type of a write which timed out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    BatchLog,
    Cas,
    View,
    Cdc,
}

/// Raised when a query plan or a reconnection attempt is exhausted. Contains the error
/// encountered for every host which has been tried.
#[derive(Debug)]
pub struct NoHostAvailableError {
    message: String,
    errors: HostErrors,
}

impl NoHostAvailableError {
    pub fn new(message: impl Into<String>, errors: HostErrors) -> Self {
        NoHostAvailableError {
            message: message.into(),
            errors,
        }
    }

    /// Errors keyed by host address.
    #[inline]
    pub fn errors(&self) -> &HostErrors {
        &self.errors
    }

    #[inline]
    pub fn into_errors(self) -> HostErrors {
        self.errors
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl FmtDisplay for NoHostAvailableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (tried: {})", self.message, self.errors.len())?;

        for (addr, error) in &self.errors {
            write!(f, "; {addr}: {error}")?;
        }

        Ok(())
    }
}

impl std::error::Error for NoHostAvailableError {}

/// Driver error. Per-host failures, including host-scoped server errors, are collected into
/// [`NoHostAvailableError`] during query execution. Only server errors which no other host could
/// answer differently (see [`ServerErrorKind::is_host_scoped`]) and timeouts are returned alone.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Internal IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Transport-level failure to open or use a connection.
    #[error("Connection error ({addr}): {message}")]
    Connection { addr: SocketAddr, message: String },
    /// Timed out waiting for a connection to be established.
    #[error("Timeout: {0}")]
    Timeout(String),
    /// All connections are saturated and the pool cannot grow.
    #[error("Connection pool exhausted for: {0}")]
    PoolExhausted(SocketAddr),
    /// Borrowing from a pool which has been shut down.
    #[error("Connection pool shut down for: {0}")]
    PoolShutdown(SocketAddr),
    /// No host could successfully handle the request.
    #[error("No host available: {0}")]
    NoHostAvailable(#[from] NoHostAvailableError),
    /// Overall query deadline exceeded. Some hosts might not have been tried at all.
    #[error("Query timeout: {0}")]
    QueryTimeout(String),
    /// Error response from a coordinator.
    #[error("Server {addr} error: {kind}: {message}")]
    Server {
        addr: SocketAddr,
        kind: ServerErrorKind,
        message: String,
    },
    /// The statement cannot be sent to any host.
    #[error("Invalid statement: {0}")]
    InvalidStatement(String),
    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The cluster has been shut down.
    #[error("Cluster is shut down")]
    ClusterShutdown,
    /// The session has been shut down.
    #[error("Session is shut down")]
    SessionShutdown,
    /// Operation not supported by this driver.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// A response of an unexpected kind has been received.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    /// General error
    #[error("General error: {0}")]
    General(String),
}

impl Error {
    /// Checks if the error means the connection (or the attempt to open one) failed, as opposed to
    /// the host answering with an error.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Connection { .. } | Error::Timeout(_)
        )
    }

    /// Checks if the error was reported by a coordinator.
    #[inline]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server { .. })
    }

    /// Checks if the error was reported by a coordinator and another host might succeed.
    #[inline]
    pub fn is_host_scoped_server_error(&self) -> bool {
        matches!(self, Error::Server { kind, .. } if kind.is_host_scoped())
    }

    /// Returns per-host errors, if this is a [`Error::NoHostAvailable`].
    pub fn host_errors(&self) -> Option<&HostErrors> {
        match self {
            Error::NoHostAvailable(error) => Some(error.errors()),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Error {
        Error::General(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Error {
        Error::General(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use crate::error::{Error, HostErrors, NoHostAvailableError, ServerErrorKind};

    #[test]
    fn should_list_every_host_error() {
        let mut errors = HostErrors::default();
        errors.insert(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9042),
            Error::PoolExhausted(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9042)),
        );

        let error = Error::from(NoHostAvailableError::new("Unable to connect", errors));
        let message = error.to_string();

        assert!(message.contains("tried: 1"));
        assert!(message.contains("127.0.0.1:9042"));
        assert_eq!(error.host_errors().map(|errors| errors.len()), Some(1));
    }

    #[test]
    fn should_classify_errors() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9042);

        assert!(Error::Connection {
            addr,
            message: "reset".into()
        }
        .is_connection_error());
        assert!(Error::Timeout("connect".into()).is_connection_error());
        assert!(!Error::PoolExhausted(addr).is_connection_error());

        let server = Error::Server {
            addr,
            kind: ServerErrorKind::Overloaded,
            message: "busy".into(),
        };
        assert!(server.is_server_error());
        assert!(server.is_host_scoped_server_error());
        assert!(!server.is_connection_error());
    }

    #[test]
    fn should_scope_server_errors() {
        let host_scoped = [
            ServerErrorKind::Overloaded,
            ServerErrorKind::IsBootstrapping,
            ServerErrorKind::ServerError,
            ServerErrorKind::Unavailable {
                required: 3,
                alive: 1,
            },
            ServerErrorKind::ReadTimeout {
                received: 1,
                block_for: 2,
                data_present: false,
            },
            ServerErrorKind::Other(0x1001),
        ];
        assert!(host_scoped.iter().all(ServerErrorKind::is_host_scoped));

        let fatal = [
            ServerErrorKind::SyntaxError,
            ServerErrorKind::Invalid,
            ServerErrorKind::Unauthorized,
            ServerErrorKind::ConfigError,
            ServerErrorKind::AlreadyExists,
        ];
        assert!(!fatal.iter().any(ServerErrorKind::is_host_scoped));
    }
}
