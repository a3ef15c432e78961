//! This module contains the declaration of the [`Transport`] trait, which should be implemented
//! by a particular connection type in order to use it with the cluster core, along with the
//! [`ConnectionFactory`] responsible for opening such connections.
//!
//! Encoding requests and decoding responses happens inside a transport - the core only deals with
//! [`Request`] and [`Response`] values.
use cassandra_protocol::compression::Compression;
use std::net::SocketAddr;
use tokio::sync::mpsc::Sender;

#[cfg(test)]
use mockall::*;

use crate::frame::{Request, Response, ServerEvent};
use crate::future::BoxFuture;
use crate::Error;
use crate::Result;

/// A single connection to a node.
pub trait Transport: Send + Sync {
    /// Sends a request and waits for its response.
    fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>>;

    /// Closes the connection. Pending and subsequent requests fail.
    fn close(&self);

    /// Checks if the connection is broken (e.g. after read or write errors)
    fn is_broken(&self) -> bool;

    /// Returns associated node address
    fn address(&self) -> SocketAddr;

    /// Checks if request tracing can be requested on this connection.
    fn supports_tracing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mock! {
    pub Transport {
    }

    impl Transport for Transport {
        fn send(&self, request: &Request) -> BoxFuture<'static, Result<Response>>;

        fn close(&self);

        fn is_broken(&self) -> bool;

        fn address(&self) -> SocketAddr;

        fn supports_tracing(&self) -> bool;
    }
}

/// Opens new, ready to use connections to nodes.
pub trait ConnectionFactory<T: Transport>: Send + Sync {
    /// Tries to establish a new connection with optional server event and error handlers. The
    /// error handler receives the error which broke the connection, once it is open.
    fn open(
        &self,
        addr: SocketAddr,
        compression: Compression,
        event_handler: Option<Sender<ServerEvent>>,
        error_handler: Option<Sender<Error>>,
    ) -> BoxFuture<'_, Result<T>>;
}
