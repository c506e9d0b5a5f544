//! Failures of the bridge socket listener.

use std::io;

use thiserror::Error;

/// Errors raised while binding the bridge endpoint or running its accept
/// loop.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP host name did not resolve.
    #[error("cannot resolve bridge endpoint {endpoint}: {source}")]
    Resolve {
        /// Endpoint as configured.
        endpoint: String,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },
    /// The TCP host name resolved to nothing.
    #[error("bridge endpoint {endpoint} resolved to no address")]
    NoAddress {
        /// Endpoint as configured.
        endpoint: String,
    },
    /// The socket could not be bound.
    #[error("cannot bind bridge endpoint {endpoint}: {source}")]
    Bind {
        /// Endpoint as configured.
        endpoint: String,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// A Unix endpoint was configured on a platform without Unix sockets.
    #[error("unix socket endpoint {endpoint} is not supported on this platform")]
    Unsupported {
        /// Endpoint as configured.
        endpoint: String,
    },
    /// Another process is serving on the Unix socket path.
    #[error("unix socket {path} is served by another process")]
    SocketInUse {
        /// Socket path.
        path: String,
    },
    /// The Unix socket path is taken by something other than a socket.
    #[error("{path} exists and is not a unix socket")]
    NotASocket {
        /// Offending path.
        path: String,
    },
    /// A leftover Unix socket file could not be inspected or removed.
    #[error("cannot reclaim unix socket {path}: {source}")]
    Reclaim {
        /// Socket path.
        path: String,
        /// Filesystem or connection failure.
        #[source]
        source: io::Error,
    },
    /// The listening socket could not be switched to polling mode.
    #[error("cannot configure listening socket: {source}")]
    Configure {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be started.
    #[error("cannot start accept thread: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("accept thread panicked")]
    AcceptPanicked,
}
