//! Server lifecycle: assembling the bridge, serving, and shutting down.
//!
//! ```text
//! New -> Starting -> Running -> Stopping -> Terminated
//!           |                       ^
//!           +--- bind failure ------+-> Failed
//! ```

mod lifecycle;
mod signals;

use std::io;

use palava_config::SocketPreparationError;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::concurrent::PoolError;
use crate::registry::Proxy;
use crate::transport::ListenerError;

pub use self::lifecycle::{DEFAULT_SHUTDOWN_TIMEOUT, Server, ServerBuilder};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Position of a server in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    /// Built but not started.
    New,
    /// Installing the shutdown hook and binding the listener.
    Starting,
    /// Accepting connections.
    Running,
    /// Closing the listener and draining workers.
    Stopping,
    /// Stopped after a regular shutdown.
    Terminated,
    /// Stopped because startup failed.
    Failed,
}

impl ServerState {
    /// Returns `true` for states a server never leaves.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

/// Errors raised while starting a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The operation is not allowed in the current state.
    #[error("cannot {operation} a server that is {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State the server was in.
        state: ServerState,
    },
    /// The Unix socket directory could not be prepared.
    #[error("failed to prepare bridge socket: {source}")]
    Socket {
        /// Underlying filesystem error.
        #[source]
        source: SocketPreparationError,
    },
    /// Binding or starting the listener failed.
    #[error("failed to open listener: {source}")]
    Listener {
        /// Underlying listener error.
        #[from]
        source: ListenerError,
    },
    /// The worker pool settings are inconsistent.
    #[error("failed to build worker pool: {source}")]
    Pool {
        /// Underlying pool error.
        #[from]
        source: PoolError,
    },
    /// The shutdown hook could not be installed.
    #[error("failed to install shutdown hook: {source}")]
    Signals {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Observer of server lifecycle transitions.
pub trait ServerListener: Send + Sync {
    /// The server moved from `from` to `to`.
    fn state_changed(&self, _from: ServerState, _to: ServerState) {}

    /// Startup failed with `error`; the server is about to stop.
    fn server_failed(&self, _error: &ServerError) {}
}

impl ServerListener for Proxy<dyn ServerListener> {
    fn state_changed(&self, from: ServerState, to: ServerState) {
        self.fan_out(|listener| listener.state_changed(from, to));
    }

    fn server_failed(&self, error: &ServerError) {
        self.fan_out(|listener| listener.server_failed(error));
    }
}
