//! Failures raised while resolving and running commands.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

use crate::call::CallError;
use crate::scope::ScopeError;

/// Boxed error carried as the cause of an execution failure.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors produced by command resolution and dispatch.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No command could be produced for the requested name.
    #[error("no command found for '{name}' (resolved to '{resolved}')")]
    NotFound {
        /// Name as sent by the client.
        name: String,
        /// Fully-qualified name after alias resolution.
        resolved: String,
        /// Construction failure, when the command exists but could not be
        /// built.
        #[source]
        source: Option<BoxError>,
    },
    /// The command failed while running.
    #[error("command '{command}' failed: {source}")]
    Execution {
        /// Command type that failed.
        command: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },
    /// A legacy job returned without setting response content.
    #[error("command '{command}' finished without producing content")]
    NoContent {
        /// Command type that produced nothing.
        command: String,
    },
    /// The client went away while the command was running.
    #[error("connection lost while running a command: {source}")]
    ConnectionLost {
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The dispatch scope was misused.
    #[error(transparent)]
    Scope(#[from] ScopeError),
    /// A filter refused to let the call through.
    #[error("filter '{filter}' rejected the call: {reason}")]
    Filter {
        /// Filter that rejected the call.
        filter: String,
        /// Reason given by the filter.
        reason: String,
    },
    /// The call payload could not be decoded.
    #[error(transparent)]
    InvalidArguments(#[from] CallError),
}

impl CommandError {
    /// Wraps a command failure.
    pub fn execution(command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Execution {
            command: command.into(),
            source: source.into(),
        }
    }

    /// Builds a filter rejection.
    pub fn rejected(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Filter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` when the connection must be closed without a reply.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}
