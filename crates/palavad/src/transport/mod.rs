//! Bridge endpoint listener.
//!
//! [`SocketListener`] binds a TCP or Unix endpoint and polls it from a
//! dedicated accept thread. Accepted connections become
//! [`ConnectionStream`]s served by a [`ConnectionHandler`] on the worker
//! pool. Stopping the listener also shuts down the connections it handed
//! out, so workers blocked on a quiet client return.

mod connections;
mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::{DrainingHandler, HoldingHandler, RecordingHandler};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
