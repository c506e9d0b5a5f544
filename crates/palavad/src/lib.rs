//! The Palava bridge server.
//!
//! External processes connect over TCP or a Unix socket and send requests in
//! a small framed text protocol ([`protocol`]). Each request names a command,
//! possibly through an alias; the [`command::Dispatcher`] resolves it, wraps it
//! in the filters whose predicates match the command's type, and runs it with
//! an explicit [`scope::Scope`] exposing the current call, request and
//! session. The resulting [`call::Content`] is framed back to the client.
//!
//! Components hook into the bridge through the type-keyed [`registry`]:
//! filter definitions, alias definitions, and session, call and server
//! lifecycle listeners are all registered there before the server is built.
//!
//! Connections are served on a bounded pool of worker threads
//! ([`concurrent`]). The [`server::Server`] owns the listener, the pool and
//! the [`session::SessionStore`], and tears all three down on shutdown.
//!
//! Start-up follows [`bootstrap_with`]: load configuration through
//! `palava_config`, install structured telemetry, prepare the socket
//! filesystem and assemble the server.

pub mod call;
pub mod collaborators;
pub mod command;
pub mod concurrent;
pub mod context;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod scope;
pub mod server;
pub mod session;

mod bootstrap;
mod bridge;
mod health;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap,
    bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
