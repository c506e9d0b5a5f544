//! Health events for operators: bootstrap progress and server transitions.

use palava_config::Config;
use tracing::{error, info};

use crate::bootstrap::BootstrapError;
use crate::server::{ServerError, ServerListener, ServerState};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Receives bootstrap milestones and, as a [`ServerListener`], every server
/// state change.
pub trait HealthReporter: ServerListener {
    /// Bootstrap is about to load configuration.
    fn bootstrap_starting(&self);

    /// A server was assembled from `config`.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Bootstrap stopped at `error`.
    fn bootstrap_failed(&self, error: &BootstrapError);
}

/// Writes each health event as a structured `tracing` record with an `event`
/// field.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Reporter writing to the installed subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ServerListener for StructuredHealthReporter {
    fn state_changed(&self, from: ServerState, to: ServerState) {
        info!(
            target: HEALTH_TARGET,
            event = "server_state",
            from = %from,
            to = %to,
            "server is {to}"
        );
    }

    fn server_failed(&self, failure: &ServerError) {
        error!(
            target: HEALTH_TARGET,
            event = "server_failed",
            error = %failure,
            "server could not start"
        );
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        info!(target: HEALTH_TARGET, event = "bootstrap_starting", "bootstrapping bridge");
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.socket(),
            pool_min_size = config.pool_min_size,
            pool_max_size = config.pool_max_size,
            aliases = config.aliases().len(),
            environment = config.environment().unwrap_or("unset"),
            "bridge ready"
        );
    }

    fn bootstrap_failed(&self, failure: &BootstrapError) {
        error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %failure,
            "bootstrap failed"
        );
    }
}
