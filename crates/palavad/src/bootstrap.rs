//! Turning process configuration into a ready-to-start bridge.
//!
//! Bootstrap runs four steps and stops at the first failure: load the
//! layered configuration, install telemetry, make the Unix socket directory
//! ready, and assemble the [`Server`]. Every step is reported to a
//! [`HealthReporter`].

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use palava_config::{Config, SocketPreparationError};
use thiserror::Error;

use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::registry::Registry;
use crate::server::{Server, ServerBuilder, ServerError, ServerListener};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Source of the bridge configuration.
pub trait ConfigLoader: Send + Sync {
    /// Produces the configuration to run with.
    ///
    /// # Errors
    ///
    /// Returns the `ortho_config` failure when the layers do not merge into a
    /// valid configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Reads defaults, files, `PALAVA_*` variables and the process arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Hands out a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Loader returning clones of `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Step of bootstrap that failed.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The configuration layers are invalid.
    #[error("invalid configuration: {source}")]
    Configuration {
        /// `ortho_config` failure.
        #[source]
        source: Arc<OrthoError>,
    },
    /// The log subscriber could not be installed.
    #[error("cannot set up logging: {source}")]
    Telemetry {
        /// Subscriber failure.
        #[source]
        source: TelemetryError,
    },
    /// The Unix socket directory could not be created.
    #[error("cannot prepare the bridge socket: {source}")]
    Socket {
        /// Directory failure.
        #[source]
        source: SocketPreparationError,
    },
    /// The server settings are inconsistent.
    #[error("cannot assemble the server: {source}")]
    Server {
        /// Assembly failure.
        #[source]
        source: ServerError,
    },
}

/// Configured bridge, ready to [`run`](Daemon::run).
#[derive(Debug)]
pub struct Daemon {
    config: Config,
    server: Server,
    telemetry: TelemetryHandle,
}

impl Daemon {
    /// Configuration the server was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Server assembled from the configuration.
    #[must_use]
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Installed telemetry.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Serves until a shutdown signal or [`Server::stop`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the server fails to start.
    pub fn run(&self) -> Result<(), ServerError> {
        self.server.start()
    }
}

/// Bootstraps from the process configuration, logging health events through
/// `tracing`, with no extensions registered.
///
/// # Errors
///
/// See [`bootstrap_with`].
pub fn bootstrap() -> Result<Daemon, BootstrapError> {
    bootstrap_with(
        &SystemConfigLoader,
        Arc::new(StructuredHealthReporter::new()),
        Registry::new(),
    )
}

/// Bootstraps with explicit collaborators.
///
/// Filters, aliases and listeners must already be registered in `registry`;
/// `reporter` joins them as a [`ServerListener`].
///
/// # Errors
///
/// Returns the [`BootstrapError`] of the first failing step, after handing
/// it to `reporter`.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    registry: Registry,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    let outcome = load_config(loader).and_then(|config| {
        let telemetry = install_telemetry(&config)?;
        prepare_socket(&config)?;
        let server = assemble_server(&config, &reporter, registry)?;
        Ok(Daemon {
            config,
            server,
            telemetry,
        })
    });
    match &outcome {
        Ok(daemon) => reporter.bootstrap_succeeded(daemon.config()),
        Err(error) => reporter.bootstrap_failed(error),
    }
    outcome
}

fn load_config(loader: &dyn ConfigLoader) -> Result<Config, BootstrapError> {
    loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })
}

fn install_telemetry(config: &Config) -> Result<TelemetryHandle, BootstrapError> {
    telemetry::initialise(config).map_err(|source| BootstrapError::Telemetry { source })
}

fn prepare_socket(config: &Config) -> Result<(), BootstrapError> {
    config
        .socket()
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })
}

fn assemble_server(
    config: &Config,
    reporter: &Arc<dyn HealthReporter>,
    registry: Registry,
) -> Result<Server, BootstrapError> {
    registry.register_type(Arc::clone(reporter) as Arc<dyn ServerListener>);
    ServerBuilder::new(config.clone())
        .registry(registry)
        .build()
        .map_err(|source| BootstrapError::Server { source })
}
