//! Layered configuration for the Palava bridge.
//!
//! Values are merged by `ortho_config` from, in increasing precedence: the
//! defaults in [`defaults`], a `.palava.toml` file (or the file named with
//! `--config-path`), `PALAVA_*` environment variables, and command-line flags.
//! The alias table can only be set from files or the environment.

mod defaults;
mod logging;
mod pool;
mod socket;

use std::collections::BTreeMap;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_ALIAS, DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_MAX_CONTENT_LENGTH,
    DEFAULT_POOL_KEEP_ALIVE_MS, DEFAULT_POOL_MAX_SIZE, DEFAULT_POOL_MIN_SIZE,
    DEFAULT_POOL_QUEUE_CAPACITY, DEFAULT_TCP_PORT, default_aliases, default_log_filter,
    default_log_filter_string, default_log_format, default_queue_discipline,
    default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use pool::{QueueDiscipline, QueueDisciplineParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PALAVA")]
pub struct Config {
    /// Endpoint the bridge listener binds to.
    #[ortho_config(default = default_socket_endpoint())]
    pub socket: SocketEndpoint,
    /// `tracing` filter directive applied to log output.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log records.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Workers kept alive even when idle.
    #[ortho_config(default = DEFAULT_POOL_MIN_SIZE)]
    pub pool_min_size: usize,
    /// Upper bound on concurrently running workers.
    #[ortho_config(default = DEFAULT_POOL_MAX_SIZE)]
    pub pool_max_size: usize,
    /// Idle time, in milliseconds, before workers above the minimum retire.
    #[ortho_config(default = DEFAULT_POOL_KEEP_ALIVE_MS)]
    pub pool_keep_alive_ms: u64,
    /// Queue discipline for connections waiting on a worker.
    #[ortho_config(default = default_queue_discipline())]
    pub pool_queue: QueueDiscipline,
    /// Queue length used with [`QueueDiscipline::Bounded`].
    #[ortho_config(default = DEFAULT_POOL_QUEUE_CAPACITY)]
    pub pool_queue_capacity: usize,
    /// Largest payload a request may announce in its header.
    #[ortho_config(default = DEFAULT_MAX_CONTENT_LENGTH)]
    pub max_content_length: usize,
    /// Command name aliases: exact names or `alias.` prefixes mapped to a
    /// namespace.
    #[ortho_config(skip_cli, default = default_aliases())]
    pub aliases: BTreeMap<String, String>,
    /// Free-form deployment environment label (for example `production`).
    pub environment: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            pool_min_size: DEFAULT_POOL_MIN_SIZE,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            pool_keep_alive_ms: DEFAULT_POOL_KEEP_ALIVE_MS,
            pool_queue: default_queue_discipline(),
            pool_queue_capacity: DEFAULT_POOL_QUEUE_CAPACITY,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            aliases: default_aliases(),
            environment: None,
        }
    }
}

impl Config {
    /// Endpoint the bridge listener binds to.
    #[must_use]
    pub fn socket(&self) -> &SocketEndpoint {
        &self.socket
    }

    /// Log filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Idle time before workers above the minimum retire.
    #[must_use]
    pub fn pool_keep_alive(&self) -> Duration {
        Duration::from_millis(self.pool_keep_alive_ms)
    }

    /// Configured alias table.
    #[must_use]
    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// Deployment environment label, when one was configured.
    #[must_use]
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback_tcp() {
        let config = Config::default();
        assert_eq!(
            config.socket(),
            &SocketEndpoint::tcp(DEFAULT_HOST, DEFAULT_TCP_PORT)
        );
        assert_eq!(config.pool_keep_alive(), Duration::from_secs(60));
        assert_eq!(
            config.aliases().get("@palava").map(String::as_str),
            Some("palava")
        );
        assert!(config.environment().is_none());
    }
}
