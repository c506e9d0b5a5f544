//! Process-wide `tracing` subscriber for the bridge.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use palava_config::{Config, LogFormat};
use thiserror::Error;
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;

static INSTALLED: OnceCell<()> = OnceCell::new();

type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Proof that the bridge subscriber is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `log_filter` is not a valid filter directive.
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// Directive as configured.
        filter: String,
        /// Parser message.
        message: String,
    },
    /// Some other subscriber already owns the process.
    #[error("another tracing subscriber is installed: {0}")]
    AlreadyInstalled(#[source] SetGlobalDefaultError),
}

/// Installs the bridge subscriber once per process. Later calls keep the
/// first subscriber and succeed.
///
/// Events go to stderr as single lines, or as flattened JSON objects when
/// `log_format` is `json`.
///
/// # Examples
///
/// ```rust
/// use palava_config::Config;
///
/// # fn main() -> Result<(), palavad::TelemetryError> {
/// let config = Config::default();
/// palavad::initialise_telemetry(&config)?;
/// palavad::initialise_telemetry(&config)?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter does not parse or a foreign
/// subscriber is already installed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED.get_or_try_init(|| {
        let subscriber = subscriber_for(config)?;
        tracing::subscriber::set_global_default(subscriber)
            .map_err(TelemetryError::AlreadyInstalled)
    })?;
    Ok(TelemetryHandle)
}

fn filter_for(config: &Config) -> Result<EnvFilter, TelemetryError> {
    let directive = config.log_filter();
    EnvFilter::try_new(directive).map_err(|error| TelemetryError::InvalidFilter {
        filter: directive.to_owned(),
        message: error.to_string(),
    })
}

fn subscriber_for(config: &Config) -> Result<BoxedSubscriber, TelemetryError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(config)?)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_timer(UtcTime::rfc_3339());
    let subscriber: BoxedSubscriber = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(
            builder
                .compact()
                .with_ansi(io::stderr().is_terminal())
                .finish(),
        ),
    };
    Ok(subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn unparsable_filters_name_the_directive() {
        let config = Config {
            log_filter: String::from("palavad=verbose"),
            ..Config::default()
        };
        let error = filter_for(&config).expect_err("filter should be rejected");
        assert!(
            matches!(&error, TelemetryError::InvalidFilter { filter, .. } if filter == "palavad=verbose"),
            "{error:?}"
        );
    }

    #[rstest]
    #[case::compact(LogFormat::Compact)]
    #[case::json(LogFormat::Json)]
    fn every_format_builds_a_subscriber(#[case] log_format: LogFormat) {
        let config = Config {
            log_format,
            ..Config::default()
        };
        assert!(subscriber_for(&config).is_ok());
    }
}
