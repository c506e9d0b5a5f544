use std::collections::BTreeMap;

use crate::logging::LogFormat;
use crate::pool::QueueDiscipline;
use crate::socket::SocketEndpoint;

/// Default TCP host the bridge listens on.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port the bridge listens on.
pub const DEFAULT_TCP_PORT: u16 = 7701;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Minimum number of connection workers kept alive.
pub const DEFAULT_POOL_MIN_SIZE: usize = 4;

/// Maximum number of concurrent connection workers.
pub const DEFAULT_POOL_MAX_SIZE: usize = 64;

/// Idle time after which workers above the minimum retire.
pub const DEFAULT_POOL_KEEP_ALIVE_MS: u64 = 60_000;

/// Queue capacity used with [`QueueDiscipline::Bounded`].
pub const DEFAULT_POOL_QUEUE_CAPACITY: usize = 256;

/// Largest payload a request header may announce (16 MiB).
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 16 * 1024 * 1024;

/// Prefix alias resolving `@palava.*` command names to the built-in namespace.
pub const DEFAULT_ALIAS: (&str, &str) = ("@palava", "palava");

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default queue discipline for the connection pool.
///
/// Connections hold their worker until the client leaves, so the pool has to
/// grow past its minimum rather than queue them.
#[must_use]
pub fn default_queue_discipline() -> QueueDiscipline {
    QueueDiscipline::Direct
}

/// Computes the default socket endpoint for the bridge.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_HOST, DEFAULT_TCP_PORT)
}

/// Alias table installed when configuration supplies none.
#[must_use]
pub fn default_aliases() -> BTreeMap<String, String> {
    let (alias, namespace) = DEFAULT_ALIAS;
    BTreeMap::from([(alias.to_owned(), namespace.to_owned())])
}
