//! Shutdown hook driven by process signals.

use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::info;

use super::{SERVER_TARGET, Server, ServerError};

const THREAD_NAME: &str = "palava-signals";

/// Stops `server` on the first SIGTERM, SIGINT, SIGQUIT or SIGHUP. Closing
/// the returned handle removes the hook.
pub(super) fn install(server: &Server) -> Result<Handle, ServerError> {
    let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
        .map_err(|source| ServerError::Signals { source })?;
    let handle = signals.handle();
    let server = server.clone();
    thread::Builder::new()
        .name(THREAD_NAME.to_owned())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(target: SERVER_TARGET, signal, "shutdown signal received");
                server.stop();
            }
        })
        .map_err(|source| ServerError::Signals { source })?;
    Ok(handle)
}
