//! Binding the bridge endpoint and polling it for connections.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use palava_config::SocketEndpoint;
use tracing::{debug, info, warn};

use super::connections::OpenConnections;
use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};
use crate::concurrent::WorkerPool;

#[cfg(unix)]
use std::os::unix::net::UnixListener;

/// Pause between polls while no client is waiting.
const IDLE_POLL: Duration = Duration::from_millis(25);
/// Pause after a failed accept.
const FAILURE_PAUSE: Duration = Duration::from_millis(150);
const ACCEPT_THREAD: &str = "palava-accept";

enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Acceptor {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Accepted connection, or `None` when nobody is waiting.
    fn poll(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::tcp(stream))
            }),
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Bound, not yet accepting, bridge endpoint.
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    acceptor: Acceptor,
}

impl SocketListener {
    /// Binds `endpoint`. A leftover Unix socket file from a dead process is
    /// replaced; a live one is an error.
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let acceptor = match endpoint {
            SocketEndpoint::Tcp { host, port } => Acceptor::Tcp(bind_tcp(endpoint, host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                unix::reclaim(path.as_std_path())?;
                let listener = UnixListener::bind(path.as_std_path()).map_err(|source| {
                    ListenerError::Bind {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                Acceptor::Unix(listener)
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::Unsupported {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        debug!(target: LISTENER_TARGET, endpoint = %endpoint, "endpoint bound");
        Ok(Self {
            endpoint: endpoint.clone(),
            acceptor,
        })
    }

    /// Bound TCP address; `None` for Unix sockets.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Acceptor::Unix(_) => None,
        }
    }

    /// Starts accepting on a background thread. Every connection is handed
    /// to `handler` on a `pool` worker; connections the pool turns away are
    /// dropped, which closes them.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
        pool: Arc<WorkerPool>,
    ) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.acceptor.set_nonblocking() {
            self.release();
            return Err(ListenerError::Configure { source });
        }
        let stop = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(OpenConnections::default());
        let accept_loop = AcceptLoop {
            listener: self,
            stop: Arc::clone(&stop),
            connections: Arc::clone(&connections),
            handler,
            pool,
        };
        let thread = thread::Builder::new()
            .name(ACCEPT_THREAD.to_owned())
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            stop,
            connections,
            thread: Some(thread),
        })
    }

    fn release(&self) {
        #[cfg(unix)]
        if let Some(path) = self.endpoint.unix_path() {
            unix::remove(path.as_std_path());
        }
    }
}

impl std::fmt::Debug for SocketListener {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SocketListener")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

struct AcceptLoop {
    listener: SocketListener,
    stop: Arc<AtomicBool>,
    connections: Arc<OpenConnections>,
    handler: Arc<dyn ConnectionHandler>,
    pool: Arc<WorkerPool>,
}

impl AcceptLoop {
    fn run(self) {
        let endpoint = &self.listener.endpoint;
        info!(target: LISTENER_TARGET, endpoint = %endpoint, "accepting connections");
        // Repeats of the same failure are logged once.
        let mut failing = None::<io::ErrorKind>;
        while !self.stop.load(Ordering::SeqCst) {
            match self.listener.acceptor.poll() {
                Ok(Some(stream)) => {
                    failing = None;
                    self.hand_off(stream);
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    if failing != Some(error.kind()) {
                        warn!(target: LISTENER_TARGET, error = %error, "accept failed");
                    }
                    failing = Some(error.kind());
                    thread::sleep(FAILURE_PAUSE);
                }
            }
        }
        self.listener.release();
        info!(target: LISTENER_TARGET, endpoint = %endpoint, "stopped accepting");
    }

    fn hand_off(&self, stream: ConnectionStream) {
        let peer = stream.peer().to_owned();
        debug!(target: LISTENER_TARGET, peer = %peer, "connection accepted");
        let tracked = match self.connections.track(&stream) {
            Ok(tracked) => tracked,
            Err(error) => {
                warn!(
                    target: LISTENER_TARGET,
                    peer = %peer,
                    error = %error,
                    "cannot track connection, closing it"
                );
                return;
            }
        };
        let handler = Arc::clone(&self.handler);
        let served = self.pool.execute(move || {
            let _tracked = tracked;
            handler.handle(stream);
        });
        if let Err(error) = served {
            warn!(
                target: LISTENER_TARGET,
                peer = %peer,
                error = %error,
                "worker pool refused connection"
            );
        }
    }
}

/// Running accept loop. Dropping the handle stops the loop without waiting
/// and leaves served connections open.
pub(crate) struct ListenerHandle {
    stop: Arc<AtomicBool>,
    connections: Arc<OpenConnections>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Number of accepted connections not yet finished.
    #[cfg(test)]
    pub(crate) fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Stops accepting, waits for the accept thread to finish, then shuts
    /// down every connection still being served. A Unix socket file is
    /// removed before this returns.
    pub(crate) fn stop(mut self) -> Result<(), ListenerError> {
        self.stop.store(true, Ordering::SeqCst);
        let joined = self.thread.take().map(JoinHandle::join);
        self.connections.close_all();
        match joined {
            Some(Err(_)) => Err(ListenerError::AcceptPanicked),
            Some(Ok(())) | None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ListenerHandle")
            .field("open_connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn bind_tcp(endpoint: &SocketEndpoint, host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let address = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::NoAddress {
            endpoint: endpoint.to_string(),
        })?;
    TcpListener::bind(address).map_err(|source| ListenerError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[cfg(unix)]
mod unix {
    use std::fs;
    use std::io;
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::UnixStream;
    use std::path::Path;

    use tracing::warn;

    use super::{LISTENER_TARGET, ListenerError};

    /// Clears `path` for binding. Only a socket file nobody answers on is
    /// removed.
    pub(super) fn reclaim(path: &Path) -> Result<(), ListenerError> {
        let display = || path.display().to_string();
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(ListenerError::Reclaim {
                    path: display(),
                    source,
                });
            }
        };
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::NotASocket { path: display() });
        }
        match UnixStream::connect(path) {
            Ok(_) => Err(ListenerError::SocketInUse { path: display() }),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                warn!(target: LISTENER_TARGET, path = %path.display(), "removing stale socket");
                fs::remove_file(path).map_err(|source| ListenerError::Reclaim {
                    path: display(),
                    source,
                })
            }
            Err(source) => Err(ListenerError::Reclaim {
                path: display(),
                source,
            }),
        }
    }

    pub(super) fn remove(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: LISTENER_TARGET,
                path = %path.display(),
                error = %error,
                "cannot remove socket file"
            ),
        }
    }
}
