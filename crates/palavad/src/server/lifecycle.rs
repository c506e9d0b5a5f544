//! Server assembly and the lifecycle state machine.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use palava_config::{Config, SocketEndpoint};
use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex};
use signal_hook::iterator::Handle as SignalHandle;
use tracing::{error, info, warn};

use super::{SERVER_TARGET, ServerError, ServerListener, ServerState, signals};
use crate::bridge::BridgeHandler;
use crate::collaborators::{ContentStore, Mailer};
use crate::command::{AliasTable, CommandCatalog, CommandManager, Dispatcher};
use crate::concurrent::{PoolBuilder, WorkerPool};
use crate::context::ServerContext;
use crate::protocol::HeaderParser;
use crate::registry::{Key, Proxy, Registry};
use crate::session::SessionStore;
use crate::transport::{ConnectionHandler, ListenerHandle, SocketListener};

/// How long [`Server::stop`] waits for in-flight connections to finish.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Assembles a [`Server`] from configuration and extensions.
///
/// Filters, aliases and lifecycle listeners are contributed through the
/// [`Registry`]; they must be registered before [`ServerBuilder::build`].
pub struct ServerBuilder {
    config: Config,
    registry: Registry,
    catalog: CommandCatalog,
    pool: PoolBuilder,
    content_store: Option<Arc<dyn ContentStore>>,
    mailer: Option<Arc<dyn Mailer>>,
    shutdown_signals: bool,
    shutdown_timeout: Duration,
}

impl ServerBuilder {
    /// Builder for `config` with the built-in commands and a pool sized from
    /// the configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            pool: PoolBuilder::from_config(&config),
            config,
            registry: Registry::new(),
            catalog: CommandCatalog::with_builtins(),
            content_store: None,
            mailer: None,
            shutdown_signals: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Registry holding filters, aliases and listeners.
    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Commands the server can resolve.
    #[must_use]
    pub fn catalog(mut self, catalog: CommandCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Worker pool settings, replacing those read from configuration.
    #[must_use]
    pub fn pool(mut self, pool: PoolBuilder) -> Self {
        self.pool = pool;
        self
    }

    /// Content store reachable by commands.
    #[must_use]
    pub fn content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(store);
        self
    }

    /// Mailer reachable by commands.
    #[must_use]
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Whether [`Server::start`] installs the SIGTERM/SIGINT/SIGQUIT/SIGHUP
    /// shutdown hook. Enabled by default.
    #[must_use]
    pub fn shutdown_signals(mut self, enabled: bool) -> Self {
        self.shutdown_signals = enabled;
        self
    }

    /// Bound on how long [`Server::stop`] waits for busy workers.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builds the server in state [`ServerState::New`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Pool`] for inconsistent pool settings.
    pub fn build(self) -> Result<Server, ServerError> {
        let pool = Arc::new(self.pool.build()?);
        let sessions = Arc::new(SessionStore::new(&self.registry));

        let mut context = ServerContext::new(Arc::clone(&sessions), self.registry.clone());
        if let Some(store) = self.content_store {
            context = context.with_content_store(store);
        }
        if let Some(mailer) = self.mailer {
            context = context.with_mailer(mailer);
        }

        let aliases = AliasTable::with_registered(self.config.aliases(), &self.registry);
        let commands = CommandManager::new(aliases, self.catalog, context);
        let dispatcher = Arc::new(Dispatcher::new(commands, &self.registry));
        let handler = Arc::new(BridgeHandler::new(
            dispatcher,
            HeaderParser::new(self.config.max_content_length),
        ));

        Ok(Server {
            inner: Arc::new(Inner {
                endpoint: self.config.socket().clone(),
                handler,
                sessions,
                pool,
                shutdown_signals: self.shutdown_signals,
                shutdown_timeout: self.shutdown_timeout,
                listeners: self.registry.proxy(&Key::of()),
                transitions: ReentrantMutex::new(()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ServerState::New,
                    listener: None,
                    local_addr: None,
                    signals: None,
                }),
                changed: Condvar::new(),
            }),
        })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("shutdown_signals", &self.shutdown_signals)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

struct Lifecycle {
    state: ServerState,
    listener: Option<ListenerHandle>,
    local_addr: Option<SocketAddr>,
    signals: Option<SignalHandle>,
}

struct Inner {
    endpoint: SocketEndpoint,
    handler: Arc<BridgeHandler>,
    sessions: Arc<SessionStore>,
    pool: Arc<WorkerPool>,
    shutdown_signals: bool,
    shutdown_timeout: Duration,
    listeners: Proxy<dyn ServerListener>,
    // Held across a state change and its notification so listeners observe
    // transitions in order. Reentrant so listeners may call back in.
    transitions: ReentrantMutex<()>,
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
}

/// Handle on a bridge server. Clones control the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Installs the shutdown hook, binds the endpoint and serves connections
    /// until [`Server::stop`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidState`] unless the server is
    /// [`ServerState::New`]. Startup failures stop the server, leave it
    /// [`ServerState::Failed`] and are returned.
    pub fn start(&self) -> Result<(), ServerError> {
        {
            let _transitions = self.inner.transitions.lock();
            let lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state != ServerState::New {
                return Err(ServerError::InvalidState {
                    operation: "start",
                    state: lifecycle.state,
                });
            }
            self.transition(lifecycle, ServerState::Starting);
        }

        if let Err(error) = self.open() {
            error!(
                target: SERVER_TARGET,
                endpoint = %self.inner.endpoint,
                error = %error,
                "server failed to start"
            );
            self.inner.listeners.server_failed(&error);
            self.shutdown(ServerState::Failed);
            return Err(error);
        }

        let mut lifecycle = self.inner.lifecycle.lock();
        while !lifecycle.state.is_final() {
            self.inner.changed.wait(&mut lifecycle);
        }
        Ok(())
    }

    /// Closes the listener and every connection it accepted, drains the
    /// worker pool and destroys every session. Returns `false` when the server was already stopping or
    /// stopped.
    pub fn stop(&self) -> bool {
        self.shutdown(ServerState::Terminated)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.inner.lifecycle.lock().state
    }

    /// Returns `true` while the server accepts connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Waits up to `timeout` for the server to reach `target`. Returns
    /// `false` on timeout, or when the server stopped without reaching it.
    pub fn wait_for_state(&self, target: ServerState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut lifecycle = self.inner.lifecycle.lock();
        loop {
            if lifecycle.state == target {
                return true;
            }
            if lifecycle.state.is_final() {
                return false;
            }
            if self
                .inner
                .changed
                .wait_until(&mut lifecycle, deadline)
                .timed_out()
            {
                return lifecycle.state == target;
            }
        }
    }

    /// Address the TCP listener is bound to while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lifecycle.lock().local_addr
    }

    /// Endpoint the server binds.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.inner.endpoint
    }

    /// Sessions owned by the server.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.inner.sessions
    }

    fn open(&self) -> Result<(), ServerError> {
        if self.inner.shutdown_signals {
            let signals = signals::install(self)?;
            self.inner.lifecycle.lock().signals = Some(signals);
        }
        self.inner
            .endpoint
            .prepare_filesystem()
            .map_err(|source| ServerError::Socket { source })?;
        let listener = SocketListener::bind(&self.inner.endpoint)?;
        let local_addr = listener.local_addr();
        let handler = Arc::clone(&self.inner.handler) as Arc<dyn ConnectionHandler>;
        let handle = listener.start(handler, Arc::clone(&self.inner.pool))?;

        let _transitions = self.inner.transitions.lock();
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state != ServerState::Starting {
            // Stopped while binding.
            drop(lifecycle);
            stop_listener(handle);
            return Ok(());
        }
        lifecycle.listener = Some(handle);
        lifecycle.local_addr = local_addr;
        info!(
            target: SERVER_TARGET,
            endpoint = %self.inner.endpoint,
            "server running"
        );
        self.transition(lifecycle, ServerState::Running);
        Ok(())
    }

    fn shutdown(&self, outcome: ServerState) -> bool {
        let (listener, signals) = {
            let _transitions = self.inner.transitions.lock();
            let mut lifecycle = self.inner.lifecycle.lock();
            if matches!(
                lifecycle.state,
                ServerState::Stopping | ServerState::Terminated | ServerState::Failed
            ) {
                return false;
            }
            let taken = (lifecycle.listener.take(), lifecycle.signals.take());
            lifecycle.local_addr = None;
            self.transition(lifecycle, ServerState::Stopping);
            taken
        };

        if let Some(signals) = signals {
            signals.close();
        }
        if let Some(listener) = listener {
            stop_listener(listener);
        }
        self.inner.pool.shutdown();
        if !self.inner.pool.await_termination(self.inner.shutdown_timeout) {
            warn!(
                target: SERVER_TARGET,
                timeout_ms = self.inner.shutdown_timeout.as_millis(),
                "workers still busy after shutdown timeout"
            );
        }
        let sessions = self.inner.sessions.destroy_all();
        info!(target: SERVER_TARGET, sessions, state = %outcome, "server stopped");

        let _transitions = self.inner.transitions.lock();
        self.transition(self.inner.lifecycle.lock(), outcome);
        true
    }

    /// Moves to `to`, wakes waiters and notifies listeners once the lifecycle
    /// lock is released. Callers hold the transition lock.
    fn transition(&self, mut lifecycle: MutexGuard<'_, Lifecycle>, to: ServerState) {
        let from = lifecycle.state;
        lifecycle.state = to;
        drop(lifecycle);
        self.inner.changed.notify_all();
        self.inner.listeners.state_changed(from, to);
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Server")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn stop_listener(listener: ListenerHandle) {
    if let Err(error) = listener.stop() {
        warn!(target: SERVER_TARGET, error = %error, "listener ended abnormally");
    }
}
