//! Shared fixtures for the bridge and server suites.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use palava_config::{Config, DEFAULT_MAX_CONTENT_LENGTH, SocketEndpoint};
use parking_lot::Mutex;
use rstest::fixture;

use crate::bridge::BridgeHandler;
use crate::call::{Call, Content};
use crate::command::{AliasTable, Command, CommandCatalog, CommandError, CommandManager, Dispatcher};
use crate::concurrent::PoolBuilder;
use crate::context::ServerContext;
use crate::protocol::{CallType, Header, HeaderParser};
use crate::registry::Registry;
use crate::scope::Scope;
use crate::server::{Server, ServerBuilder, ServerError, ServerListener, ServerState};
use crate::session::SessionStore;

pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Replies with the call payload.
pub(crate) struct Echo;

impl Command for Echo {
    fn execute(&self, call: &Call, _scope: &Scope) -> Result<Content, CommandError> {
        Ok(Content::raw(call.payload().to_vec()))
    }
}

/// Replies with the id of the session the call ran with.
pub(crate) struct WhoAmI;

impl Command for WhoAmI {
    fn execute(&self, _call: &Call, scope: &Scope) -> Result<Content, CommandError> {
        Ok(Content::text(scope.session()?.id()))
    }
}

pub(crate) fn aliases() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("@palava".to_owned(), "palava".to_owned()),
        ("echo".to_owned(), "test.echo".to_owned()),
        ("whoami".to_owned(), "test.whoami".to_owned()),
    ])
}

pub(crate) fn catalog() -> CommandCatalog {
    let mut catalog = CommandCatalog::with_builtins();
    catalog
        .register("test.echo", || Echo)
        .register("test.whoami", || WhoAmI);
    catalog
}

/// Bridge handler wired to a fresh registry and session store.
pub(crate) struct Bridge {
    pub(crate) handler: BridgeHandler,
    pub(crate) sessions: Arc<SessionStore>,
}

#[fixture]
pub(crate) fn bridge() -> Bridge {
    let registry = Registry::new();
    let sessions = Arc::new(SessionStore::new(&registry));
    let server = ServerContext::new(Arc::clone(&sessions), registry.clone());
    let commands = CommandManager::new(
        AliasTable::with_registered(&aliases(), &registry),
        catalog(),
        server,
    );
    let dispatcher = Arc::new(Dispatcher::new(commands, &registry));
    Bridge {
        handler: BridgeHandler::new(dispatcher, HeaderParser::new(DEFAULT_MAX_CONTENT_LENGTH)),
        sessions,
    }
}

/// Wire form of a request.
pub(crate) fn request_bytes(name: &str, session: &str, payload: &str) -> Vec<u8> {
    let header = Header::new(CallType::Json, name, session, payload.len());
    let mut bytes = header.to_string().into_bytes();
    bytes.extend_from_slice(payload.as_bytes());
    bytes
}

/// Configuration binding an ephemeral loopback port.
pub(crate) fn loopback_config() -> Config {
    Config {
        socket: SocketEndpoint::tcp("127.0.0.1", 0),
        aliases: aliases(),
        ..Config::default()
    }
}

/// Builder for a small test server without signal handling.
pub(crate) fn server_builder(config: Config, registry: Registry) -> ServerBuilder {
    ServerBuilder::new(config)
        .registry(registry)
        .catalog(catalog())
        .pool(PoolBuilder::new().min_size(1).max_size(4))
        .shutdown_signals(false)
        .shutdown_timeout(Duration::from_secs(2))
}

/// Server serving on a background thread.
pub(crate) struct RunningServer {
    pub(crate) server: Server,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl RunningServer {
    /// Starts `server` and waits until it leaves [`ServerState::Starting`].
    pub(crate) fn spawn(server: Server) -> Self {
        let runner = server.clone();
        let thread = thread::spawn(move || runner.start());
        server.wait_for_state(ServerState::Running, WAIT);
        Self {
            server,
            thread: Some(thread),
        }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.server.local_addr().expect("server should be listening")
    }

    pub(crate) fn connect(&self) -> Client {
        Client::connect(self.addr())
    }

    /// Outcome of [`Server::start`], once it has returned.
    pub(crate) fn join(&mut self) -> Option<Result<(), ServerError>> {
        self.thread
            .take()
            .map(|thread| thread.join().expect("server thread panicked"))
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.server.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Blocking bridge client.
pub(crate) struct Client {
    stream: TcpStream,
}

impl Client {
    pub(crate) fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect to bridge");
        stream
            .set_read_timeout(Some(WAIT))
            .expect("set read timeout");
        Self { stream }
    }

    pub(crate) fn send(&mut self, name: &str, session: &str, payload: &str) {
        self.send_raw(&request_bytes(name, session, payload));
    }

    pub(crate) fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write request");
    }

    /// Reads one framed response; `None` when the server closed the stream.
    pub(crate) fn receive(&mut self) -> Option<(String, Vec<u8>)> {
        read_response(&mut self.stream).expect("read response")
    }

    /// Sends a request on a connection the server may have closed. Any
    /// write or read failure counts as no reply.
    pub(crate) fn attempt(
        &mut self,
        name: &str,
        session: &str,
        payload: &str,
    ) -> Option<(String, Vec<u8>)> {
        self.stream
            .write_all(&request_bytes(name, session, payload))
            .ok()?;
        read_response(&mut self.stream).ok().flatten()
    }
}

/// Parses `<mime>://(<length>)?<body>`.
pub(crate) fn read_response<R: Read>(reader: &mut R) -> io::Result<Option<(String, Vec<u8>)>> {
    let mut prefix = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        if reader.read(&mut byte)? == 0 {
            return if prefix.is_empty() {
                Ok(None)
            } else {
                Err(io::Error::from(io::ErrorKind::UnexpectedEof))
            };
        }
        if byte[0] == b'?' {
            break;
        }
        prefix.push(byte[0]);
    }
    let prefix = String::from_utf8_lossy(&prefix).into_owned();
    let (mime, length) = prefix
        .split_once("://(")
        .and_then(|(mime, rest)| Some((mime, rest.strip_suffix(')')?)))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, prefix.clone()))?;
    let length: usize = length
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, prefix.clone()))?;
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body)?;
    Ok(Some((mime.to_owned(), body)))
}

/// Server listener recording every transition.
#[derive(Default)]
pub(crate) struct StateRecorder {
    transitions: Mutex<Vec<ServerState>>,
    failures: Mutex<Vec<String>>,
}

impl StateRecorder {
    pub(crate) fn states(&self) -> Vec<ServerState> {
        self.transitions.lock().clone()
    }

    pub(crate) fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }
}

impl ServerListener for StateRecorder {
    fn state_changed(&self, _from: ServerState, to: ServerState) {
        self.transitions.lock().push(to);
    }

    fn server_failed(&self, error: &ServerError) {
        self.failures.lock().push(error.to_string());
    }
}
