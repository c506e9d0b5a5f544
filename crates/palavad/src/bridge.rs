//! Per-connection request loop: parse, dispatch, respond.
//!
//! A connection carries any number of requests, served strictly in order.
//! Failures are isolated to the request that caused them:
//!
//! - a malformed header is answered with an error body, then the connection
//!   is closed because the stream position is unknown;
//! - a lost connection is closed without a response;
//! - command failures are answered with an error body and the connection
//!   stays open.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::call::{Call, Content};
use crate::command::Dispatcher;
use crate::protocol::{HeaderParser, ProtocolError, read_payload};
use crate::request::Request;
use crate::scope::Scope;
use crate::session::{Fingerprint, SessionStore};
use crate::transport::{ConnectionHandler, ConnectionStream};

const BRIDGE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bridge");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Serves bridge requests on accepted connections.
pub(crate) struct BridgeHandler {
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionStore>,
    parser: HeaderParser,
}

impl BridgeHandler {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, parser: HeaderParser) -> Self {
        let sessions = Arc::clone(dispatcher.commands().server().sessions());
        Self {
            dispatcher,
            sessions,
            parser,
        }
    }

    /// Serves requests from `stream` until the peer leaves or the stream
    /// can no longer be trusted.
    pub(crate) fn serve<S>(&self, stream: &mut S, peer: &str)
    where
        S: std::io::Read + Write + ?Sized,
    {
        debug!(target: BRIDGE_TARGET, peer, "connection opened");
        let mut scope = Scope::new();
        while self.serve_request(stream, peer, &mut scope) == Flow::Continue {}
        debug!(target: BRIDGE_TARGET, peer, "connection closed");
    }

    fn serve_request<S>(&self, stream: &mut S, peer: &str, scope: &mut Scope) -> Flow
    where
        S: std::io::Read + Write + ?Sized,
    {
        let header = match self.parser.parse(stream) {
            Ok(header) => header,
            Err(error) => return reject(stream, peer, &error),
        };
        let payload = match read_payload(stream, header.content_length()) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(target: BRIDGE_TARGET, peer, error = %error, "connection lost mid-request");
                return Flow::Close;
            }
        };

        let call = Call::new(header, payload).with_peer(peer);
        let fingerprint = call
            .string_arguments()
            .map(|arguments| Fingerprint::from_arguments(&arguments))
            .unwrap_or_default();
        let session = self
            .sessions
            .resolve(call.header().session_id(), &fingerprint);
        let request = Request::from_call(&call, session);
        let name = call.name().to_owned();

        match self.dispatcher.execute(scope, call, request) {
            Ok(content) => respond(stream, peer, &content),
            Err(error) if error.is_connection_lost() => {
                warn!(
                    target: BRIDGE_TARGET,
                    peer,
                    name = %name,
                    error = %error,
                    "connection lost while executing call"
                );
                Flow::Close
            }
            Err(error) => {
                warn!(
                    target: BRIDGE_TARGET,
                    peer,
                    name = %name,
                    error = %error,
                    "call failed"
                );
                respond(stream, peer, &Content::error(&error))
            }
        }
    }
}

impl ConnectionHandler for BridgeHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        let peer = stream.peer().to_owned();
        self.serve(&mut stream, &peer);
    }
}

impl fmt::Debug for BridgeHandler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BridgeHandler")
            .field("dispatcher", &self.dispatcher)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

fn reject<S>(stream: &mut S, peer: &str, error: &ProtocolError) -> Flow
where
    S: Write + ?Sized,
{
    if error.is_idle_close() {
        return Flow::Close;
    }
    if error.is_connection_lost() {
        warn!(target: BRIDGE_TARGET, peer, error = %error, "connection lost mid-request");
        return Flow::Close;
    }
    warn!(target: BRIDGE_TARGET, peer, error = %error, "malformed request");
    respond(stream, peer, &Content::error(error));
    Flow::Close
}

fn respond<W: Write + ?Sized>(stream: &mut W, peer: &str, content: &Content) -> Flow {
    match content.write_to(stream) {
        Ok(()) => Flow::Continue,
        Err(error) => {
            warn!(target: BRIDGE_TARGET, peer, error = %error, "failed to write response");
            Flow::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use rstest::rstest;

    use super::*;
    use crate::call::ERROR_MIME;
    use crate::tests::support::{Bridge, bridge, request_bytes};

    /// In-memory duplex: reads from a fixed input, records what is written.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    fn echo_round_trip_without_session(bridge: Bridge) {
        let payload = r#"{"a":"b c"}"#;
        let mut stream = Duplex::new(request_bytes("echo", "", payload));
        bridge.handler.serve(&mut stream, "test");

        assert_eq!(
            stream.output(),
            format!("application/octet-stream://(11)?{payload}")
        );
        assert!(bridge.sessions.is_empty());
    }

    #[rstest]
    fn requests_on_one_connection_are_served_in_order(bridge: Bridge) {
        let mut input = request_bytes("echo", "", r#"{"n":"1"}"#);
        input.extend(request_bytes("@palava.system.version", "", ""));
        input.extend(request_bytes("echo", "", r#"{"n":"2"}"#));
        let mut stream = Duplex::new(input);
        bridge.handler.serve(&mut stream, "test");

        let output = stream.output();
        let first = output.find(r#"{"n":"1"}"#).expect("first reply");
        let version = output
            .find(env!("CARGO_PKG_VERSION"))
            .expect("version reply");
        let second = output.find(r#"{"n":"2"}"#).expect("second reply");
        assert!(first < version && version < second, "{output}");
    }

    #[rstest]
    fn unknown_commands_answer_with_an_error_and_keep_serving(bridge: Bridge) {
        let mut input = request_bytes("no.such.command", "", "");
        input.extend(request_bytes("echo", "", "{}"));
        let mut stream = Duplex::new(input);
        bridge.handler.serve(&mut stream, "test");

        let output = stream.output();
        assert!(output.starts_with(ERROR_MIME), "{output}");
        assert!(output.ends_with("application/octet-stream://(2)?{}"), "{output}");
    }

    #[rstest]
    fn malformed_headers_are_answered_then_closed(bridge: Bridge) {
        let mut input = b"json:/echo//(2)?{}".to_vec();
        input.extend(request_bytes("echo", "", "{}"));
        let mut stream = Duplex::new(input);
        bridge.handler.serve(&mut stream, "test");

        let output = stream.output();
        assert!(output.starts_with(ERROR_MIME), "{output}");
        assert!(!output.contains("application/octet-stream"), "{output}");
    }

    #[rstest]
    fn truncated_payloads_close_without_a_response(bridge: Bridge) {
        let mut stream = Duplex::new(b"json://echo//(20)?{}".to_vec());
        bridge.handler.serve(&mut stream, "test");
        assert!(stream.output().is_empty());
    }

    #[rstest]
    fn stale_session_ids_leave_no_sessions_behind(bridge: Bridge) {
        let input: Vec<u8> = (0..50)
            .flat_map(|attempt| request_bytes("echo", &format!("stale-{attempt}"), "{}"))
            .collect();
        let mut stream = Duplex::new(input);
        bridge.handler.serve(&mut stream, "test");

        assert_eq!(stream.output().matches("application/octet-stream").count(), 50);
        assert!(bridge.sessions.is_empty());
    }

    #[rstest]
    fn presented_session_ids_are_resolved_against_the_store(bridge: Bridge) {
        let arguments = r#"{"REMOTE_ADDR":"10.0.0.1","HTTP_USER_AGENT":"agent"}"#;
        let session = bridge.sessions.create(Some(Fingerprint::new(
            Some("10.0.0.1".to_owned()),
            Some("agent".to_owned()),
        )));
        let mut stream = Duplex::new(request_bytes("echo", session.id(), arguments));
        bridge.handler.serve(&mut stream, "test");

        assert_eq!(bridge.sessions.len(), 1);
        assert!(stream.output().ends_with(arguments));
    }
}
