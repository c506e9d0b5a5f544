//! Per-request state shared by the filters and command of one dispatch.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::call::Call;
use crate::session::{Attribute, HTTP_USER_AGENT, REMOTE_ADDR, Session};

/// Argument carrying the URI of the originating web request.
pub const REQUEST_URI: &str = "REQUEST_URI";

/// Server variables, scratch attributes and the session of one request.
///
/// Attributes live for the request only; destroying the request (explicitly
/// or on drop) releases any [`Attribute::Resource`] it holds, and destroys a
/// provisional session nobody adopted.
pub struct Request {
    server_variables: BTreeMap<String, String>,
    attributes: Mutex<HashMap<String, Attribute>>,
    session: Option<Arc<Session>>,
    destroyed: AtomicBool,
}

impl Request {
    /// Builds a request from explicit server variables.
    #[must_use]
    pub fn new(server_variables: BTreeMap<String, String>, session: Option<Arc<Session>>) -> Self {
        Self {
            server_variables,
            attributes: Mutex::new(HashMap::new()),
            session,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Builds a request whose server variables are the well-known arguments
    /// of `call`. Undecodable payloads yield no server variables.
    #[must_use]
    pub fn from_call(call: &Call, session: Option<Arc<Session>>) -> Self {
        let server_variables = [REQUEST_URI, REMOTE_ADDR, HTTP_USER_AGENT]
            .into_iter()
            .filter_map(|name| {
                call.string_argument(name)
                    .map(|value| (name.to_owned(), value))
            })
            .collect();
        Self::new(server_variables, session)
    }

    /// Raw server variable.
    #[must_use]
    pub fn server_variable(&self, name: &str) -> Option<&str> {
        self.server_variables.get(name).map(String::as_str)
    }

    /// URI of the originating web request.
    #[must_use]
    pub fn request_uri(&self) -> Option<&str> {
        self.server_variable(REQUEST_URI)
    }

    /// Address of the originating web client.
    #[must_use]
    pub fn remote_address(&self) -> Option<&str> {
        self.server_variable(REMOTE_ADDR)
    }

    /// User agent of the originating web client.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.server_variable(HTTP_USER_AGENT)
    }

    /// Session the request runs with, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Stores a request-scoped attribute, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Attribute>) -> Option<Attribute> {
        self.attributes.lock().insert(key.into(), value.into())
    }

    /// Request-scoped attribute stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Attribute> {
        self.attributes.lock().get(key).cloned()
    }

    /// Returns `true` when an attribute is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.attributes.lock().contains_key(key)
    }

    /// Releases request-scoped resources. Later calls do nothing.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<Attribute> = self
            .attributes
            .lock()
            .drain()
            .map(|(_, value)| value)
            .collect();
        drained.into_iter().for_each(Attribute::release);
        if let Some(session) = &self.session
            && session.is_provisional()
        {
            session.destroy();
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Request")
            .field("server_variables", &self.server_variables)
            .field("session", &self.session.as_ref().map(|session| session.id()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::protocol::{CallType, Header};
    use crate::session::Destroyable;

    struct Counter(Arc<AtomicUsize>);

    impl Destroyable for Counter {
        fn destroy(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn server_variables_come_from_call_arguments() {
        let payload = r#"{"REQUEST_URI":"/cart","REMOTE_ADDR":"10.1.1.1","HTTP_USER_AGENT":"ua","x":"y"}"#;
        let call = Call::new(
            Header::new(CallType::Json, "echo", "", payload.len()),
            payload.as_bytes().to_vec(),
        );
        let request = Request::from_call(&call, None);

        assert_eq!(request.request_uri(), Some("/cart"));
        assert_eq!(request.remote_address(), Some("10.1.1.1"));
        assert_eq!(request.user_agent(), Some("ua"));
        assert_eq!(request.server_variable("x"), None);
        assert!(request.session().is_none());
    }

    #[test]
    fn resources_are_released_once_on_destroy_and_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let request = Request::new(BTreeMap::new(), None);
        request.set("db", Attribute::Resource(Arc::new(Counter(Arc::clone(&count)))));
        request.set("name", "value");

        request.destroy();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!request.contains("name"));

        drop(request);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unadopted_provisional_sessions_end_with_the_request() {
        let provisional = Arc::new(Session::provisional(None));
        let stored = Arc::new(Session::new(None));
        drop(Request::new(BTreeMap::new(), Some(Arc::clone(&provisional))));
        drop(Request::new(BTreeMap::new(), Some(Arc::clone(&stored))));

        assert!(provisional.is_destroyed());
        assert!(!stored.is_destroyed());
    }
}
