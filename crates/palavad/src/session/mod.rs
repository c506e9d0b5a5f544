//! Client sessions and the store that owns them.
//!
//! Stored sessions are created by `palava.session.initialize`. A request that
//! presents an unknown id, or an id whose stored [`Fingerprint`] does not
//! match its own, runs with a provisional session instead: it is not stored,
//! and it is destroyed with the request unless a command adopts it through
//! [`SessionStore::adopt`]. Requests hold shared handles; only the
//! [`SessionStore`] decides a stored session's lifetime.

mod fingerprint;
mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::registry::Proxy;

pub use self::fingerprint::{Fingerprint, HTTP_USER_AGENT, REMOTE_ADDR};
pub use self::store::SessionStore;

/// Values that hold resources which must be released explicitly.
pub trait Destroyable: Send + Sync {
    /// Releases held resources. Called at most once per owning container.
    fn destroy(&self);
}

/// Value stored in a session or request attribute map.
#[derive(Clone)]
pub enum Attribute {
    /// Plain text.
    Text(String),
    /// Structured value.
    Json(Value),
    /// Shared resource released when its container is destroyed.
    Resource(Arc<dyn Destroyable>),
}

impl Attribute {
    /// Text view of the attribute, when it holds text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    pub(crate) fn release(self) {
        if let Self::Resource(resource) = self {
            resource.destroy();
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => formatter.debug_tuple("Text").field(text).finish(),
            Self::Json(value) => formatter.debug_tuple("Json").field(value).finish(),
            Self::Resource(_) => formatter.write_str("Resource(..)"),
        }
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session was already destroyed.
    #[error("session {id} has been destroyed")]
    Destroyed {
        /// Identifier of the destroyed session.
        id: String,
    },
    /// The client's fingerprint differs from the one the session was created
    /// for.
    #[error("session {id} belongs to a different client")]
    FingerprintMismatch {
        /// Identifier of the session.
        id: String,
    },
    /// The session was never bound to a client fingerprint.
    #[error("session {id} has no client fingerprint")]
    MissingFingerprint {
        /// Identifier of the session.
        id: String,
    },
}

/// Observer of session creation and destruction.
pub trait SessionListener: Send + Sync {
    /// A session was created.
    fn session_created(&self, _session: &Session) {}

    /// A session was destroyed.
    fn session_destroyed(&self, _session: &Session) {}
}

impl SessionListener for Proxy<dyn SessionListener> {
    fn session_created(&self, session: &Session) {
        self.fan_out(|listener| listener.session_created(session));
    }

    fn session_destroyed(&self, session: &Session) {
        self.fan_out(|listener| listener.session_destroyed(session));
    }
}

/// Server-side state shared by the requests of one client.
pub struct Session {
    id: String,
    fingerprint: Mutex<Option<Fingerprint>>,
    attributes: Mutex<HashMap<String, Attribute>>,
    provisional: AtomicBool,
    destroyed: AtomicBool,
}

impl Session {
    pub(crate) fn new(fingerprint: Option<Fingerprint>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fingerprint: Mutex::new(fingerprint),
            attributes: Mutex::new(HashMap::new()),
            provisional: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn provisional(fingerprint: Option<Fingerprint>) -> Self {
        let session = Self::new(fingerprint);
        session.provisional.store(true, Ordering::Release);
        session
    }

    /// Returns `true` while the session lives only for the request it was
    /// made for.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.provisional.load(Ordering::Acquire)
    }

    /// Clears the provisional mark. Returns `false` when it was already
    /// clear.
    pub(crate) fn settle(&self) -> bool {
        self.provisional.swap(false, Ordering::AcqRel)
    }

    /// Session identifier sent to the client.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fingerprint the session is bound to.
    #[must_use]
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint.lock().clone()
    }

    /// Binds the session to `fingerprint`.
    pub fn set_fingerprint(&self, fingerprint: Fingerprint) {
        *self.fingerprint.lock() = Some(fingerprint);
    }

    /// Attribute stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Attribute> {
        self.attributes.lock().get(key).cloned()
    }

    /// Stores `value` under `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Destroyed`] once the session has been
    /// destroyed.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<Attribute>,
    ) -> Result<Option<Attribute>, SessionError> {
        let mut attributes = self.attributes.lock();
        if self.is_destroyed() {
            return Err(SessionError::Destroyed {
                id: self.id.clone(),
            });
        }
        Ok(attributes.insert(key.into(), value.into()))
    }

    /// Removes the attribute under `key` without releasing it.
    pub fn remove(&self, key: &str) -> Option<Attribute> {
        self.attributes.lock().remove(key)
    }

    /// Returns `true` when an attribute is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.attributes.lock().contains_key(key)
    }

    /// Keys of the stored attributes, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.attributes.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns `true` once [`Session::destroy`] has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Releases every [`Attribute::Resource`] and clears the attributes.
    /// Returns `false` when the session was already destroyed.
    pub fn destroy(&self) -> bool {
        let drained: Vec<Attribute> = {
            let mut attributes = self.attributes.lock();
            if self.destroyed.swap(true, Ordering::AcqRel) {
                return false;
            }
            attributes.drain().map(|(_, value)| value).collect()
        };
        drained.into_iter().for_each(Attribute::release);
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("id", &self.id)
            .field("fingerprint", &*self.fingerprint.lock())
            .field("provisional", &self.is_provisional())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}
