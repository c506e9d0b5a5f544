//! Concurrent session table.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::{Fingerprint, Session, SessionError, SessionListener};
use crate::registry::{Key, Proxy, Registry};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Owns every live session, keyed by id.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    listeners: Proxy<dyn SessionListener>,
}

impl SessionStore {
    /// Creates an empty store announcing lifecycle events to the
    /// [`SessionListener`]s registered in `registry`.
    #[must_use]
    pub fn new(registry: &Registry) -> Self {
        Self {
            sessions: DashMap::new(),
            listeners: registry.proxy(&Key::of()),
        }
    }

    /// Allocates a fresh session bound to `fingerprint`.
    pub fn create(&self, fingerprint: Option<Fingerprint>) -> Arc<Session> {
        let session = Arc::new(Session::new(fingerprint));
        self.sessions
            .insert(session.id().to_owned(), Arc::clone(&session));
        debug!(
            target: SESSION_TARGET,
            session = session.id(),
            live = self.sessions.len(),
            "session created"
        );
        self.listeners.session_created(&session);
        session
    }

    /// Session registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Checks that `session` belongs to the client identified by
    /// `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingFingerprint`] when the session was never
    /// bound to a client and [`SessionError::FingerprintMismatch`] when it was
    /// bound to a different one.
    pub fn validate(&self, session: &Session, fingerprint: &Fingerprint) -> Result<(), SessionError> {
        match session.fingerprint() {
            None => Err(SessionError::MissingFingerprint {
                id: session.id().to_owned(),
            }),
            Some(stored) if &stored == fingerprint => Ok(()),
            Some(_) => Err(SessionError::FingerprintMismatch {
                id: session.id().to_owned(),
            }),
        }
    }

    /// Session a request presenting `id` from `fingerprint` should run with.
    ///
    /// No id means no session. An unknown id, or an id whose session fails
    /// [`SessionStore::validate`], yields a fresh provisional session bound to
    /// `fingerprint`; the stored session is left untouched for its rightful
    /// client. The provisional session is not stored until
    /// [`SessionStore::adopt`] is called.
    pub fn resolve(&self, id: Option<&str>, fingerprint: &Fingerprint) -> Option<Arc<Session>> {
        let id = id.filter(|id| !id.is_empty())?;
        let Some(existing) = self.get(id) else {
            debug!(target: SESSION_TARGET, session = id, "unknown session id");
            return Some(self.provisional(fingerprint));
        };
        match self.validate(&existing, fingerprint) {
            Ok(()) => Some(existing),
            Err(error) => {
                info!(
                    target: SESSION_TARGET,
                    session = id,
                    reason = %error,
                    "replacing session for a different client"
                );
                Some(self.provisional(fingerprint))
            }
        }
    }

    /// Stores a provisional session so later requests can present its id.
    /// Returns `false` when `session` is already stored or was destroyed.
    pub fn adopt(&self, session: &Arc<Session>) -> bool {
        if session.is_destroyed() || !session.settle() {
            return false;
        }
        self.sessions
            .insert(session.id().to_owned(), Arc::clone(session));
        debug!(
            target: SESSION_TARGET,
            session = session.id(),
            live = self.sessions.len(),
            "session adopted"
        );
        self.listeners.session_created(session);
        true
    }

    /// Removes and destroys the session registered under `id`. Returns
    /// `false` when no such session exists.
    pub fn destroy(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        self.finish(&session);
        true
    }

    /// Destroys every session. Returns how many were destroyed.
    pub fn destroy_all(&self) -> usize {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter(|id| self.destroy(id)).count()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` when no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn provisional(&self, fingerprint: &Fingerprint) -> Arc<Session> {
        let session = Arc::new(Session::provisional(Some(fingerprint.clone())));
        debug!(target: SESSION_TARGET, session = session.id(), "provisional session");
        session
    }

    fn finish(&self, session: &Session) {
        if session.destroy() {
            debug!(target: SESSION_TARGET, session = session.id(), "session destroyed");
            self.listeners.session_destroyed(session);
        }
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionStore")
            .field("live", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
