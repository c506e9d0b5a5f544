//! Services available to commands and jobs while they run.

use std::fmt;
use std::sync::Arc;

use crate::collaborators::{ContentStore, Mailer};
use crate::registry::Registry;
use crate::session::SessionStore;

/// Handle on server-wide services, cloned into every job invocation.
#[derive(Clone)]
pub struct ServerContext {
    sessions: Arc<SessionStore>,
    registry: Registry,
    content_store: Option<Arc<dyn ContentStore>>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl ServerContext {
    /// Context with sessions and registry but no collaborator services.
    #[must_use]
    pub fn new(sessions: Arc<SessionStore>, registry: Registry) -> Self {
        Self {
            sessions,
            registry,
            content_store: None,
            mailer: None,
        }
    }

    /// Adds a content store.
    #[must_use]
    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(store);
        self
    }

    /// Adds a mail transport.
    #[must_use]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Session store of the running server.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Listener registry of the running server.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Configured content store.
    #[must_use]
    pub fn content_store(&self) -> Option<&Arc<dyn ContentStore>> {
        self.content_store.as_ref()
    }

    /// Configured mail transport.
    #[must_use]
    pub fn mailer(&self) -> Option<&Arc<dyn Mailer>> {
        self.mailer.as_ref()
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServerContext")
            .field("sessions", &self.sessions)
            .field("content_store", &self.content_store.is_some())
            .field("mailer", &self.mailer.is_some())
            .finish_non_exhaustive()
    }
}
