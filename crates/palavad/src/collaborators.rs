//! Optional services jobs can reach through the [`ServerContext`].
//!
//! The bridge only defines the capabilities; deployments plug in concrete
//! stores and mail transports when assembling the server.
//!
//! [`ServerContext`]: crate::context::ServerContext

use thiserror::Error;

use crate::call::Content;

/// Failure reported by a collaborator service.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The service could not be reached.
    #[error("{service} is unavailable: {message}")]
    Unavailable {
        /// Service name.
        service: &'static str,
        /// Description of the outage.
        message: String,
    },
    /// The service rejected or failed the operation.
    #[error("{service} failed: {message}")]
    Failed {
        /// Service name.
        service: &'static str,
        /// Description of the failure.
        message: String,
    },
}

/// Persistent store for content bodies, addressed by generated identifiers.
pub trait ContentStore: Send + Sync {
    /// Stores `content` and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] when the content cannot be stored.
    fn store(&self, content: &Content) -> Result<String, CollaboratorError>;

    /// Loads the content stored under `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] when the store cannot be read.
    fn load(&self, identifier: &str) -> Result<Option<Content>, CollaboratorError>;

    /// Removes the content stored under `identifier`. Returns `false` when
    /// nothing was stored there.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] when the store cannot be updated.
    fn remove(&self, identifier: &str) -> Result<bool, CollaboratorError>;
}

/// Outgoing e-mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Mail transport.
pub trait Mailer: Send + Sync {
    /// Sends `message`.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] when the message cannot be delivered.
    fn send(&self, message: &MailMessage) -> Result<(), CollaboratorError>;
}
