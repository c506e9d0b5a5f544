//! Adapter running one-shot legacy jobs as commands.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use super::{BoxError, Command, CommandError, CommandType};
use crate::call::{Call, Content};
use crate::context::ServerContext;
use crate::scope::Scope;
use crate::session::Session;

/// Carrier the job writes its content into.
#[derive(Debug, Default)]
pub struct Response {
    content: Option<Content>,
}

impl Response {
    /// Sets the content sent back to the client, replacing earlier content.
    pub fn set_content(&mut self, content: Content) {
        self.content = Some(content);
    }

    /// Content set so far.
    #[must_use]
    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    /// Returns `true` once content has been set.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    fn into_content(self) -> Option<Content> {
        self.content
    }
}

/// Failures a job can report.
#[derive(Debug, Error)]
pub enum JobError {
    /// The client went away; the connection must be closed without a reply.
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] io::Error),
    /// An argument is missing or malformed.
    #[error("invalid argument '{name}': {message}")]
    InvalidArgument {
        /// Argument name.
        name: String,
        /// What is wrong with it.
        message: String,
    },
    /// The job needs a session but the request has none.
    #[error("this job requires a session")]
    MissingSession,
    /// Any other failure.
    #[error(transparent)]
    Failed(BoxError),
}

impl JobError {
    /// Wraps an arbitrary failure.
    pub fn failed(source: impl Into<BoxError>) -> Self {
        Self::Failed(source.into())
    }

    /// Builds an argument failure.
    pub fn invalid_argument(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// Legacy unit of work with a single processing entry point.
pub trait Job: Send + Sync + 'static {
    /// Handles `call`, writing the reply into `response`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError`] when the job cannot complete.
    fn process(
        &self,
        call: &Call,
        response: &mut Response,
        session: Option<&Arc<Session>>,
        server: &ServerContext,
    ) -> Result<(), JobError>;
}

/// Runs a [`Job`] under the [`Command`] contract.
///
/// The job must set content before returning successfully. Content set by a
/// job that then fails is discarded. The adapter reports the job's own type
/// for filter matching.
pub struct JobCommand<J> {
    job: J,
    server: ServerContext,
}

impl<J: Job> JobCommand<J> {
    /// Wraps `job`, handing it `server` on every call.
    #[must_use]
    pub fn new(job: J, server: ServerContext) -> Self {
        Self { job, server }
    }

    /// Wrapped job.
    #[must_use]
    pub fn job(&self) -> &J {
        &self.job
    }
}

impl<J: Job> Command for JobCommand<J> {
    fn execute(&self, call: &Call, scope: &Scope) -> Result<Content, CommandError> {
        let session = scope.request()?.session();
        let mut response = Response::default();
        match self.job.process(call, &mut response, session, &self.server) {
            Ok(()) => response.into_content().ok_or_else(|| CommandError::NoContent {
                command: self.command_type().name().to_owned(),
            }),
            Err(JobError::ConnectionLost(source)) => Err(CommandError::ConnectionLost { source }),
            Err(error) => Err(CommandError::execution(self.command_type().name(), error)),
        }
    }

    fn command_type(&self) -> CommandType {
        CommandType::of::<J>()
    }
}

impl<J> fmt::Debug for JobCommand<J> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("JobCommand")
            .field("job", &std::any::type_name::<J>())
            .finish_non_exhaustive()
    }
}
