//! `palava.session.*`

use std::sync::Arc;

use tracing::info;

use crate::call::{Call, Content};
use crate::command::{Job, JobError, Response};
use crate::context::ServerContext;
use crate::session::{Fingerprint, Session};

const SESSION_JOB_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Establishes the client's session and replies with its id.
///
/// The current session is kept, and adopted into the store when it is
/// provisional, if it belongs to the calling client. Otherwise a new session
/// bound to the caller's fingerprint is created.
#[derive(Debug, Clone, Copy, Default)]
pub struct Initialize;

impl Job for Initialize {
    fn process(
        &self,
        call: &Call,
        response: &mut Response,
        session: Option<&Arc<Session>>,
        server: &ServerContext,
    ) -> Result<(), JobError> {
        let arguments = call
            .string_arguments()
            .map_err(|error| JobError::invalid_argument("payload", error))?;
        let fingerprint = Fingerprint::from_arguments(&arguments);
        let sessions = server.sessions();

        let current = session.filter(|session| match sessions.validate(session, &fingerprint) {
            Ok(()) => true,
            Err(error) => {
                info!(target: SESSION_JOB_TARGET, reason = %error, "discarding session");
                false
            }
        });
        let session = match current {
            Some(session) => {
                if sessions.adopt(session) {
                    info!(target: SESSION_JOB_TARGET, session = session.id(), "session established");
                }
                Arc::clone(session)
            }
            None => sessions.create(Some(fingerprint)),
        };

        response.set_content(Content::text(session.id()));
        Ok(())
    }
}

/// Removes every attribute named in the call's arguments from the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct Remove;

impl Job for Remove {
    fn process(
        &self,
        call: &Call,
        response: &mut Response,
        session: Option<&Arc<Session>>,
        _server: &ServerContext,
    ) -> Result<(), JobError> {
        let session = session.ok_or(JobError::MissingSession)?;
        let arguments = call
            .arguments()
            .map_err(|error| JobError::invalid_argument("payload", error))?;
        for key in arguments.keys() {
            session.remove(key);
        }
        response.set_content(Content::ok());
        Ok(())
    }
}
