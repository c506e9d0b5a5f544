//! Client identity used to detect session reuse across clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Argument carrying the client's network address.
pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
/// Argument carrying the client's user agent.
pub const HTTP_USER_AGENT: &str = "HTTP_USER_AGENT";

/// Address and user agent a session was created for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    remote_address: Option<String>,
    user_agent: Option<String>,
}

impl Fingerprint {
    /// Builds a fingerprint from explicit parts.
    #[must_use]
    pub fn new(remote_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            remote_address,
            user_agent,
        }
    }

    /// Derives a fingerprint from string call arguments.
    #[must_use]
    pub fn from_arguments(arguments: &BTreeMap<String, String>) -> Self {
        Self {
            remote_address: arguments.get(REMOTE_ADDR).cloned(),
            user_agent: arguments.get(HTTP_USER_AGENT).cloned(),
        }
    }

    /// Client address, when the client supplied one.
    #[must_use]
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    /// Client user agent, when the client supplied one.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Returns `true` when the fingerprint carries no identifying data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remote_address.is_none() && self.user_agent.is_none()
    }
}
