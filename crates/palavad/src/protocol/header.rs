//! Parsed request headers.

use std::fmt;

use strum::{Display, EnumString};

/// Kind of call announced by a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CallType {
    /// Call whose payload is a JSON document.
    Json,
    /// Legacy call type; its payload is decoded the same way as `Json`.
    Data,
}

/// Header preceding every request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    call_type: CallType,
    aliased_name: String,
    session_id: String,
    content_length: usize,
}

impl Header {
    /// Builds a header. An empty `session_id` means "no session".
    #[must_use]
    pub fn new(
        call_type: CallType,
        aliased_name: impl Into<String>,
        session_id: impl Into<String>,
        content_length: usize,
    ) -> Self {
        Self {
            call_type,
            aliased_name: aliased_name.into(),
            session_id: session_id.into(),
            content_length,
        }
    }

    /// Announced call type.
    #[must_use]
    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Command name as sent by the client, before alias resolution.
    #[must_use]
    pub fn aliased_name(&self) -> &str {
        &self.aliased_name
    }

    /// Session id sent by the client, or `None` when the field was empty.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        if self.session_id.is_empty() {
            None
        } else {
            Some(&self.session_id)
        }
    }

    /// Number of payload bytes following the header.
    #[must_use]
    pub fn content_length(&self) -> usize {
        self.content_length
    }
}

/// Renders the header in wire form, without the payload.
impl fmt::Display for Header {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}://{}/{}/({})?",
            self.call_type, self.aliased_name, self.session_id, self.content_length
        )
    }
}
