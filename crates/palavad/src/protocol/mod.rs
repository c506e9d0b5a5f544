//! Wire protocol spoken between the bridge and its clients.
//!
//! Every request starts with a textual header followed by an opaque payload:
//!
//! ```text
//! <type>://<aliasedName>/<sessionId>/(<contentLength>)?<payload>
//! ```
//!
//! [`HeaderParser`] consumes the header one byte at a time and stops exactly
//! after the terminating `?`, leaving the payload on the stream for
//! [`read_payload`].

mod errors;
mod header;
mod parser;
#[cfg(test)]
mod tests;

pub use self::errors::ProtocolError;
pub use self::header::{CallType, Header};
pub use self::parser::{HeaderParser, MAX_HEADER_BYTES, read_payload};
