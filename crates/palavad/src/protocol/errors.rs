//! Failures raised while reading a request off the wire.

use std::io;

use thiserror::Error;

/// Errors produced by the header parser and payload reader.
///
/// Format errors mean the peer sent bad data; [`ProtocolError::ConnectionLost`]
/// means the peer went away. Callers must treat them differently: a format
/// error may still be answered, a lost connection must not be.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A delimiter state saw a byte other than the one it requires.
    #[error(
        "malformed header at byte {position}: expected {}, found {}",
        describe(.expected),
        describe(.actual)
    )]
    UnexpectedCharacter {
        /// Byte the grammar requires at this position.
        expected: u8,
        /// Byte actually read.
        actual: u8,
        /// Zero-based offset of the offending byte within the header.
        position: usize,
    },
    /// The call type token is not one of the supported types.
    #[error("unknown call type '{token}'")]
    UnknownCallType {
        /// Token read before `://`.
        token: String,
    },
    /// The command name segment was empty.
    #[error("command name must not be empty")]
    EmptyName,
    /// A header field was not valid UTF-8.
    #[error("header field '{field}' is not valid UTF-8")]
    InvalidUtf8 {
        /// Name of the offending field.
        field: &'static str,
    },
    /// The content length was not a base-10 non-negative integer.
    #[error("invalid content length '{value}'")]
    InvalidContentLength {
        /// Raw text found between the parentheses.
        value: String,
    },
    /// The announced payload exceeds the configured limit.
    #[error("content length {length} exceeds the limit of {limit} bytes")]
    ContentTooLarge {
        /// Announced payload size.
        length: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// The header grew past the parser's size limit without terminating.
    #[error("header exceeds {limit} bytes")]
    HeaderTooLong {
        /// Maximum header size in bytes.
        limit: usize,
    },
    /// The stream ended or failed before the request was complete.
    #[error("connection lost after {read} bytes: {source}")]
    ConnectionLost {
        /// Bytes of the current header or payload read before the loss.
        read: usize,
        /// End-of-stream or the underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl ProtocolError {
    pub(crate) fn connection_lost(read: usize, source: io::Error) -> Self {
        Self::ConnectionLost { read, source }
    }

    pub(crate) fn end_of_stream(read: usize) -> Self {
        Self::connection_lost(read, io::Error::from(io::ErrorKind::UnexpectedEof))
    }

    /// Returns `true` when the peer disconnected or the stream failed.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }

    /// Returns `true` when the peer closed the connection cleanly between
    /// requests, before sending any header byte.
    #[must_use]
    pub fn is_idle_close(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { read: 0, source }
                if source.kind() == io::ErrorKind::UnexpectedEof
        )
    }
}

fn describe(byte: &u8) -> String {
    let byte = *byte;
    if byte.is_ascii_graphic() {
        format!("'{}'", char::from(byte))
    } else {
        format!("0x{byte:02x}")
    }
}
