//! Typed response bodies and their wire framing.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Write};

use serde_json::Value;

/// MIME type of plain text content.
pub const TEXT_MIME: &str = "text/plain";
/// MIME type of JSON content.
pub const JSON_MIME: &str = "application/json";
/// MIME type of opaque binary content.
pub const OCTET_STREAM_MIME: &str = "application/octet-stream";
/// MIME type used for failure responses.
pub const ERROR_MIME: &str = "text/x-palava-error";

/// Body produced by a command, written back as
/// `<mime>://(<length>)?<body>`.
#[derive(Clone, PartialEq, Eq)]
pub struct Content {
    mime: Cow<'static, str>,
    body: Vec<u8>,
}

impl Content {
    /// Content with an arbitrary MIME type.
    #[must_use]
    pub fn new(mime: impl Into<Cow<'static, str>>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            mime: mime.into(),
            body: body.into(),
        }
    }

    /// Plain text content.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(TEXT_MIME, text.into().into_bytes())
    }

    /// JSON content.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::new(JSON_MIME, value.to_string().into_bytes())
    }

    /// Opaque bytes returned unchanged.
    #[must_use]
    pub fn raw(body: impl Into<Vec<u8>>) -> Self {
        Self::new(OCTET_STREAM_MIME, body)
    }

    /// Acknowledgement returned by commands with nothing else to say.
    #[must_use]
    pub fn ok() -> Self {
        Self::text("OK")
    }

    /// Failure description sent when a request could not be served.
    #[must_use]
    pub fn error(error: &dyn fmt::Display) -> Self {
        Self::new(ERROR_MIME, error.to_string().into_bytes())
    }

    /// MIME type of the body.
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns `true` for failure responses.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.mime == ERROR_MIME
    }

    /// Writes the framed content to `writer`.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `writer`.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, "{}://({})?", self.mime, self.body.len())?;
        writer.write_all(&self.body)?;
        writer.flush()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Content")
            .field("mime", &self.mime)
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_prefixes_mime_and_length() {
        let mut buffer = Vec::new();
        Content::text("hello")
            .write_to(&mut buffer)
            .expect("write content");
        assert_eq!(buffer, b"text/plain://(5)?hello");
    }

    #[test]
    fn error_content_is_flagged() {
        let content = Content::error(&"no such command");
        assert!(content.is_error());
        assert_eq!(content.body(), b"no such command");
        assert!(!Content::ok().is_error());
    }
}
