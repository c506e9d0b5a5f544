//! Decoded requests and the content produced in reply.

mod content;

use std::collections::BTreeMap;

use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::Header;

pub use self::content::{Content, ERROR_MIME, JSON_MIME, OCTET_STREAM_MIME, TEXT_MIME};

/// Errors raised while decoding call arguments.
#[derive(Debug, Error)]
pub enum CallError {
    /// The payload is not valid JSON.
    #[error("call payload is not valid JSON: {source}")]
    InvalidJson {
        /// Underlying decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The payload is JSON but not an object.
    #[error("call payload must be a JSON object")]
    NotAnObject,
}

/// One request read off a connection: its header, payload and the peer that
/// sent it.
#[derive(Debug)]
pub struct Call {
    header: Header,
    payload: Vec<u8>,
    peer: Option<String>,
    arguments: OnceCell<Map<String, Value>>,
}

impl Call {
    /// Builds a call from a parsed header and its payload bytes.
    #[must_use]
    pub fn new(header: Header, payload: Vec<u8>) -> Self {
        Self {
            header,
            payload,
            peer: None,
            arguments: OnceCell::new(),
        }
    }

    /// Records the address of the connection the call arrived on.
    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Parsed header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Command name as sent by the client.
    #[must_use]
    pub fn name(&self) -> &str {
        self.header.aliased_name()
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Address of the connection the call arrived on, when known.
    #[must_use]
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Payload decoded as a JSON object. An empty payload decodes to an empty
    /// object. The result is cached after the first successful decode.
    ///
    /// # Errors
    ///
    /// Returns [`CallError`] when the payload is not a JSON object.
    pub fn arguments(&self) -> Result<&Map<String, Value>, CallError> {
        self.arguments.get_or_try_init(|| decode_arguments(&self.payload))
    }

    /// Arguments flattened to strings, the view legacy jobs work with.
    /// String values are taken verbatim; other values are rendered as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CallError`] when the payload is not a JSON object.
    pub fn string_arguments(&self) -> Result<BTreeMap<String, String>, CallError> {
        Ok(self
            .arguments()?
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect())
    }

    /// Single argument rendered as a string, if present and decodable.
    #[must_use]
    pub fn string_argument(&self, key: &str) -> Option<String> {
        self.arguments()
            .ok()
            .and_then(|arguments| arguments.get(key))
            .map(value_to_string)
    }
}

fn decode_arguments(payload: &[u8]) -> Result<Map<String, Value>, CallError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CallError::NotAnObject),
        Err(source) => Err(CallError::InvalidJson { source }),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::protocol::CallType;

    fn call(payload: &str) -> Call {
        let header = Header::new(CallType::Json, "echo", "", payload.len());
        Call::new(header, payload.as_bytes().to_vec())
    }

    #[test]
    fn empty_payload_has_no_arguments() {
        let call = call("");
        assert!(call.arguments().expect("decode").is_empty());
    }

    #[test]
    fn string_view_keeps_strings_and_renders_other_values() {
        let call = call(r#"{"msec":"25","count":3,"flag":true}"#);
        let strings = call.string_arguments().expect("decode");
        assert_eq!(strings.get("msec").map(String::as_str), Some("25"));
        assert_eq!(strings.get("count").map(String::as_str), Some("3"));
        assert_eq!(strings.get("flag").map(String::as_str), Some("true"));
    }

    #[rstest]
    #[case("[1,2]")]
    #[case("\"text\"")]
    fn non_object_payloads_are_rejected(#[case] payload: &str) {
        assert!(matches!(
            call(payload).arguments(),
            Err(CallError::NotAnObject)
        ));
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(matches!(
            call("{nope").arguments(),
            Err(CallError::InvalidJson { .. })
        ));
        assert_eq!(call("{nope").string_argument("a"), None);
    }
}
