//! Byte-at-a-time header state machine.

use std::io::{self, Read};

use super::{CallType, Header, ProtocolError};

/// Upper bound on the number of header bytes read before `?`.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Type,
    Colon,
    FirstSlash,
    Name,
    SessionId,
    LeftParen,
    ContentLength,
    QuestionMark,
}

#[derive(Default)]
struct Fields {
    call_type: Vec<u8>,
    name: Vec<u8>,
    session_id: Vec<u8>,
    content_length: Vec<u8>,
}

/// Parses request headers from a byte stream.
///
/// The parser never reads past the terminating `?`, so the caller can read
/// the payload from the same stream afterwards.
#[derive(Debug, Clone, Copy)]
pub struct HeaderParser {
    max_content_length: usize,
}

impl HeaderParser {
    /// Builds a parser that rejects payloads larger than `max_content_length`.
    #[must_use]
    pub fn new(max_content_length: usize) -> Self {
        Self { max_content_length }
    }

    /// Reads one header from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ConnectionLost`] when the stream ends or fails
    /// before the terminating `?`, and a format variant of [`ProtocolError`]
    /// when the bytes violate the header grammar.
    pub fn parse<R: Read + ?Sized>(&self, reader: &mut R) -> Result<Header, ProtocolError> {
        let mut state = State::Type;
        let mut fields = Fields::default();
        let mut position = 0_usize;

        loop {
            if position >= MAX_HEADER_BYTES {
                return Err(ProtocolError::HeaderTooLong {
                    limit: MAX_HEADER_BYTES,
                });
            }
            let byte = next_byte(reader, position)?;
            state = match state {
                State::Type => accumulate(&mut fields.call_type, byte, b':', State::Type, State::Colon),
                State::Colon => expect(byte, b'/', position, State::FirstSlash)?,
                State::FirstSlash => expect(byte, b'/', position, State::Name)?,
                State::Name => accumulate(&mut fields.name, byte, b'/', State::Name, State::SessionId),
                State::SessionId => accumulate(
                    &mut fields.session_id,
                    byte,
                    b'/',
                    State::SessionId,
                    State::LeftParen,
                ),
                State::LeftParen => expect(byte, b'(', position, State::ContentLength)?,
                State::ContentLength => accumulate(
                    &mut fields.content_length,
                    byte,
                    b')',
                    State::ContentLength,
                    State::QuestionMark,
                ),
                State::QuestionMark => {
                    expect(byte, b'?', position, State::QuestionMark)?;
                    return self.finish(fields);
                }
            };
            position += 1;
        }
    }

    fn finish(&self, fields: Fields) -> Result<Header, ProtocolError> {
        let token = String::from_utf8_lossy(&fields.call_type);
        let call_type = token
            .parse::<CallType>()
            .map_err(|_| ProtocolError::UnknownCallType {
                token: token.into_owned(),
            })?;

        let name = into_utf8(fields.name, "name")?;
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        let session_id = into_utf8(fields.session_id, "session id")?;
        let content_length = parse_length(&fields.content_length)?;
        if content_length > self.max_content_length {
            return Err(ProtocolError::ContentTooLarge {
                length: content_length,
                limit: self.max_content_length,
            });
        }

        Ok(Header::new(call_type, name, session_id, content_length))
    }
}

/// Reads exactly `length` payload bytes following a header.
///
/// # Errors
///
/// A short read is reported as [`ProtocolError::ConnectionLost`].
pub fn read_payload<R: Read + ?Sized>(
    reader: &mut R,
    length: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = vec![0_u8; length];
    let mut filled = 0_usize;
    while let Some(remaining) = payload.get_mut(filled..)
        && !remaining.is_empty()
    {
        match reader.read(remaining) {
            Ok(0) => return Err(ProtocolError::end_of_stream(filled)),
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(ProtocolError::connection_lost(filled, error)),
        }
    }
    Ok(payload)
}

fn next_byte<R: Read + ?Sized>(reader: &mut R, position: usize) -> Result<u8, ProtocolError> {
    let mut buffer = [0_u8; 1];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Err(ProtocolError::end_of_stream(position)),
            Ok(_) => return Ok(buffer[0]),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(ProtocolError::connection_lost(position, error)),
        }
    }
}

fn accumulate(field: &mut Vec<u8>, byte: u8, delimiter: u8, stay: State, next: State) -> State {
    if byte == delimiter {
        next
    } else {
        field.push(byte);
        stay
    }
}

fn expect(byte: u8, expected: u8, position: usize, next: State) -> Result<State, ProtocolError> {
    if byte == expected {
        Ok(next)
    } else {
        Err(ProtocolError::UnexpectedCharacter {
            expected,
            actual: byte,
            position,
        })
    }
}

fn into_utf8(bytes: Vec<u8>, field: &'static str) -> Result<String, ProtocolError> {
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

fn parse_length(digits: &[u8]) -> Result<usize, ProtocolError> {
    let invalid = || ProtocolError::InvalidContentLength {
        value: String::from_utf8_lossy(digits).into_owned(),
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or_else(invalid)
}
