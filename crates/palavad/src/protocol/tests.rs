//! Unit tests for the header parser.

use std::io::{self, Cursor, Read};

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn parser() -> HeaderParser {
    HeaderParser::new(1024)
}

fn parse(parser: HeaderParser, input: &[u8]) -> Result<Header, ProtocolError> {
    parser.parse(&mut Cursor::new(input.to_vec()))
}

#[rstest]
#[case(Header::new(CallType::Json, "@palava.system.version", "", 0))]
#[case(Header::new(CallType::Data, "palava.session.initialize", "c0ffee", 42))]
#[case(Header::new(CallType::Json, "echo", "9f3e-41", 1024))]
fn encoded_headers_parse_back(parser: HeaderParser, #[case] header: Header) {
    let encoded = header.to_string();
    let parsed = parse(parser, encoded.as_bytes()).expect("parse encoded header");
    assert_eq!(parsed, header);
}

#[rstest]
fn parser_stops_after_question_mark(parser: HeaderParser) {
    let mut stream = Cursor::new(b"json://echo//(11)?{\"a\":\"b c\"}".to_vec());
    let header = parser.parse(&mut stream).expect("parse header");
    assert_eq!(header.content_length(), 11);

    let payload = read_payload(&mut stream, header.content_length()).expect("read payload");
    assert_eq!(payload, b"{\"a\":\"b c\"}");
}

#[rstest]
#[case("JSON")]
#[case("Json")]
#[case("data")]
#[case("DaTa")]
fn call_type_matches_case_insensitively(parser: HeaderParser, #[case] token: &str) {
    let input = format!("{token}://echo//(0)?");
    assert!(parse(parser, input.as_bytes()).is_ok());
}

#[rstest]
fn empty_session_id_means_no_session(parser: HeaderParser) {
    let header = parse(parser, b"json://echo//(0)?").expect("parse");
    assert_eq!(header.session_id(), None);
}

#[rstest]
fn every_truncated_header_reports_connection_lost(parser: HeaderParser) {
    let full = b"json://palava.system.version/abc/(12)?";
    for cut in 0..full.len() {
        let prefix = full.get(..cut).expect("prefix in range");
        let error = parse(parser, prefix).expect_err("truncated header must fail");
        assert!(
            error.is_connection_lost(),
            "prefix {:?} produced {error:?}",
            String::from_utf8_lossy(prefix)
        );
    }
}

#[rstest]
fn idle_close_is_distinguished(parser: HeaderParser) {
    let idle = parse(parser, b"").expect_err("empty stream");
    assert!(idle.is_idle_close());

    let mid = parse(parser, b"json:").expect_err("half header");
    assert!(mid.is_connection_lost());
    assert!(!mid.is_idle_close());
}

#[rstest]
#[case(b"json:/x".as_slice(), b'/', b'x', 6)]
#[case(b"json:x".as_slice(), b'/', b'x', 5)]
#[case(b"json://echo//x".as_slice(), b'(', b'x', 13)]
#[case(b"json://echo//(3)!".as_slice(), b'?', b'!', 16)]
fn delimiter_violations_name_expected_and_actual(
    parser: HeaderParser,
    #[case] input: &[u8],
    #[case] expected_byte: u8,
    #[case] actual_byte: u8,
    #[case] expected_position: usize,
) {
    match parse(parser, input) {
        Err(ProtocolError::UnexpectedCharacter {
            expected,
            actual,
            position,
        }) => {
            assert_eq!(expected, expected_byte);
            assert_eq!(actual, actual_byte);
            assert_eq!(position, expected_position);
        }
        other => panic!("expected format error, got {other:?}"),
    }
}

#[rstest]
fn format_error_message_mentions_both_characters(parser: HeaderParser) {
    let error = parse(parser, b"json:/x").expect_err("format error");
    let message = error.to_string();
    assert!(message.contains("expected '/'"), "{message}");
    assert!(message.contains("found 'x'"), "{message}");
    assert!(!error.is_connection_lost());
}

#[rstest]
fn unknown_call_type_is_rejected(parser: HeaderParser) {
    let error = parse(parser, b"xml://echo//(0)?").expect_err("unknown type");
    assert!(matches!(error, ProtocolError::UnknownCallType { token } if token == "xml"));
}

#[rstest]
#[case(b"json://echo//()?".as_slice())]
#[case(b"json://echo//(-1)?".as_slice())]
#[case(b"json://echo//(1a)?".as_slice())]
#[case(b"json://echo//(99999999999999999999999)?".as_slice())]
fn malformed_lengths_are_rejected(parser: HeaderParser, #[case] input: &[u8]) {
    let error = parse(parser, input).expect_err("invalid length");
    assert!(matches!(error, ProtocolError::InvalidContentLength { .. }));
}

#[rstest]
fn oversized_payload_is_rejected(parser: HeaderParser) {
    let error = parse(parser, b"json://echo//(4096)?").expect_err("too large");
    assert!(matches!(
        error,
        ProtocolError::ContentTooLarge {
            length: 4096,
            limit: 1024
        }
    ));
}

#[rstest]
fn empty_name_is_rejected(parser: HeaderParser) {
    let error = parse(parser, b"json:////(0)?").expect_err("empty name");
    assert!(matches!(error, ProtocolError::EmptyName));
}

#[rstest]
fn runaway_header_is_bounded(parser: HeaderParser) {
    let input = vec![b'j'; MAX_HEADER_BYTES + 16];
    let error = parse(parser, &input).expect_err("unterminated header");
    assert!(matches!(error, ProtocolError::HeaderTooLong { .. }));
}

#[test]
fn short_payload_reports_connection_lost() {
    let mut stream = Cursor::new(b"abc".to_vec());
    let error = read_payload(&mut stream, 5).expect_err("short payload");
    assert!(matches!(error, ProtocolError::ConnectionLost { read: 3, .. }));
}

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::ConnectionReset))
    }
}

#[rstest]
fn io_failures_are_connection_lost(parser: HeaderParser) {
    let error = parser.parse(&mut FailingReader).expect_err("reader fails");
    assert!(error.is_connection_lost());
    assert!(!error.is_idle_close());
}
