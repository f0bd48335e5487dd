//! Incremental JSON-RPC Frame Parser
//!
//! TCP is a byte stream, so a connection's receive buffer can hold half a
//! request, exactly one, or several back to back. A [`FrameParser`] looks at
//! the buffered bytes and returns either:
//!
//! - `Ok(Some((frame, consumed)))` - one complete frame, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, wait for more data
//! - `Err(ParseError)` - the stream is malformed and cannot be resynchronized
//!
//! The caller compacts its buffer by `consumed` bytes and tries again.
//!
//! [`JsonRpcParser`] recognizes one JSON value per frame, with optional
//! whitespace (including newlines) between frames.

use crate::protocol::types::{Call, Frame};
use serde_json::Value;
use thiserror::Error;

/// Maximum nesting depth of a request value. `serde_json` enforces the same
/// recursion limit while parsing.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Errors that make a byte stream unusable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid JSON. There is no resync point in a JSON stream, so the
    /// connection has to be dropped.
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// A parser-specific framing violation
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        ParseError::Syntax {
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        }
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Recognizes complete frames at the front of a byte buffer.
pub trait FrameParser {
    /// Attempts to extract one frame from the front of `buf`.
    ///
    /// `consumed` in a successful result must be in `1..=buf.len()`.
    fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>>;
}

/// Parser for a stream of JSON-RPC 2.0 request objects.
///
/// # Example
///
/// ```
/// use pollrpc::protocol::{Frame, FrameParser, JsonRpcParser};
///
/// let mut parser = JsonRpcParser::new();
/// let buf = br#"{"jsonrpc":"2.0","method":"ping","id":1}"#;
///
/// let (frame, consumed) = parser.parse(buf).unwrap().unwrap();
/// assert_eq!(consumed, buf.len());
/// assert!(matches!(frame, Frame::Call(call) if call.method == "ping"));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcParser;

impl JsonRpcParser {
    pub fn new() -> Self {
        JsonRpcParser
    }
}

impl FrameParser for JsonRpcParser {
    fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        // Nothing is consumed until a value starts.
        let start = match buf.iter().position(|b| !is_whitespace(*b)) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let mut values = serde_json::Deserializer::from_slice(&buf[start..])
            .into_iter::<Value>();
        let value = match values.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) if e.is_eof() => return Ok(None),
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(None),
        };

        let end = start + values.byte_offset();
        // More digits may still be on the way
        if value.is_number() && end == buf.len() {
            return Ok(None);
        }
        let trailing = buf[end..].iter().take_while(|b| is_whitespace(**b)).count();

        Ok(Some((classify(value), end + trailing)))
    }
}

#[inline]
fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Turns one parsed JSON value into a call or a rejection.
fn classify(value: Value) -> Frame {
    let mut object = match value {
        Value::Object(object) => object,
        // Batches are not supported.
        _ => return Frame::invalid_request(None),
    };

    let id = match object.remove("id") {
        None => None,
        Some(id @ (Value::Null | Value::Number(_) | Value::String(_))) => Some(id),
        Some(_) => return Frame::invalid_request(None),
    };

    if let Some(version) = object.get("jsonrpc") {
        if version.as_str() != Some(crate::protocol::types::JSONRPC_VERSION) {
            return Frame::invalid_request(id);
        }
    }

    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => return Frame::invalid_request(id),
    };

    let params = match object.remove("params") {
        None => None,
        Some(params @ (Value::Array(_) | Value::Object(_))) => Some(params),
        Some(_) => return Frame::invalid_request(id),
    };

    Frame::Call(Call { method, params, id })
}

/// Helper function to parse a single JSON-RPC frame from bytes.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    JsonRpcParser::new().parse(buf)
}
