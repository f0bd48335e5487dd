//! JSON-RPC 2.0 Message Types
//!
//! This module defines the values that flow through the server: the [`Frame`]
//! produced by a parser, the [`Call`] handed to the dispatcher, and the
//! [`RpcError`] carried by error responses.
//!
//! ## Wire Format
//!
//! Every response is a single JSON object terminated by a newline:
//!
//! ```text
//! {"jsonrpc":"2.0","result":"pong","id":1}
//! {"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":2}
//! ```
//!
//! Requests without an `id` are notifications and never receive a response.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::error;

/// The only protocol version this server speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Terminator appended to every serialized response.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Used if a response cannot be serialized. `serde_json::Value` always
/// serializes, so this is only reachable through a broken `Serialize` impl.
const FALLBACK_RESPONSE: &[u8] =
    b"{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32603,\"message\":\"Internal error\"},\"id\":null}\n";

/// Standard JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The JSON sent is not a valid request object.
    InvalidRequest,
    /// The method does not exist.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// Application-defined error code.
    Server(i32),
}

impl ErrorCode {
    /// Returns the numeric code sent on the wire.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::Server(code) => code,
        }
    }

    /// Returns the default human-readable message for this code.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid parameters",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::Server(_) => "Error",
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            other => ErrorCode::Server(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// The `error` member of a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error carrying the default message for `code`.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }

    /// Creates an error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Shorthand for an `Invalid parameters` error with a custom message.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    /// Shorthand for an `Internal error` with a custom message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, message)
    }

    /// Attaches structured `data` to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns the error code as an [`ErrorCode`].
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from(self.code)
    }
}

impl From<ErrorCode> for RpcError {
    fn from(code: ErrorCode) -> Self {
        RpcError::new(code)
    }
}

/// A well-formed method call extracted from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Name of the method to invoke.
    pub method: String,
    /// Positional (array) or named (object) parameters.
    pub params: Option<Value>,
    /// Request id; `None` marks a notification.
    pub id: Option<Value>,
}

impl Call {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            id,
        }
    }

    /// Notifications have no `id` and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// One unit recognized by a [`FrameParser`](super::FrameParser).
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A call to hand to the dispatcher.
    Call(Call),
    /// Syntactically valid JSON that is not a valid request. It is answered
    /// with `error` without reaching the dispatcher.
    Reject { id: Option<Value>, error: RpcError },
}

impl Frame {
    /// Builds an `Invalid request` rejection.
    pub fn invalid_request(id: Option<Value>) -> Self {
        Frame::Reject {
            id,
            error: RpcError::new(ErrorCode::InvalidRequest),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    #[serde(flatten)]
    body: Body<'a>,
    id: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Body<'a> {
    Result(&'a Value),
    Error(&'a RpcError),
}

/// Serializes a success response for request `id`.
pub fn encode_result(id: &Value, result: &Value) -> Bytes {
    encode(&Envelope {
        jsonrpc: JSONRPC_VERSION,
        body: Body::Result(result),
        id,
    })
}

/// Serializes an error response for request `id` (`null` when unknown).
pub fn encode_error(id: &Value, error: &RpcError) -> Bytes {
    encode(&Envelope {
        jsonrpc: JSONRPC_VERSION,
        body: Body::Error(error),
        id,
    })
}

fn encode(envelope: &Envelope<'_>) -> Bytes {
    let mut writer = BytesMut::with_capacity(128).writer();
    match serde_json::to_writer(&mut writer, envelope) {
        Ok(()) => {
            let mut buf = writer.into_inner();
            buf.put_u8(FRAME_DELIMITER);
            buf.freeze()
        }
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            Bytes::from_static(FALLBACK_RESPONSE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_code_table() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(ErrorCode::InvalidParams.code(), -32602);
        assert_eq!(ErrorCode::InternalError.code(), -32603);
        assert_eq!(ErrorCode::Server(-1).message(), "Error");
        assert_eq!(ErrorCode::from(-32601), ErrorCode::MethodNotFound);
        assert_eq!(ErrorCode::from(42), ErrorCode::Server(42));
    }

    #[test]
    fn test_encode_result() {
        let bytes = encode_result(&json!(1), &json!("pong"));
        assert_eq!(&bytes[..], b"{\"jsonrpc\":\"2.0\",\"result\":\"pong\",\"id\":1}\n");
    }

    #[test]
    fn test_encode_error() {
        let error = RpcError::new(ErrorCode::MethodNotFound);
        let bytes = encode_error(&json!("abc"), &error);
        assert_eq!(
            &bytes[..],
            &b"{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32601,\"message\":\"Method not found\"},\"id\":\"abc\"}\n"[..]
        );
    }

    #[test]
    fn test_encode_error_with_data_and_null_id() {
        let error = RpcError::invalid_params("missing name").with_data(json!({"field": "name"}));
        let bytes = encode_error(&Value::Null, &error);
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["id"], Value::Null);
        assert_eq!(parsed["error"]["code"], json!(-32602));
        assert_eq!(parsed["error"]["message"], json!("missing name"));
        assert_eq!(parsed["error"]["data"]["field"], json!("name"));
    }

    #[test]
    fn test_notification() {
        assert!(Call::new("log", None, None).is_notification());
        assert!(!Call::new("log", None, Some(Value::Null)).is_notification());
    }
}
