//! JSON-RPC Protocol Implementation
//!
//! The connection core only knows about byte buffers and [`Frame`]s. This
//! module supplies the JSON-RPC 2.0 side of that boundary.
//!
//! ## Modules
//!
//! - `types`: Calls, frames, error codes and response serialization
//! - `parser`: The [`FrameParser`] trait and the incremental [`JsonRpcParser`]
//!
//! ## Example
//!
//! ```
//! use pollrpc::protocol::{encode_result, parse_frame, Frame};
//! use serde_json::json;
//!
//! // Parsing incoming data
//! let data = br#"{"jsonrpc":"2.0","method":"ping","id":1}"#;
//! let (frame, consumed) = parse_frame(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//!
//! // Creating responses
//! if let Frame::Call(call) = frame {
//!     let bytes = encode_result(call.id.as_ref().unwrap(), &json!("pong"));
//!     assert!(bytes.ends_with(b"\n"));
//! }
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_frame, FrameParser, JsonRpcParser, ParseError, ParseResult};
pub use types::{encode_error, encode_result, Call, ErrorCode, Frame, RpcError};
