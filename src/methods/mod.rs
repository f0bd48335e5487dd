//! Method Registry Module
//!
//! A ready-made [`Dispatcher`](crate::server::Dispatcher) that routes each
//! request to a handler by method name.
//!
//! ## Architecture
//!
//! ```text
//! Request (from the poll step)
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ MethodRegistry  │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - Execute      │──── inline, or on the tokio blocking pool
//! │  - Respond      │
//! └────────┬────────┘
//!          │
//!          ▼
//!   Request::respond / respond_error
//! ```
//!
//! ## Built-in Methods
//!
//! - `ping` - returns `"pong"`
//! - `echo` - returns its parameters
//! - `rpc_get_methods` - lists every method name, sorted

pub mod handler;

pub use handler::{MethodRegistry, MethodResult};
