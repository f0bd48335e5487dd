//! # pollrpc - A Poll-Driven JSON-RPC Server Core
//!
//! pollrpc is the transport and connection-lifecycle layer of a JSON-RPC
//! server. It owns a fixed pool of connection slots and moves bytes between
//! sockets and a dispatcher, one non-blocking step at a time.
//!
//! ## Features
//!
//! - **Poll-Driven**: no threads, no async runtime; the caller invokes
//!   [`Server::poll`] as often as it likes
//! - **Fixed Pool**: a bounded number of connections, all memory allocated once
//! - **Pipelining**: several requests in one read are all dispatched
//! - **Cross-Thread Responses**: requests can be completed from any thread
//! - **Deferred Reap**: a closed connection's slot is reused only after its
//!   outstanding requests finish
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               Server                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────────┐    ┌─────────────────┐          │
//! │  │  Acceptor   │───>│ ConnectionPool  │───>│   Dispatcher    │          │
//! │  │ (TCP/Unix)  │    │  ┌───┐┌───┐┌───┐│    │ (MethodRegistry │          │
//! │  └─────────────┘    │  │ 0 ││ 1 ││...││    │  or a closure)  │          │
//! │                     │  └─┬─┘└───┘└───┘│    └────────┬────────┘          │
//! │  ┌─────────────┐    └────┼────────────┘             │                   │
//! │  │ JsonRpc     │         │ recv buffer              │ Request           │
//! │  │ Parser      │<────────┘                          ▼                   │
//! │  └─────────────┘         ▲                 ┌─────────────────┐          │
//! │                          │ outbound queue  │  any thread     │          │
//! │                          └─────────────────│  respond(...)   │          │
//! │                                            └─────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use pollrpc::{MethodRegistry, Server, ServerConfig};
//! use serde_json::json;
//!
//! let mut registry = MethodRegistry::new();
//! registry.register("add", |params| {
//!     let args: Vec<i64> = serde_json::from_value(params.unwrap_or_default())
//!         .map_err(|e| pollrpc::RpcError::invalid_params(e.to_string()))?;
//!     Ok(json!(args.iter().sum::<i64>()))
//! });
//!
//! let mut server = Server::listen("127.0.0.1:5260", ServerConfig::default(), registry)?;
//! loop {
//!     if server.poll()?.is_idle() {
//!         std::thread::sleep(std::time::Duration::from_millis(1));
//!     }
//! }
//! # Ok::<(), pollrpc::ServerError>(())
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: JSON-RPC framing, parser and response encoding
//! - [`connection`]: connection slots, the pool, requests and responses
//! - [`server`]: the poll loop, listeners, configuration and statistics
//! - [`methods`]: a name-based dispatcher with built-in methods
//!
//! ## Design Highlights
//!
//! ### Outstanding Requests
//!
//! Every dispatched frame holds a ticket on its connection. The ticket is
//! released when the response has been written, thrown away, or when the
//! request is dropped without a response. A closed connection keeps its slot
//! until no tickets remain, so a late response can never reach a peer that
//! reused the slot.
//!
//! ### Response Ordering
//!
//! Responses are written in the order they were submitted. Requests completed
//! in order therefore answer in order, whichever thread completes them.

pub mod connection;
pub mod methods;
pub mod protocol;
pub mod server;

// Re-export commonly used types for convenience
pub use connection::{ConnectionError, ConnectionId, Request};
pub use methods::{MethodRegistry, MethodResult};
pub use protocol::{Call, ErrorCode, Frame, FrameParser, JsonRpcParser, ParseError, RpcError};
pub use server::{
    Acceptor, Dispatcher, PollSummary, Server, ServerConfig, ServerError, ServerStats,
    StatsSnapshot, TcpAcceptor, Transport,
};

#[cfg(unix)]
pub use server::UnixAcceptor;

/// The default port the server binary listens on
pub const DEFAULT_PORT: u16 = 5260;

/// The default host the server binary binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of pollrpc
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
