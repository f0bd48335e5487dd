//! Connection Management Module
//!
//! This module holds everything the server keeps per peer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ConnectionPool                          │
//! │   free: [3, 2]             active: [0, 1]                   │
//! │                                                             │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────┐ ┌──────┐        │
//! │  │ Connection 0 │ │ Connection 1 │ │  2   │ │  3   │        │
//! │  │ recv buffer  │ │ recv buffer  │ │ free │ │ free │        │
//! │  │ in-flight    │ │ in-flight    │ └──────┘ └──────┘        │
//! │  │ queue ◄──────┼─┼──────────────┼── responses from any      │
//! │  └──────────────┘ └──────────────┘   thread                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Fixed Pool**: slots and receive buffers are allocated once at startup
//! - **Partial I/O**: reads and writes resume across poll steps
//! - **Pipelining**: every complete frame in the buffer is dispatched at once
//! - **Deferred Reap**: a closed slot is only reused after every dispatched
//!   request has finished

pub mod handler;
pub mod pool;
pub mod request;

// Re-export commonly used types
pub use handler::{Connection, ConnectionError};
pub use pool::ConnectionPool;
pub use request::{ConnectionId, Request};
