//! Poll-Driven Server
//!
//! The [`Server`] owns the listening socket, the connection pool and the
//! dispatcher. It never blocks and never spawns threads; the caller drives it
//! by invoking [`Server::poll`] in a loop.
//!
//! ## Poll Step
//!
//! ```text
//! poll()
//!   │
//!   ├─ 1. reap     closed connections: discard queued responses,
//!   │              release slots with no outstanding requests
//!   │
//!   ├─ 2. accept   at most one new peer, if a slot is free
//!   │
//!   └─ 3. service  for each open connection, in accept order:
//!                    flush   (queued responses -> socket)
//!                    receive (socket -> frames -> dispatcher)
//! ```
//!
//! A failure on one connection closes that connection only. The step itself
//! fails only when the listener reports a hard accept error.

pub mod config;
pub mod stats;
pub mod transport;

pub use config::ServerConfig;
pub use stats::{ServerStats, StatsSnapshot};
pub use transport::{Acceptor, TcpAcceptor, Transport};

#[cfg(unix)]
pub use transport::UnixAcceptor;

use crate::connection::{ConnectionId, ConnectionPool, Request};
use crate::protocol::{FrameParser, JsonRpcParser};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use transport::is_transient;

#[cfg(unix)]
use std::path::Path;

/// Errors raised while setting up or polling the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be created or configured
    #[error("Failed to create socket: {source}")]
    Socket {
        #[source]
        source: io::Error,
    },

    /// The socket could not be switched to non-blocking mode
    #[error("Failed to set non-blocking mode: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },

    /// Binding to the listen address failed
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The socket refused to listen
    #[error("Failed to listen: {source}")]
    Listen {
        #[source]
        source: io::Error,
    },

    /// The listen address could not be resolved
    #[error("Failed to resolve listen address: {source}")]
    Resolve {
        #[source]
        source: io::Error,
    },

    /// The listen address resolved to nothing
    #[error("Listen address resolved to no socket addresses")]
    NoAddress,

    /// The configuration cannot be used to build a server
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The listener failed with a non-transient error
    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// Receives every request parsed from any connection.
///
/// The dispatcher runs on the polling thread and must not block. It takes
/// ownership of the [`Request`] and completes it eventually, from any thread,
/// with one of its `respond*` methods or [`Request::release`].
pub trait Dispatcher {
    fn dispatch(&mut self, request: Request);
}

impl<F> Dispatcher for F
where
    F: FnMut(Request),
{
    fn dispatch(&mut self, request: Request) {
        self(request)
    }
}

/// What a single [`Server::poll`] step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Connections accepted (0 or 1)
    pub accepted: usize,
    /// Closed connections whose slots were released
    pub reaped: usize,
    /// Frames dispatched or rejected
    pub dispatched: u64,
    /// Responses fully written
    pub sent: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl PollSummary {
    /// True when the step made no progress at all.
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// A non-blocking JSON-RPC server driven by [`poll`](Server::poll).
pub struct Server<D, A: Acceptor = TcpAcceptor, P: FrameParser = JsonRpcParser> {
    acceptor: A,
    parser: P,
    dispatcher: D,
    pool: ConnectionPool<A::Stream>,
    stats: Arc<ServerStats>,
    config: ServerConfig,
}

impl<D: Dispatcher> Server<D> {
    /// Binds a TCP listener on the first address `addr` resolves to that
    /// accepts the bind.
    pub fn listen(
        addr: impl ToSocketAddrs,
        config: ServerConfig,
        dispatcher: D,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let addrs = addr
            .to_socket_addrs()
            .map_err(|source| ServerError::Resolve { source })?;

        let mut acceptor = None;
        let mut last_error = ServerError::NoAddress;
        for addr in addrs {
            match TcpAcceptor::bind(addr, config.backlog, config.nodelay) {
                Ok(bound) => {
                    acceptor = Some(bound);
                    break;
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Bind attempt failed");
                    last_error = e;
                }
            }
        }
        let acceptor = acceptor.ok_or(last_error)?;

        if let Ok(local) = acceptor.local_addr() {
            info!(addr = %local, "Listening");
        }
        Self::with_acceptor(acceptor, JsonRpcParser::new(), config, dispatcher)
    }

    /// The address the TCP listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }
}

#[cfg(unix)]
impl<D: Dispatcher> Server<D, UnixAcceptor> {
    /// Binds a Unix domain socket at `path`.
    pub fn listen_unix(
        path: impl AsRef<Path>,
        config: ServerConfig,
        dispatcher: D,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let acceptor = UnixAcceptor::bind(path)?;
        info!(path = %acceptor.path().display(), "Listening");
        Self::with_acceptor(acceptor, JsonRpcParser::new(), config, dispatcher)
    }
}

impl<D, A, P> Server<D, A, P>
where
    D: Dispatcher,
    A: Acceptor,
    P: FrameParser,
{
    /// Builds a server over any acceptor and frame parser.
    pub fn with_acceptor(
        acceptor: A,
        parser: P,
        config: ServerConfig,
        dispatcher: D,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let pool = ConnectionPool::new(config.max_connections, config.recv_buffer_size);

        Ok(Self {
            acceptor,
            parser,
            dispatcher,
            pool,
            stats: Arc::new(ServerStats::new()),
            config,
        })
    }

    /// Runs one non-blocking step: reap, accept one, then flush and receive
    /// on every open connection.
    pub fn poll(&mut self) -> Result<PollSummary, ServerError> {
        let before = self.stats.snapshot();

        let reaped = self.reap();

        let mut accept_error = None;
        let accepted = match self.accept_one() {
            Ok(accepted) => usize::from(accepted),
            Err(e) => {
                warn!(error = %e, "Accept failed");
                accept_error = Some(e);
                0
            }
        };

        for position in 0..self.pool.active_count() {
            let conn = self.pool.active_mut(position);
            if conn.is_closed() {
                continue;
            }

            if let Err(e) = conn.flush(&self.stats) {
                conn.fail(e);
                continue;
            }

            if let Err(e) = conn.receive(&mut self.parser, &mut self.dispatcher, &self.stats) {
                conn.fail(e);
            }
        }

        if let Some(e) = accept_error {
            return Err(ServerError::Accept(e));
        }

        let after = self.stats.snapshot();
        Ok(PollSummary {
            accepted,
            reaped,
            dispatched: after.requests_dispatched.saturating_sub(before.requests_dispatched),
            sent: after.responses_sent.saturating_sub(before.responses_sent),
            bytes_read: after.bytes_read.saturating_sub(before.bytes_read),
            bytes_written: after.bytes_written.saturating_sub(before.bytes_written),
        })
    }

    /// Releases closed connections whose dispatched work has all finished.
    fn reap(&mut self) -> usize {
        let mut reaped = 0;
        let mut position = 0;

        while position < self.pool.active_count() {
            let conn = self.pool.active_mut(position);
            if !conn.is_closed() {
                position += 1;
                continue;
            }

            let discarded = conn.discard_pending();
            if discarded > 0 {
                self.stats.responses_discarded(discarded);
                trace!(conn = %conn.id(), discarded, "Discarded responses for closed connection");
            }

            if conn.is_reapable() {
                let id = self.pool.release_at(position);
                self.stats.connection_reaped();
                debug!(conn = %id, "Connection reaped");
                reaped += 1;
            } else {
                trace!(
                    conn = %conn.id(),
                    outstanding = conn.outstanding(),
                    "Waiting for outstanding requests"
                );
                position += 1;
            }
        }

        reaped
    }

    /// Accepts at most one peer. Returns whether a connection was added.
    fn accept_one(&mut self) -> io::Result<bool> {
        if !self.pool.has_free() {
            return Ok(false);
        }

        let (stream, peer) = match self.acceptor.accept() {
            Ok(accepted) => accepted,
            Err(e) if is_transient(&e) => return Ok(false),
            Err(e) => return Err(e),
        };

        let Some(id) = self.pool.acquire(stream, peer) else {
            return Ok(false);
        };
        self.stats.connection_opened();

        match peer {
            Some(addr) => info!(conn = %id, peer = %addr, "Accepted connection"),
            None => info!(conn = %id, "Accepted connection"),
        }
        Ok(true)
    }

    /// Closes a connection. Its slot is reaped on a later poll step once its
    /// outstanding requests finish. Returns `false` for unknown or stale ids.
    pub fn close_connection(&mut self, id: ConnectionId) -> bool {
        match self.pool.get_mut(id) {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Shared handle to the server counters.
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool<A::Stream> {
        &self.pool
    }

    pub fn acceptor(&self) -> &A {
        &self.acceptor
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    /// Connections holding a slot, including closed ones not yet reaped.
    pub fn active_connections(&self) -> usize {
        self.pool.active_count()
    }

    pub fn free_slots(&self) -> usize {
        self.pool.free_count()
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Closes every connection and the listener. Queued responses are
    /// discarded, and responses completed later are dropped on arrival.
    pub fn shutdown(mut self) {
        let mut discarded = 0;
        for position in 0..self.pool.active_count() {
            let conn = self.pool.active_mut(position);
            conn.close();
            discarded += conn.discard_pending();
            self.stats.connection_reaped();
        }
        self.stats.responses_discarded(discarded);

        info!(
            connections = self.pool.active_count(),
            discarded,
            "Server shut down"
        );
    }
}
