//! Connection State and I/O
//!
//! A [`Connection`] is one slot of the server's fixed pool. It is driven
//! entirely by the poll step; nothing here blocks.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Slot acquired on accept (free -> active)
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Every poll step             │
//!    │                              │
//!    │  flush:   queue -> socket    │
//!    │  receive: socket -> buffer   │
//!    │           buffer -> frames   │
//!    │           frames -> dispatch │
//!    └──────────────────────────────┘
//!        │
//!        ▼  EOF / I/O error / malformed frame
//! 3. close(): socket shut down, slot stays active
//!        │
//!        ▼  responses discarded as they arrive
//! 4. outstanding == 0: slot released (active -> free)
//! ```
//!
//! ## Buffer Management
//!
//! The receive buffer has a fixed capacity chosen at startup. After each frame
//! the unconsumed tail is shifted to the front. If the buffer fills up without
//! holding a complete frame the connection is closed with
//! [`ConnectionError::FrameTooLarge`].

use crate::connection::request::{self, ConnectionId, Request, Response, SlotShared, Ticket};
use crate::protocol::{Frame, FrameParser, ParseError};
use crate::server::stats::ServerStats;
use crate::server::transport::{is_transient, Transport};
use crate::server::Dispatcher;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The peer sent bytes the parser cannot make sense of
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The receive buffer filled up without holding a complete frame
    #[error("Frame exceeds receive buffer of {capacity} bytes")]
    FrameTooLarge { capacity: usize },
}

/// Per-peer state held in a pool slot.
pub struct Connection<T> {
    id: ConnectionId,
    transport: Option<T>,
    peer: Option<SocketAddr>,
    recv_buf: Box<[u8]>,
    recv_len: usize,
    sending: Option<Response>,
    closed: bool,
    shared: Arc<SlotShared>,
}

impl<T> Connection<T> {
    /// Creates an unoccupied slot with a receive buffer of `recv_buffer_size`.
    pub(crate) fn vacant(slot: usize, recv_buffer_size: usize) -> Self {
        Self {
            id: ConnectionId {
                slot,
                generation: 0,
            },
            transport: None,
            peer: None,
            recv_buf: vec![0u8; recv_buffer_size].into_boxed_slice(),
            recv_len: 0,
            sending: None,
            closed: true,
            shared: SlotShared::new(),
        }
    }

    /// Puts a freshly accepted peer into this slot.
    pub(crate) fn open(&mut self, transport: T, peer: Option<SocketAddr>, generation: u64) {
        debug_assert!(self.is_reapable(), "slot reused while still in use");
        self.id.generation = generation;
        self.transport = Some(transport);
        self.peer = peer;
        self.recv_len = 0;
        self.sending = None;
        self.closed = false;
    }

    /// Clears per-connection state when the slot returns to the free list.
    pub(crate) fn reset(&mut self) {
        self.transport = None;
        self.peer = None;
        self.recv_len = 0;
        self.sending = None;
        self.closed = true;
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Frames dispatched whose responses are not yet sent or discarded.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding()
    }

    /// Bytes received but not yet parsed into a frame.
    pub fn buffered(&self) -> usize {
        self.recv_len
    }

    /// True once the slot can go back to the free list.
    pub(crate) fn is_reapable(&self) -> bool {
        self.closed
            && self.sending.is_none()
            && self.shared.outstanding() == 0
            && self.shared.queue_is_empty()
    }

    /// Drops the in-flight response and everything queued behind it.
    /// Returns how many responses were thrown away.
    pub(crate) fn discard_pending(&mut self) -> usize {
        let mut discarded = usize::from(self.sending.take().is_some());
        while self.shared.pop().is_some() {
            discarded += 1;
        }
        discarded
    }
}

impl<T: Transport> Connection<T> {
    /// Shuts the socket down and marks the connection closed. Dispatched work
    /// is not cancelled; its responses are discarded when they arrive.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown() {
                trace!(conn = %self.id, error = %e, "shutdown on close failed");
            }
        }
        debug!(
            conn = %self.id,
            outstanding = self.shared.outstanding(),
            "Connection closed"
        );
    }

    /// Logs why the connection ended and closes it.
    pub(crate) fn fail(&mut self, error: ConnectionError) {
        match &error {
            ConnectionError::ClientDisconnected => {
                debug!(conn = %self.id, "Client disconnected")
            }
            ConnectionError::IoError(io_err)
                if matches!(
                    io_err.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
                ) =>
            {
                debug!(conn = %self.id, error = %io_err, "Connection reset by client")
            }
            _ => warn!(conn = %self.id, error = %error, "Connection error"),
        }
        self.close();
    }

    /// Writes queued responses until the queue is empty or the socket would
    /// block. A partially written response stays in flight for the next step.
    pub(crate) fn flush(&mut self, stats: &ServerStats) -> Result<(), ConnectionError> {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return Ok(()),
        };

        while self.shared.outstanding() > 0 {
            if self.sending.is_none() {
                self.sending = self.shared.pop();
            }

            let response = match self.sending.as_mut() {
                Some(response) => response,
                // Dispatched work has not produced a response yet
                None => return Ok(()),
            };

            if !response.is_complete() {
                match transport.write(response.remaining()) {
                    Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                    Ok(n) => {
                        response.advance(n);
                        stats.bytes_written(n);
                        trace!(conn = %self.id, bytes = n, "Wrote response bytes");
                    }
                    Err(e) if is_transient(&e) => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }

            if response.is_complete() {
                // Dropping the response releases its ticket
                self.sending = None;
                stats.response_sent();
            }
        }

        Ok(())
    }

    /// Performs one read and dispatches every complete frame now buffered.
    pub(crate) fn receive<P, D>(
        &mut self,
        parser: &mut P,
        dispatcher: &mut D,
        stats: &ServerStats,
    ) -> Result<(), ConnectionError>
    where
        P: FrameParser,
        D: Dispatcher,
    {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return Ok(()),
        };

        debug_assert!(self.recv_len < self.recv_buf.len());

        let n = match transport.read(&mut self.recv_buf[self.recv_len..]) {
            Ok(0) => return Err(ConnectionError::ClientDisconnected),
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        self.recv_len += n;
        stats.bytes_read(n);
        trace!(conn = %self.id, bytes = n, buffered = self.recv_len, "Read data");

        self.drain_frames(parser, dispatcher, stats)?;

        if self.recv_len == self.recv_buf.len() {
            return Err(ConnectionError::FrameTooLarge {
                capacity: self.recv_buf.len(),
            });
        }

        Ok(())
    }

    /// Parses and dispatches frames until the buffer holds no complete one,
    /// then moves the unparsed tail to the front of the buffer.
    fn drain_frames<P, D>(
        &mut self,
        parser: &mut P,
        dispatcher: &mut D,
        stats: &ServerStats,
    ) -> Result<(), ConnectionError>
    where
        P: FrameParser,
        D: Dispatcher,
    {
        let mut start = 0;
        let result = loop {
            if start == self.recv_len {
                break Ok(());
            }

            let pending = &self.recv_buf[start..self.recv_len];
            let (frame, consumed) = match parser.parse(pending) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => {
                    trace!(
                        conn = %self.id,
                        buffered = pending.len(),
                        "Incomplete frame, need more data"
                    );
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            };

            if consumed == 0 || consumed > pending.len() {
                break Err(ParseError::Malformed(format!(
                    "parser consumed {} of {} buffered bytes",
                    consumed,
                    pending.len()
                ))
                .into());
            }

            start += consumed;
            self.dispatch(frame, dispatcher, stats);
        };

        if start > 0 {
            self.recv_buf.copy_within(start..self.recv_len, 0);
            self.recv_len -= start;
        }

        result
    }

    fn dispatch<D: Dispatcher>(&self, frame: Frame, dispatcher: &mut D, stats: &ServerStats) {
        let ticket = Ticket::issue(&self.shared);
        stats.request_dispatched();

        match frame {
            Frame::Call(call) => {
                trace!(conn = %self.id, method = %call.method, "Dispatching request");
                dispatcher.dispatch(Request::new(self.id, call, ticket));
            }
            Frame::Reject { id, error } => {
                debug!(conn = %self.id, error = %error, "Rejected request");
                request::reject(ticket, id, &error);
            }
        }
    }
}

impl<T> Drop for Connection<T> {
    fn drop(&mut self) {
        self.sending = None;
        self.shared.detach();
    }
}
