//! Requests, Responses and the Outbound Queue
//!
//! A [`Request`] is handed to the dispatcher for every call frame. It owns a
//! ticket that keeps its connection's outstanding-request count raised until
//! the response is fully written to the peer or thrown away.
//!
//! ```text
//!   reactor thread                     any thread
//!   ──────────────                     ──────────
//!   parse frame
//!   Ticket::issue  (outstanding += 1)
//!   dispatcher.dispatch(request) ────> request.respond(value)
//!                                          │ encode payload
//!                                          ▼
//!   ┌───────────────────────────────────────────────┐
//!   │ SlotShared::queue  (Mutex<VecDeque<Response>>)│
//!   └───────────────────────────────────────────────┘
//!          │ pop (poll step)
//!          ▼
//!   in-flight Response ── write ── write ── done ── drop (outstanding -= 1)
//! ```
//!
//! The queue and the counter are the only connection state touched from
//! outside the reactor thread.

use crate::protocol::types::{encode_error, encode_result, Call, RpcError};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Initial outbound queue capacity reserved for every slot.
const QUEUE_CAPACITY: usize = 16;

/// Identifies one connection: the pool slot plus the generation stamped on it
/// when the peer was accepted. Slots are reused, generations are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub slot: usize,
    pub generation: u64,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// The cross-thread half of a connection slot. Allocated once per slot and
/// reused for every connection that occupies it.
#[derive(Debug)]
pub(crate) struct SlotShared {
    queue: Mutex<Outbound>,
    outstanding: AtomicUsize,
}

#[derive(Debug)]
struct Outbound {
    responses: VecDeque<Response>,
    /// Set once the owning slot is gone; later pushes are dropped.
    detached: bool,
}

impl SlotShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(Outbound {
                responses: VecDeque::with_capacity(QUEUE_CAPACITY),
                detached: false,
            }),
            outstanding: AtomicUsize::new(0),
        })
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn push(&self, response: Response) {
        let rejected = {
            let mut queue = self.queue.lock();
            if queue.detached {
                Some(response)
            } else {
                queue.responses.push_back(response);
                None
            }
        };
        drop(rejected);
    }

    pub(crate) fn pop(&self) -> Option<Response> {
        self.queue.lock().responses.pop_front()
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queue.lock().responses.is_empty()
    }

    /// Drops everything queued and refuses further responses. Queued
    /// responses keep this struct alive, so this must run before the slot
    /// itself is dropped.
    pub(crate) fn detach(&self) -> usize {
        let drained: Vec<Response> = {
            let mut queue = self.queue.lock();
            queue.detached = true;
            queue.responses.drain(..).collect()
        };
        drained.len()
    }
}

/// Accounts for one dispatched frame. Dropping the ticket marks the frame
/// as finished, so the count can never go negative or be decremented twice.
#[derive(Debug)]
pub(crate) struct Ticket {
    shared: Arc<SlotShared>,
}

impl Ticket {
    pub(crate) fn issue(shared: &Arc<SlotShared>) -> Self {
        shared.outstanding.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let previous = self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "outstanding request count underflow");
    }
}

/// A serialized response waiting in the queue or being written.
#[derive(Debug)]
pub(crate) struct Response {
    payload: Bytes,
    offset: usize,
    _ticket: Ticket,
}

impl Response {
    fn new(payload: Bytes, ticket: Ticket) -> Self {
        Self {
            payload,
            offset: 0,
            _ticket: ticket,
        }
    }

    /// Bytes not yet written.
    pub(crate) fn remaining(&self) -> &[u8] {
        &self.payload[self.offset..]
    }

    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.payload.len() - self.offset);
        self.offset = (self.offset + n).min(self.payload.len());
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.offset == self.payload.len()
    }
}

/// A call dispatched from a connection, waiting for its response.
///
/// Completing it with one of the `respond*` methods queues the response on
/// the originating connection; it is safe to do so from any thread. Dropping
/// it (or calling [`release`](Request::release)) finishes it without a
/// response.
///
/// Responses to notifications are never sent.
#[derive(Debug)]
pub struct Request {
    connection: ConnectionId,
    call: Call,
    ticket: Ticket,
}

impl Request {
    pub(crate) fn new(connection: ConnectionId, call: Call, ticket: Ticket) -> Self {
        Self {
            connection,
            call,
            ticket,
        }
    }

    /// The connection this request arrived on.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn method(&self) -> &str {
        &self.call.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.call.params.as_ref()
    }

    /// Moves the parameters out, leaving `None` behind.
    pub fn take_params(&mut self) -> Option<Value> {
        self.call.params.take()
    }

    pub fn id(&self) -> Option<&Value> {
        self.call.id.as_ref()
    }

    pub fn is_notification(&self) -> bool {
        self.call.is_notification()
    }

    /// Queues a success response carrying `result`.
    pub fn respond(self, result: Value) {
        match self.call.id.as_ref() {
            Some(id) => {
                let payload = encode_result(id, &result);
                self.submit(payload);
            }
            None => self.release(),
        }
    }

    /// Queues an error response.
    pub fn respond_error(self, error: impl Into<RpcError>) {
        match self.call.id.as_ref() {
            Some(id) => {
                let payload = encode_error(id, &error.into());
                self.submit(payload);
            }
            None => self.release(),
        }
    }

    /// Queues a pre-serialized payload, written to the peer verbatim. Unlike
    /// the other `respond*` methods this sends even for notifications.
    pub fn respond_raw(self, payload: impl Into<Bytes>) {
        self.submit(payload.into());
    }

    /// Finishes the request without sending anything.
    pub fn release(self) {
        drop(self);
    }

    fn submit(self, payload: Bytes) {
        let Request { ticket, .. } = self;
        let shared = Arc::clone(&ticket.shared);
        shared.push(Response::new(payload, ticket));
    }
}

/// Queues an error response for a frame the dispatcher never sees. The id is
/// `null` when the frame did not carry a usable one.
pub(crate) fn reject(ticket: Ticket, id: Option<Value>, error: &RpcError) {
    let payload = encode_error(id.as_ref().unwrap_or(&Value::Null), error);
    let shared = Arc::clone(&ticket.shared);
    shared.push(Response::new(payload, ticket));
}
