//! In-memory transport for driving the server without sockets.

#![allow(dead_code)]

use parking_lot::Mutex;
use pollrpc::{Acceptor, Dispatcher, Request, Transport};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

/// Both ends of one in-memory connection.
#[derive(Default)]
struct Pipe {
    /// Chunks sent by the client; each read returns at most one chunk
    inbound: VecDeque<Vec<u8>>,
    /// Client has closed its write side
    eof: bool,
    /// Bytes written by the server
    outbound: Vec<u8>,
    /// Bytes the server may write per poll step; `None` is unlimited
    write_budget_per_step: Option<usize>,
    write_budget: usize,
    /// Reads attempted by the server, including ones that would block
    reads: usize,
    shutdowns: usize,
    /// One-shot error returned by the next read
    read_error: Option<io::ErrorKind>,
    /// One-shot result of the next write
    write_fault: Option<WriteFault>,
}

#[derive(Clone, Copy)]
enum WriteFault {
    Error(io::ErrorKind),
    Zero,
}

/// Server side of a [`Pipe`].
pub struct MockStream {
    pipe: Arc<Mutex<Pipe>>,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.lock();
        pipe.reads += 1;
        // Reads follow the flush in every poll step, so this starts a new budget
        if let Some(budget) = pipe.write_budget_per_step {
            pipe.write_budget = budget;
        }
        if let Some(kind) = pipe.read_error.take() {
            return Err(kind.into());
        }

        match pipe.inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    pipe.inbound.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if pipe.eof => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.lock();
        match pipe.write_fault.take() {
            Some(WriteFault::Error(kind)) => return Err(kind.into()),
            Some(WriteFault::Zero) => return Ok(0),
            None => {}
        }
        let n = match pipe.write_budget_per_step {
            Some(_) if pipe.write_budget == 0 => return Err(io::ErrorKind::WouldBlock.into()),
            Some(_) => {
                let n = pipe.write_budget.min(buf.len());
                pipe.write_budget -= n;
                n
            }
            None => buf.len(),
        };
        pipe.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockStream {
    fn shutdown(&mut self) -> io::Result<()> {
        self.pipe.lock().shutdowns += 1;
        Ok(())
    }
}

/// Client side of a [`Pipe`].
#[derive(Clone)]
pub struct MockClient {
    pipe: Arc<Mutex<Pipe>>,
}

impl MockClient {
    /// Queues `data` as a single chunk for the server's next read.
    pub fn send(&self, data: &[u8]) {
        self.pipe.lock().inbound.push_back(data.to_vec());
    }

    /// Signals EOF once every queued chunk has been read.
    pub fn close(&self) {
        self.pipe.lock().eof = true;
    }

    /// Limits the server to `bytes` written per poll step. Zero blocks
    /// writes entirely.
    pub fn limit_writes(&self, bytes: usize) {
        let mut pipe = self.pipe.lock();
        pipe.write_budget_per_step = Some(bytes);
        pipe.write_budget = bytes;
    }

    /// Makes the server's next read fail with `kind`.
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.pipe.lock().read_error = Some(kind);
    }

    /// Makes the server's next write fail with `kind`.
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.pipe.lock().write_fault = Some(WriteFault::Error(kind));
    }

    /// Makes the server's next write report zero bytes written.
    pub fn zero_next_write(&self) {
        self.pipe.lock().write_fault = Some(WriteFault::Zero);
    }

    pub fn unlimit_writes(&self) {
        self.pipe.lock().write_budget_per_step = None;
    }

    /// Everything the server has written so far.
    pub fn output(&self) -> Vec<u8> {
        self.pipe.lock().outbound.clone()
    }

    /// Complete response lines received so far, parsed as JSON.
    pub fn responses(&self) -> Vec<Value> {
        let output = self.output();
        output
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).expect("response is JSON"))
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.pipe.lock().reads
    }

    pub fn shutdowns(&self) -> usize {
        self.pipe.lock().shutdowns
    }
}

#[derive(Default)]
struct Backlog {
    pending: VecDeque<MockStream>,
    fail_next: Option<io::ErrorKind>,
}

/// Hands out connections created with [`MockAcceptor::connect`].
#[derive(Clone, Default)]
pub struct MockAcceptor {
    backlog: Arc<Mutex<Backlog>>,
}

impl MockAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a new connection and returns its client end.
    pub fn connect(&self) -> MockClient {
        let pipe = Arc::new(Mutex::new(Pipe::default()));
        self.backlog.lock().pending.push_back(MockStream {
            pipe: Arc::clone(&pipe),
        });
        MockClient { pipe }
    }

    /// Connections not yet accepted.
    pub fn pending(&self) -> usize {
        self.backlog.lock().pending.len()
    }

    /// Makes the next accept fail with `kind`.
    pub fn fail_next(&self, kind: io::ErrorKind) {
        self.backlog.lock().fail_next = Some(kind);
    }
}

impl Acceptor for MockAcceptor {
    type Stream = MockStream;

    fn accept(&mut self) -> io::Result<(MockStream, Option<SocketAddr>)> {
        let mut backlog = self.backlog.lock();
        if let Some(kind) = backlog.fail_next.take() {
            return Err(kind.into());
        }
        match backlog.pending.pop_front() {
            Some(stream) => Ok((stream, None)),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

/// Dispatcher that holds on to every request so the test decides when and
/// how each one completes.
#[derive(Default)]
pub struct Collector {
    pub requests: VecDeque<Request>,
}

impl Collector {
    pub fn take(&mut self) -> Request {
        self.requests.pop_front().expect("a dispatched request")
    }
}

impl Dispatcher for Collector {
    fn dispatch(&mut self, request: Request) {
        self.requests.push_back(request);
    }
}
