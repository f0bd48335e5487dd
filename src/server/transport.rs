//! Socket abstractions for the reactor.
//!
//! The poll step only needs two things from the outside world: a way to
//! accept peers without blocking and a byte stream per peer. Both are traits
//! so the reactor can run over TCP, Unix sockets, or an in-memory transport.

use crate::server::ServerError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tracing::debug;

/// A non-blocking byte stream to one peer.
pub trait Transport: Read + Write {
    /// Shuts down both directions. Called once, when the connection closes.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for UnixStream {
    fn shutdown(&mut self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// A non-blocking source of new peers.
pub trait Acceptor {
    type Stream: Transport;

    /// Accepts one pending peer. Must return `WouldBlock` when none is
    /// waiting; returned streams must already be non-blocking.
    fn accept(&mut self) -> io::Result<(Self::Stream, Option<SocketAddr>)>;
}

/// Would-block and interrupted calls are retried on the next poll step.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Non-blocking TCP listener.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    nodelay: bool,
}

impl TcpAcceptor {
    /// Creates a listening socket with `SO_REUSEADDR` and the given backlog.
    pub fn bind(addr: SocketAddr, backlog: u32, nodelay: bool) -> Result<Self, ServerError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| ServerError::Socket { source })?;
        socket
            .set_reuse_address(true)
            .map_err(|source| ServerError::Socket { source })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| ServerError::NonBlocking { source })?;
        socket
            .bind(&addr.into())
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        socket
            .listen(backlog)
            .map_err(|source| ServerError::Listen { source })?;

        Ok(Self {
            listener: socket.into(),
            nodelay,
        })
    }

    /// Wraps an already bound listener, switching it to non-blocking mode.
    pub fn from_std(listener: TcpListener, nodelay: bool) -> Result<Self, ServerError> {
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::NonBlocking { source })?;
        Ok(Self { listener, nodelay })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Acceptor for TcpAcceptor {
    type Stream = TcpStream;

    fn accept(&mut self) -> io::Result<(TcpStream, Option<SocketAddr>)> {
        // A stream that fails configuration is dropped here, closing it.
        let (stream, addr) = self.listener.accept()?;
        stream.set_nonblocking(true)?;
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        Ok((stream, Some(addr)))
    }
}

/// Non-blocking Unix domain socket listener. The socket file is removed
/// when the acceptor is dropped.
#[cfg(unix)]
#[derive(Debug)]
pub struct UnixAcceptor {
    listener: UnixListener,
    path: PathBuf,
}

#[cfg(unix)]
impl UnixAcceptor {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref().to_path_buf();
        let listener = UnixListener::bind(&path).map_err(|source| ServerError::Bind {
            addr: path.display().to_string(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::NonBlocking { source })?;
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Acceptor for UnixAcceptor {
    type Stream = UnixStream;

    fn accept(&mut self) -> io::Result<(UnixStream, Option<SocketAddr>)> {
        let (stream, _) = self.listener.accept()?;
        stream.set_nonblocking(true)?;
        Ok((stream, None))
    }
}

#[cfg(unix)]
impl Drop for UnixAcceptor {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "failed to remove socket file");
        }
    }
}
