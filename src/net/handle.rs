//! Owned socket descriptor with at-most-once release.
//!
//! A [`SocketHandle`] is either open (wrapping one OS socket) or released.
//! Release happens explicitly through [`SocketHandle::release`] or when the
//! handle is dropped, whichever comes first; the descriptor is closed once
//! and the handle stays released. Every I/O call on a released handle fails
//! with [`NetError::ClosedHandle`].
//!
//! When several handles are held in one scope they are dropped in reverse
//! declaration order, so an accepted connection declared after its listening
//! socket is always closed first.

use crate::error::{NetError, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::trace;

/// An owned OS socket, or the released sentinel state.
#[derive(Debug)]
pub struct SocketHandle {
    socket: Option<Socket>,
}

impl SocketHandle {
    /// Create a new socket.
    pub fn acquire(domain: Domain, ty: Type, protocol: Option<Protocol>) -> Result<Self> {
        let socket = Socket::new(domain, ty, protocol).map_err(NetError::SocketCreate)?;
        trace!(fd = socket.as_raw_fd(), "Socket acquired");
        Ok(Self::from_socket(socket))
    }

    fn from_socket(socket: Socket) -> Self {
        Self {
            socket: Some(socket),
        }
    }

    /// Whether the handle still owns a descriptor.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// The owned descriptor, if not yet released.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }

    fn socket(&self, op: &'static str) -> Result<&Socket> {
        self.socket.as_ref().ok_or(NetError::ClosedHandle { op })
    }

    fn socket_io(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "handle released"))
    }

    pub fn bind(&self, addr: SocketAddr) -> Result<()> {
        self.socket("bind")?
            .bind(&addr.into())
            .map_err(|source| NetError::Bind { addr, source })
    }

    pub fn listen(&self, backlog: i32) -> Result<()> {
        self.socket("listen")?
            .listen(backlog)
            .map_err(|source| NetError::Listen { backlog, source })
    }

    /// Block until a peer connects; the returned handle is distinct from
    /// this one.
    pub fn accept(&self) -> Result<(SocketHandle, SocketAddr)> {
        let socket = self.socket("accept")?;
        let (conn, peer) = loop {
            match socket.accept() {
                Ok(accepted) => break accepted,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetError::Accept(e)),
            }
        };
        // Wrap first so the descriptor is closed if the peer address is unusable.
        let conn = SocketHandle::from_socket(conn);
        let peer = peer.as_socket().ok_or_else(|| {
            NetError::Accept(io::Error::new(
                io::ErrorKind::InvalidData,
                "peer address is not an inet address",
            ))
        })?;
        trace!(fd = ?conn.raw_fd(), peer = %peer, "Connection accepted");
        Ok((conn, peer))
    }

    pub fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.socket("connect")?
            .connect(&addr.into())
            .map_err(|source| NetError::Connect { addr, source })
    }

    /// Single send call; returns the number of bytes the OS accepted.
    pub fn send(&self, bytes: &[u8]) -> Result<usize> {
        self.socket("send")?.send(bytes).map_err(NetError::Send)
    }

    /// Single read call; `Ok(0)` is orderly shutdown by the peer.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut socket = self.socket("receive")?;
        loop {
            match socket.read(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetError::Receive(e)),
            }
        }
    }

    /// Allow rebinding a port that still has connections in TIME_WAIT.
    pub fn set_reuse_address(&self) -> io::Result<()> {
        self.socket_io()?.set_reuse_address(true)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket_io()?.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "local address is not an inet address")
        })
    }

    /// Close the descriptor. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        match self.socket.take() {
            Some(socket) => {
                trace!(fd = socket.as_raw_fd(), "Socket released");
                drop(socket);
                true
            }
            None => false,
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.release();
    }
}
