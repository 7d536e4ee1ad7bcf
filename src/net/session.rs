//! Connected endpoint shared by the server and client roles.
//!
//! A [`Session`] owns the connected [`SocketHandle`] exclusively and moves
//! through `Connected -> Exchanging -> Closed`. Received data lands in a
//! fixed [`Message`] buffer that is zero-terminated after every read.

use crate::error::{NetError, Result};
use crate::net::handle::SocketHandle;
use crate::protocol::{END_MESSAGE, MAX_PAYLOAD, RECV_BUFFER_SIZE};
use std::borrow::Cow;
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake complete, no data moved yet.
    Connected,
    /// At least one send or receive has been issued.
    Exchanging,
    /// Handle released.
    Closed,
}

/// Fixed-capacity receive buffer plus the length of the last read.
#[derive(Clone)]
pub struct Message {
    buf: [u8; RECV_BUFFER_SIZE],
    len: usize,
}

impl Message {
    pub fn new() -> Self {
        Self {
            buf: [0u8; RECV_BUFFER_SIZE],
            len: 0,
        }
    }

    /// Bytes received by the last read.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the last read was exactly the termination sentinel.
    ///
    /// Compares the received length only, never stale bytes past it.
    pub fn is_sentinel(&self) -> bool {
        self.payload() == END_MESSAGE
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.payload())
    }

    fn fill(&mut self, handle: &SocketHandle) -> Result<usize> {
        let result = handle.recv(&mut self.buf[..MAX_PAYLOAD]);
        self.len = *result.as_ref().unwrap_or(&0);
        self.buf[self.len] = 0;
        result
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len)
            .field("payload", &self.as_text())
            .finish()
    }
}

/// A connected stream between two endpoints.
#[derive(Debug)]
pub struct Session {
    handle: SocketHandle,
    peer: SocketAddr,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(handle: SocketHandle, peer: SocketAddr) -> Self {
        Self {
            handle,
            peer,
            state: SessionState::Connected,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Send `bytes` in one call. A short write is fatal.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        self.state = self.exchanging();
        let written = self.handle.send(bytes)?;
        if written != bytes.len() {
            return Err(NetError::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        trace!(peer = %self.peer, bytes = written, "Sent");
        Ok(written)
    }

    /// Send `bytes`, continuing after short writes until everything is out.
    pub fn send_all(&mut self, bytes: &[u8]) -> Result<usize> {
        self.state = self.exchanging();
        let mut written = 0;
        while written < bytes.len() {
            match self.handle.send(&bytes[written..])? {
                0 => {
                    return Err(NetError::ShortWrite {
                        written,
                        expected: bytes.len(),
                    })
                }
                n => written += n,
            }
        }
        trace!(peer = %self.peer, bytes = written, "Sent");
        Ok(written)
    }

    /// Read at most [`MAX_PAYLOAD`] bytes into `message`.
    ///
    /// `Ok(0)` is orderly shutdown by the peer and is not an error.
    pub fn receive(&mut self, message: &mut Message) -> Result<usize> {
        self.state = self.exchanging();
        let n = message.fill(&self.handle)?;
        if n == 0 {
            debug!(peer = %self.peer, "Peer shut down");
        } else {
            trace!(peer = %self.peer, bytes = n, "Received");
        }
        Ok(n)
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.handle.release() {
            debug!(peer = %self.peer, "Session closed");
        }
        self.state = SessionState::Closed;
    }

    fn exchanging(&self) -> SessionState {
        match self.state {
            SessionState::Closed => SessionState::Closed,
            _ => SessionState::Exchanging,
        }
    }
}
