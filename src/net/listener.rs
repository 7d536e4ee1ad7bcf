//! Server-side setup: bind, listen, and accept a single connection.

use crate::error::{NetError, Result};
use crate::net::handle::SocketHandle;
use crate::net::resolver::ResolvedAddress;
use crate::net::session::Session;
use socket2::Type;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info};

/// Where the listener is in its setup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Bound,
    Listening,
    /// Blocked in `accept`.
    Accepting,
    /// The single expected peer has been accepted.
    Connected,
    Failed,
}

/// Listening socket that hands out exactly one [`Session`].
#[derive(Debug)]
pub struct Listener {
    handle: SocketHandle,
    address: SocketAddr,
    local_addr: Option<SocketAddr>,
    state: ListenerState,
}

impl Listener {
    /// Create the listening socket for `address`, not yet bound.
    pub fn open(address: &ResolvedAddress) -> Result<Self> {
        let handle = SocketHandle::acquire(address.domain(), Type::STREAM, address.protocol())?;
        Ok(Self {
            handle,
            address: address.addr,
            local_addr: None,
            state: ListenerState::Unbound,
        })
    }

    /// Open, bind, and listen in one step.
    pub fn bind_and_listen(address: &ResolvedAddress, backlog: i32) -> Result<Self> {
        let mut listener = Self::open(address)?;
        listener.bind()?;
        listener.listen(backlog)?;
        Ok(listener)
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Actual bound address, known once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn bind(&mut self) -> Result<()> {
        let addr = self.address;
        self.expect_state(ListenerState::Unbound, |source| NetError::Bind { addr, source })?;

        let result = self
            .handle
            .set_reuse_address()
            .map_err(|source| NetError::Bind { addr, source })
            .and_then(|_| self.handle.bind(addr));
        self.advance(result, ListenerState::Bound)?;
        debug!(addr = %addr, "Bound");
        Ok(())
    }

    /// Start queueing inbound connections; returns the bound local address.
    pub fn listen(&mut self, backlog: i32) -> Result<SocketAddr> {
        self.expect_state(ListenerState::Bound, |source| NetError::Listen {
            backlog,
            source,
        })?;

        let result = self.handle.listen(backlog).and_then(|_| {
            self.handle
                .local_addr()
                .map_err(|source| NetError::Listen { backlog, source })
        });
        let local = self.advance(result, ListenerState::Listening)?;
        self.local_addr = Some(local);
        info!(addr = %local, backlog, "Listening");
        Ok(local)
    }

    /// Block until one peer completes the handshake.
    pub fn accept(&mut self) -> Result<(Session, SocketAddr)> {
        self.expect_state(ListenerState::Listening, NetError::Accept)?;

        self.state = ListenerState::Accepting;
        let result = self.handle.accept();
        let (handle, peer) = self.advance(result, ListenerState::Connected)?;
        info!(peer = %peer, "Accepted connection");
        Ok((Session::new(handle, peer), peer))
    }

    /// Release the listening socket.
    pub fn close(&mut self) {
        if self.handle.release() {
            debug!(addr = ?self.local_addr, "Listener closed");
        }
    }

    fn expect_state(
        &mut self,
        expected: ListenerState,
        err: impl FnOnce(io::Error) -> NetError,
    ) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        let message = format!("listener is {:?}, expected {:?}", self.state, expected);
        self.state = ListenerState::Failed;
        Err(err(io::Error::new(io::ErrorKind::InvalidInput, message)))
    }

    fn advance<T>(&mut self, result: Result<T>, next: ListenerState) -> Result<T> {
        self.state = if result.is_ok() {
            next
        } else {
            ListenerState::Failed
        };
        result
    }
}
