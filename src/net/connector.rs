//! Client-side setup: connect to one resolved address.
//!
//! Single attempt, no retry across the rest of the resolved list.

use crate::error::Result;
use crate::net::handle::SocketHandle;
use crate::net::resolver::ResolvedAddress;
use crate::net::session::Session;
use socket2::Type;
use tracing::info;

/// Connect to `address`, blocking until the handshake completes or fails.
///
/// On failure the socket created for the attempt is released before the
/// error is returned.
pub fn connect(address: &ResolvedAddress) -> Result<Session> {
    let handle = SocketHandle::acquire(address.domain(), Type::STREAM, address.protocol())?;
    handle.connect(address.addr)?;
    info!(peer = %address.addr, "Connected");
    Ok(Session::new(handle, address.addr))
}
