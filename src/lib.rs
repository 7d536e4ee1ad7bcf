//! sentinel-wire: a minimal request/response exchange over stream sockets.
//!
//! The server binds, listens, and accepts a single peer, then acknowledges
//! every message with `OK` until the peer sends `END_MESSAGE` or hangs up.
//! The client connects, sends its payloads, reads one reply for each, and
//! finishes with `END_MESSAGE`.
//!
//! All socket calls block. Every descriptor is owned by a
//! [`net::SocketHandle`] and released exactly once on every exit path.

pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod roles;

pub use error::{NetError, Result};
pub use roles::{
    run_pair, wake_server, ClientReport, ClientRole, PairOutcome, ServerReport, ServerRole,
};
