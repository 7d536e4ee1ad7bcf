//! Error types for the exchange protocol.
//!
//! Every variant names the step that failed and keeps the OS status that
//! caused it. There are no retries: any error ends the current role's
//! attempt, and the resources it held are released as the error unwinds.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised by resolution, socket setup, and the message exchange.
#[derive(Debug, Error)]
pub enum NetError {
    /// Name or service lookup returned a non-zero status.
    #[error("resolve {host}:{port} failed with status {code}: {message}")]
    Resolution {
        host: String,
        port: String,
        code: i32,
        message: String,
    },

    /// Lookup succeeded but produced no usable stream address.
    #[error("resolve {host}:{port} returned no usable address")]
    NoAddress { host: String, port: String },

    #[error("socket creation failed: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listen (backlog {backlog}) failed: {source}")]
    Listen {
        backlog: i32,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// The OS accepted fewer bytes than requested.
    #[error("short write: {written} of {expected} bytes sent")]
    ShortWrite { written: usize, expected: usize },

    /// A read failed. Orderly shutdown is never reported through this.
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("{op} on a released socket handle")]
    ClosedHandle { op: &'static str },
}

impl NetError {
    /// Name of the protocol step that failed.
    pub fn step(&self) -> &'static str {
        match self {
            NetError::Resolution { .. } | NetError::NoAddress { .. } => "resolve",
            NetError::SocketCreate(_) => "socket",
            NetError::Bind { .. } => "bind",
            NetError::Listen { .. } => "listen",
            NetError::Accept(_) => "accept",
            NetError::Connect { .. } => "connect",
            NetError::Send(_) | NetError::ShortWrite { .. } => "send",
            NetError::Receive(_) => "receive",
            NetError::ClosedHandle { .. } => "closed-handle",
        }
    }

    /// Underlying OS or resolver status, when there is one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            NetError::Resolution { code, .. } => Some(*code),
            NetError::SocketCreate(e)
            | NetError::Bind { source: e, .. }
            | NetError::Listen { source: e, .. }
            | NetError::Accept(e)
            | NetError::Connect { source: e, .. }
            | NetError::Send(e)
            | NetError::Receive(e) => e.raw_os_error(),
            NetError::NoAddress { .. }
            | NetError::ShortWrite { .. }
            | NetError::ClosedHandle { .. } => None,
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names() {
        let err = NetError::ShortWrite {
            written: 1,
            expected: 5,
        };
        assert_eq!(err.step(), "send");
        assert_eq!(err.os_code(), None);

        let err = NetError::Receive(io::Error::from_raw_os_error(libc::ECONNRESET));
        assert_eq!(err.step(), "receive");
        assert_eq!(err.os_code(), Some(libc::ECONNRESET));

        let err = NetError::ClosedHandle { op: "send" };
        assert_eq!(err.step(), "closed-handle");
        assert_eq!(err.to_string(), "send on a released socket handle");
    }

    #[test]
    fn test_resolution_carries_status() {
        let err = NetError::Resolution {
            host: "localhost".to_string(),
            port: "nope".to_string(),
            code: libc::EAI_SERVICE,
            message: "Servname not supported".to_string(),
        };
        assert_eq!(err.step(), "resolve");
        assert_eq!(err.os_code(), Some(libc::EAI_SERVICE));
        assert!(err.to_string().contains("localhost:nope"));
    }
}
