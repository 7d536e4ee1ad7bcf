//! The message exchange run over a connected [`Session`].
//!
//! ```text
//! client                      server
//!   hello          ------>
//!                  <------    OK
//!   END_MESSAGE    ------>    (loop ends, no reply)
//! ```
//!
//! There is no framing: every read is treated as one message, bounded by
//! [`MAX_PAYLOAD`]. The server acknowledges each ordinary message with
//! [`ACK`] and stops on [`END_MESSAGE`] or when the peer shuts down.

use crate::error::Result;
use crate::net::{Message, Session};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Termination sentinel. Received as a whole payload it ends the loop.
pub const END_MESSAGE: &[u8] = b"END_MESSAGE";

/// Acknowledgement sent for every non-terminal message.
pub const ACK: &[u8] = b"OK";

/// Client's default opening payload.
pub const HELLO: &[u8] = b"hello";

/// Receive buffer size, including room for the terminator.
pub const RECV_BUFFER_SIZE: usize = 64;

/// Largest payload a single receive returns.
pub const MAX_PAYLOAD: usize = RECV_BUFFER_SIZE - 1;

/// Pending-connection queue depth for the listener.
pub const DEFAULT_BACKLOG: i32 = 2;

/// Service port used by default on both sides.
pub const DEFAULT_PORT: &str = "20453";

/// How a send handles the OS accepting fewer bytes than asked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SendPolicy {
    /// A short write is a `ShortWrite` error.
    #[default]
    FailFast,
    /// Keep writing the remainder until everything is sent.
    WriteAll,
}

impl SendPolicy {
    pub fn send(self, session: &mut Session, bytes: &[u8]) -> Result<usize> {
        match self {
            SendPolicy::FailFast => session.send(bytes),
            SendPolicy::WriteAll => session.send_all(bytes),
        }
    }
}

/// Why the server loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The peer sent `END_MESSAGE`.
    Sentinel,
    /// The peer closed the connection (zero-length read).
    PeerShutdown,
}

/// Counters from one run of the server loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    pub messages_received: usize,
    pub acks_sent: usize,
    pub termination: Termination,
}

/// Server loop: acknowledge every message until the sentinel or shutdown.
///
/// A receive or send failure ends the loop with that error.
pub fn serve(session: &mut Session, policy: SendPolicy) -> Result<ServeSummary> {
    let mut message = Message::new();
    let mut messages_received = 0;
    let mut acks_sent = 0;

    let termination = loop {
        if session.receive(&mut message)? == 0 {
            break Termination::PeerShutdown;
        }
        messages_received += 1;
        info!(peer = %session.peer_addr(), payload = %message.as_text(), "Server received");

        if message.is_sentinel() {
            break Termination::Sentinel;
        }

        policy.send(session, ACK)?;
        acks_sent += 1;
    };

    debug!(
        peer = %session.peer_addr(),
        messages_received,
        acks_sent,
        termination = ?termination,
        "Server loop finished"
    );

    Ok(ServeSummary {
        messages_received,
        acks_sent,
        termination,
    })
}

/// Client sequence: send each payload and read one reply, then send the
/// sentinel without waiting for an answer.
///
/// Replies are returned in order. A reply is not required to equal `ACK`;
/// an empty reply means the server had already shut down.
pub fn converse(
    session: &mut Session,
    messages: &[Bytes],
    policy: SendPolicy,
) -> Result<Vec<Bytes>> {
    let mut replies = Vec::with_capacity(messages.len());
    let mut message = Message::new();

    for payload in messages {
        policy.send(session, payload)?;
        if session.receive(&mut message)? == 0 {
            warn!(peer = %session.peer_addr(), "Server closed before replying");
        } else {
            info!(peer = %session.peer_addr(), payload = %message.as_text(), "Client received");
        }
        replies.push(Bytes::copy_from_slice(message.payload()));
    }

    policy.send(session, END_MESSAGE)?;
    debug!(peer = %session.peer_addr(), "Sent termination sentinel");
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{connect, Listener, ResolvedAddress};
    use std::thread;

    fn pair() -> (Session, Session) {
        let mut listener = Listener::bind_and_listen(
            &ResolvedAddress {
                addr: "127.0.0.1:0".parse().unwrap(),
                protocol: libc::IPPROTO_TCP,
            },
            DEFAULT_BACKLOG,
        )
        .unwrap();
        let client = connect(&ResolvedAddress {
            addr: listener.local_addr().unwrap(),
            protocol: libc::IPPROTO_TCP,
        })
        .unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn test_wire_constants() {
        assert_eq!(END_MESSAGE.len(), 11);
        assert_eq!(ACK.len(), 2);
        assert_eq!(HELLO.len(), 5);
        assert_eq!(MAX_PAYLOAD, 63);
    }

    #[test]
    fn test_serve_and_converse() {
        let (mut server, mut client) = pair();
        let server_thread = thread::spawn(move || serve(&mut server, SendPolicy::FailFast));

        let replies = converse(
            &mut client,
            &[Bytes::from_static(HELLO)],
            SendPolicy::FailFast,
        )
        .unwrap();
        assert_eq!(replies, vec![Bytes::from_static(ACK)]);

        let summary = server_thread.join().unwrap().unwrap();
        assert_eq!(
            summary,
            ServeSummary {
                messages_received: 2,
                acks_sent: 1,
                termination: Termination::Sentinel,
            }
        );
    }

    #[test]
    fn test_serve_multiple_messages_write_all() {
        let (mut server, mut client) = pair();
        let server_thread = thread::spawn(move || serve(&mut server, SendPolicy::WriteAll));

        let messages = [
            Bytes::from_static(b"one"),
            Bytes::from_static(b"two"),
            Bytes::from_static(b"three"),
        ];
        let replies = converse(&mut client, &messages, SendPolicy::WriteAll).unwrap();
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().all(|r| r.as_ref() == ACK));

        let summary = server_thread.join().unwrap().unwrap();
        assert_eq!(summary.acks_sent, 3);
        assert_eq!(summary.termination, Termination::Sentinel);
    }

    #[test]
    fn test_serve_peer_shutdown() {
        let (mut server, mut client) = pair();
        client.close();

        let summary = serve(&mut server, SendPolicy::FailFast).unwrap();
        assert_eq!(summary.messages_received, 0);
        assert_eq!(summary.acks_sent, 0);
        assert_eq!(summary.termination, Termination::PeerShutdown);
    }

    #[test]
    fn test_send_policy_parsing() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: SendPolicy,
        }
        let w: Wrapper = toml::from_str(r#"policy = "write-all""#).unwrap();
        assert_eq!(w.policy, SendPolicy::WriteAll);
        let w: Wrapper = toml::from_str(r#"policy = "fail-fast""#).unwrap();
        assert_eq!(w.policy, SendPolicy::FailFast);
    }
}
