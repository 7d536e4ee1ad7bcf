//! Server and client roles, and a runner that pairs them on two threads.
//!
//! Each role resolves its endpoint, uses the first resolved address, runs
//! its half of the exchange, and releases everything it acquired on every
//! exit path. Roles share no state; the only coordination is the readiness
//! callback the server fires once it is listening.

use crate::error::Result;
use crate::net::{self, reachable, resolve, Endpoint, Listener, Purpose, ResolvedAddress};
use crate::protocol::{self, SendPolicy, Termination, DEFAULT_BACKLOG, DEFAULT_PORT, HELLO};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info, warn};

/// Outcome of a completed server role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReport {
    pub local: SocketAddr,
    pub peer: SocketAddr,
    pub messages_received: usize,
    pub acks_sent: usize,
    pub termination: Termination,
}

/// Outcome of a completed client role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    pub server: SocketAddr,
    /// One reply per non-sentinel message, in send order.
    pub replies: Vec<Bytes>,
}

/// Binds, listens, accepts one peer, and serves it until the sentinel.
#[derive(Debug, Clone)]
pub struct ServerRole {
    pub endpoint: Endpoint,
    pub backlog: i32,
    pub policy: SendPolicy,
}

impl Default for ServerRole {
    fn default() -> Self {
        Self::new(Endpoint::local(DEFAULT_PORT))
    }
}

impl ServerRole {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            backlog: DEFAULT_BACKLOG,
            policy: SendPolicy::default(),
        }
    }

    pub fn run(&self) -> Result<ServerReport> {
        self.run_notify(|_| {})
    }

    /// Run the server, calling `on_listening` with the bound address after
    /// listen succeeds and before `accept` blocks.
    pub fn run_notify<F>(&self, on_listening: F) -> Result<ServerReport>
    where
        F: FnOnce(SocketAddr),
    {
        let addrs = resolve(&self.endpoint, Purpose::Bind)?;
        let mut listener = Listener::bind_and_listen(&addrs[0], self.backlog)?;
        let local = listener.local_addr().unwrap_or(addrs[0].addr);
        on_listening(local);

        // Declared after the listener so an early return drops it first.
        let (mut session, peer) = listener.accept()?;
        let summary = protocol::serve(&mut session, self.policy)?;

        session.close();
        listener.close();

        info!(
            peer = %peer,
            messages = summary.messages_received,
            acks = summary.acks_sent,
            termination = ?summary.termination,
            "Server role finished"
        );
        Ok(ServerReport {
            local,
            peer,
            messages_received: summary.messages_received,
            acks_sent: summary.acks_sent,
            termination: summary.termination,
        })
    }
}

/// Connects, sends its payloads and the sentinel, then disconnects.
#[derive(Debug, Clone)]
pub struct ClientRole {
    pub endpoint: Endpoint,
    /// Sent in order before the sentinel; empty sends the sentinel first.
    pub messages: Vec<Bytes>,
    pub policy: SendPolicy,
}

impl Default for ClientRole {
    fn default() -> Self {
        Self::new(Endpoint::local(DEFAULT_PORT))
    }
}

impl ClientRole {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            messages: vec![Bytes::from_static(HELLO)],
            policy: SendPolicy::default(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<Bytes>) -> Self {
        self.messages = messages;
        self
    }

    pub fn run(&self) -> Result<ClientReport> {
        let addrs = resolve(&self.endpoint, Purpose::Connect)?;
        let mut session = net::connect(&addrs[0])?;
        let replies = protocol::converse(&mut session, &self.messages, self.policy)?;
        session.close();

        info!(server = %session.peer_addr(), replies = replies.len(), "Client role finished");
        Ok(ClientReport {
            server: session.peer_addr(),
            replies,
        })
    }
}

/// Results of [`run_pair`]; each role reports only its own outcome.
#[derive(Debug)]
pub struct PairOutcome {
    pub server: Result<ServerReport>,
    /// `None` when the server failed before it started listening, so the
    /// client never ran.
    pub client: Option<Result<ClientReport>>,
}

/// Connect to a server listening on `addr` and hang up at once.
///
/// A server role blocked in `accept` then sees an orderly shutdown and
/// returns. Connection failures are logged and otherwise ignored.
pub fn wake_server(addr: SocketAddr) {
    let target = ResolvedAddress {
        addr: reachable(addr),
        protocol: libc::IPPROTO_TCP,
    };
    match net::connect(&target) {
        Ok(mut session) => session.close(),
        Err(e) => warn!(addr = %target.addr, error = %e, "Could not wake server"),
    }
}

/// Run both roles on their own threads.
///
/// The client starts only after the server signals it is listening, and is
/// pointed at the server's bound address (loopback when bound to a
/// wildcard). If the client fails, the server is woken with
/// [`wake_server`] so the join below cannot block forever.
pub fn run_pair(server: ServerRole, client: ClientRole) -> io::Result<PairOutcome> {
    let (ready_tx, ready_rx) = mpsc::channel::<SocketAddr>();

    let server_handle = thread::Builder::new()
        .name("server".to_string())
        .spawn(move || {
            server.run_notify(move |addr| {
                // The client thread may already be gone; nothing to do then.
                let _ = ready_tx.send(addr);
            })
        })?;

    let client_handle = thread::Builder::new()
        .name("client".to_string())
        .spawn(move || {
            let addr = ready_rx.recv().ok()?;
            debug!(addr = %addr, "Server ready");
            let client = ClientRole {
                endpoint: Endpoint::reaching(addr),
                ..client
            };
            let result = client.run();
            if let Err(ref e) = result {
                debug!(addr = %addr, error = %e, "Client failed; waking server");
                wake_server(addr);
            }
            Some(result)
        })?;

    let server = server_handle
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "server thread panicked"))?;
    let client = client_handle
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "client thread panicked"))?;

    Ok(PairOutcome { server, client })
}
