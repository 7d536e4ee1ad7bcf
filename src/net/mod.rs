//! Blocking stream-socket plumbing.
//!
//! - `resolver`: `getaddrinfo` front end producing ordered candidate addresses
//! - `handle`: owned descriptor with at-most-once release
//! - `listener`: bind/listen/accept for the server role
//! - `connector`: connect for the client role
//! - `session`: the connected endpoint both roles exchange messages over
//!
//! `accept`, `connect`, `send`, and `receive` block the calling thread; there
//! are no timeouts.

pub mod connector;
pub mod handle;
pub mod listener;
pub mod resolver;
pub mod session;

pub use connector::connect;
pub use handle::SocketHandle;
pub use listener::{Listener, ListenerState};
pub use resolver::{reachable, resolve, Endpoint, Family, Purpose, ResolvedAddress};
pub use session::{Message, Session, SessionState};
