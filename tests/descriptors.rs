//! Descriptor accounting across failing and repeated exchanges.
//!
//! Kept to a single test so no other test in this binary opens sockets
//! while descriptors are being counted.

#![cfg(target_os = "linux")]

use sentinel_wire::net::{Endpoint, Family, Listener, ResolvedAddress};
use sentinel_wire::protocol::{DEFAULT_BACKLOG, HELLO};
use sentinel_wire::{run_pair, ClientRole, NetError, ServerRole};
use socket2::{Domain, Socket, Type};
use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn open_descriptors() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .expect("read /proc/self/fd")
        .count()
}

fn loopback(port: &str) -> Endpoint {
    Endpoint::new(Some("127.0.0.1".to_string()), port, Family::Ipv4)
}

#[test]
fn descriptors_return_to_baseline() {
    // Warm-up run; nothing listens on its port afterwards. The resolver may
    // load files on first use, so the baseline is taken after it.
    let outcome = run_pair(
        ServerRole::new(loopback("0")),
        ClientRole::new(loopback("0")),
    )
    .unwrap();
    let closed_port = outcome.server.unwrap().local.port();
    let baseline = open_descriptors();

    // Failed connect.
    let err = ClientRole::new(loopback(&closed_port.to_string()))
        .run()
        .unwrap_err();
    assert!(matches!(err, NetError::Connect { .. }), "got {err:?}");
    assert_eq!(open_descriptors(), baseline, "failed connect leaked a socket");

    // Failed bind: the port already has a live listener.
    let held = Listener::bind_and_listen(
        &ResolvedAddress {
            addr: "127.0.0.1:0".parse().unwrap(),
            protocol: libc::IPPROTO_TCP,
        },
        DEFAULT_BACKLOG,
    )
    .unwrap();
    let held_port = held.local_addr().unwrap().port();
    let with_held = open_descriptors();
    let err = ServerRole::new(loopback(&held_port.to_string()))
        .run()
        .unwrap_err();
    assert!(matches!(err, NetError::Bind { .. }), "got {err:?}");
    assert_eq!(open_descriptors(), with_held, "failed bind leaked a socket");
    drop(held);
    assert_eq!(open_descriptors(), baseline);

    // Serve loop ended by a connection reset.
    let (tx, rx) = mpsc::channel();
    let server = thread::spawn(move || {
        ServerRole::new(loopback("0")).run_notify(move |addr| tx.send(addr).unwrap())
    });
    let addr = rx.recv().unwrap();
    {
        let mut peer = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        peer.connect(&addr.into()).unwrap();
        peer.write_all(HELLO).unwrap();
        let mut reply = [0u8; 8];
        assert_eq!(peer.read(&mut reply).unwrap(), 2);
        // Zero linger turns close into RST.
        peer.set_linger(Some(Duration::ZERO)).unwrap();
    }
    let err = server.join().unwrap().unwrap_err();
    assert!(
        matches!(err, NetError::Receive(_) | NetError::Send(_)),
        "got {err:?}"
    );
    assert_eq!(open_descriptors(), baseline, "reset connection leaked a socket");

    for round in 0..5 {
        let outcome = run_pair(
            ServerRole::new(loopback("0")),
            ClientRole::new(loopback("0")),
        )
        .unwrap();
        assert!(outcome.server.is_ok(), "round {round}");
        assert!(outcome.client.unwrap().is_ok(), "round {round}");
        assert_eq!(open_descriptors(), baseline, "leak after round {round}");
    }
}
