//! Integration coverage for the async connect engine and the TLS handshake
//! deadline (spec.md §8 scenarios S5, S6).

use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use remote_transport::connect::{accept_connection, connect_async};
use remote_transport::scheduler::{PollScheduler, Scheduler};
use remote_transport::tls::credentials::CredentialKind;
use remote_transport::tls::handshake::run_handshake;
use remote_transport::tls::{Role, TlsSessionFactory};

mod common;

#[test]
fn connect_to_refused_port_reports_an_error_promptly() {
    common::init_logging();
    // Bind then drop the listener so the port is very likely closed;
    // connecting to it should fail fast (ECONNREFUSED) well inside the
    // generous 2s budget rather than waiting out the full deadline.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let scheduler = Arc::new(PollScheduler::new().unwrap());
    let (tx, rx) = mpsc::channel();
    let _handle = connect_async(scheduler.clone(), "127.0.0.1", addr.port(), 2_000, move |result| {
        tx.send(result.is_err()).unwrap();
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut failed = None;
    while Instant::now() < deadline {
        scheduler.tick(Duration::from_millis(20));
        if let Ok(v) = rx.try_recv() {
            failed = Some(v);
            break;
        }
    }
    assert_eq!(failed, Some(true));
}

/// Scenario S5 verbatim: connecting to a TEST-NET-2 address (RFC 5737,
/// reserved for documentation and expected to black-hole rather than reset)
/// with a 200ms deadline should deliver a timeout within 200-700ms. Ignored
/// by default since it depends on the test host's network actually dropping
/// packets to that range rather than e.g. a corporate proxy reflecting RSTs.
#[test]
#[ignore = "depends on 198.51.100.1 black-holing packets on the test host's network"]
fn s5_async_connect_to_blackhole_address_times_out() {
    let scheduler = Arc::new(PollScheduler::new().unwrap());
    let (tx, rx) = mpsc::channel();
    let start = Instant::now();
    let _handle = connect_async(scheduler.clone(), "198.51.100.1", 1, 200, move |result| {
        tx.send(result.is_err()).unwrap();
    });

    let deadline = Instant::now() + Duration::from_millis(700);
    let mut timed_out = None;
    while Instant::now() < deadline {
        scheduler.tick(Duration::from_millis(20));
        if let Ok(v) = rx.try_recv() {
            timed_out = Some(v);
            break;
        }
    }
    let elapsed = start.elapsed();
    assert_eq!(timed_out, Some(true));
    assert!(elapsed >= Duration::from_millis(200) && elapsed <= Duration::from_millis(700));
}

/// Scenario S6: a client handshake against a peer that accepts the TCP
/// connection but never sends a single TLS byte must return after roughly
/// one second (the whole-second deadline granularity documented in
/// SPEC_FULL.md §9) without looping forever.
#[test]
fn s6_handshake_against_silent_peer_times_out_after_about_a_second() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let acceptor = std::thread::spawn(move || {
        let stream = accept_connection(&listener, None).unwrap();
        // Hold the connection open but never write anything.
        std::thread::sleep(Duration::from_secs(2));
        drop(stream);
    });

    let client_sock = std::net::TcpStream::connect(addr).unwrap();
    let mut session =
        TlsSessionFactory::new_session(client_sock, Role::Client, CredentialKind::Anon).unwrap();

    let start = Instant::now();
    let result = run_handshake(&mut session, 1);
    let elapsed = start.elapsed();

    assert!(result.is_err());
    assert!(elapsed >= Duration::from_secs(1));
    acceptor.join().unwrap();
}
