//! Handshake Driver (§4.6). Ported from `crm_initiate_client_tls_handshake`
//! and `crm_remote_accept`'s handshake loop, which both poll the socket in
//! whole-second slices and decrement a remaining-seconds budget rather than
//! tracking a fine-grained deadline.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tls::TlsSession;

/// Drives `session` through its TLS handshake, polling in 1-second slices
/// until either side completes the handshake or `timeout_secs` whole seconds
/// have elapsed with no progress. `timeout_secs == 0` means "try once, no
/// retry" (matching the source's treatment of a non-positive timeout).
pub fn run_handshake(session: &mut TlsSession, timeout_secs: u32) -> Result<()> {
    let mut remaining = timeout_secs.max(1);

    session
        .socket
        .set_read_timeout(Some(Duration::from_secs(1)))
        .map_err(Error::Io)?;

    loop {
        if !session.conn.is_handshaking() {
            return Ok(());
        }

        let mut progressed = false;

        if session.conn.wants_write() {
            match session.conn.write_tls(&mut session.socket) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(_) => progressed = true,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if session.conn.wants_read() {
            match session.conn.read_tls(&mut session.socket) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(_) => {
                    progressed = true;
                    session
                        .conn
                        .process_new_packets()
                        .map_err(|e| Error::Handshake(e.to_string()))?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if !progressed {
            remaining -= 1;
            if remaining == 0 {
                return Err(Error::Timeout("TLS handshake"));
            }
        }
    }
}

/// Drains any remaining handshake bytes on an already-`process_new_packets`-ed
/// session. The source's server-side accept path feeds the handshake off an
/// event-driven callback rather than a blocking loop; this flushes out a
/// single already-readable chunk without touching `socket`'s timeout, for
/// callers integrating with the `Scheduler`-driven accept path (§4.8).
pub fn pump_once(session: &mut TlsSession) -> Result<bool> {
    if !session.conn.is_handshaking() {
        return Ok(false);
    }

    if session.conn.wants_write() {
        match session.conn.write_tls(&mut session.socket) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }

    match session.conn.read_tls(&mut session.socket) {
        Ok(0) => Err(Error::Disconnected),
        Ok(_) => {
            session
                .conn
                .process_new_packets()
                .map_err(|e| Error::Handshake(e.to_string()))?;
            Ok(!session.conn.is_handshaking())
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::credentials::CredentialKind;
    use crate::tls::{Role, TlsSessionFactory};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        (client.join().unwrap(), server)
    }

    #[test]
    fn anon_handshake_completes_over_loopback() {
        let (client_sock, server_sock) = loopback_pair();

        let mut client =
            TlsSessionFactory::new_session(client_sock, Role::Client, CredentialKind::Anon).unwrap();
        let mut server =
            TlsSessionFactory::new_session(server_sock, Role::Server, CredentialKind::Anon).unwrap();

        client.socket.set_nonblocking(true).unwrap();
        server.socket.set_nonblocking(true).unwrap();

        // Hand-roll a bounded pump loop instead of run_handshake's blocking
        // 1-second slices, since both ends live in the same test thread.
        for _ in 0..200 {
            let _ = pump_nonblocking(&mut client);
            let _ = pump_nonblocking(&mut server);
            if !client.conn.is_handshaking() && !server.conn.is_handshaking() {
                return;
            }
        }
        panic!("handshake did not complete within the bounded pump loop");
    }

    fn pump_nonblocking(session: &mut TlsSession) -> Result<()> {
        if session.conn.wants_write() {
            match session.conn.write_tls(&mut session.socket) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        if session.conn.wants_read() {
            match session.conn.read_tls(&mut session.socket) {
                Ok(0) => {}
                Ok(_) => {
                    session
                        .conn
                        .process_new_packets()
                        .map_err(|e| Error::Handshake(e.to_string()))?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}
