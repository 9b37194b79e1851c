//! Byte Transport (§4.2): a plain or TLS-tunneled byte stream, abstracted
//! behind one enum rather than a trait object since exactly two concrete
//! shapes exist and neither is swapped at runtime once a session is built.
//! Grounded in `crm_send_tls`/`crm_send_plaintext` and
//! `crm_remote_recv_once`'s dual plaintext/TLS branches in `lib/common/remote.c`.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};

use crate::error::{Error, Result};
use crate::tls::TlsSession;

/// Either a bare TCP stream or a completed TLS session (§4.2).
pub enum Transport {
    Plain(TcpStream),
    Tls(TlsSession),
}

impl Transport {
    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        let sock = match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.socket,
        };
        sock.peer_addr().map_err(Error::Io)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let sock = match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.socket,
        };
        sock.set_nonblocking(nonblocking).map_err(Error::Io)
    }

    /// The underlying socket's raw descriptor, for registering with a
    /// `mio::Poll` readiness check (§4.3's "poll for readability").
    pub fn as_raw_fd(&self) -> RawFd {
        let sock = match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.socket,
        };
        sock.as_raw_fd()
    }

    /// Writes `data` in full, looping on partial writes and `WouldBlock` the
    /// way `crm_send_plaintext`'s `while (remaining > 0)` loop does. This is
    /// a blocking call: the source's send path is itself a busy-retry loop
    /// with no backoff, which §8's documented behavior preserves verbatim.
    pub fn send_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = match self {
                Transport::Plain(s) => s.write(data),
                Transport::Tls(s) => write_tls_app_data(s, data),
            };
            match n {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    /// One non-blocking receive attempt into `out`. Returns `Ok(0)` on a
    /// clean `WouldBlock` (caller should wait for readiness and retry), the
    /// number of bytes placed in `out` otherwise, and `Err(Disconnected)` on
    /// EOF — mirroring `crm_remote_recv_once`'s three-way outcome.
    pub fn recv_nonblocking(&mut self, out: &mut [u8]) -> Result<usize> {
        let result = match self {
            Transport::Plain(s) => s.read(out),
            Transport::Tls(s) => read_tls_app_data(s, out),
        };
        match result {
            Ok(0) => Err(Error::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Pushes `data` through the TLS record layer and flushes ciphertext to the
/// socket, returning how much plaintext was consumed.
fn write_tls_app_data(session: &mut TlsSession, data: &[u8]) -> std::io::Result<usize> {
    let n = session.conn.writer().write(data)?;
    flush_tls_output(session)?;
    Ok(n)
}

fn flush_tls_output(session: &mut TlsSession) -> std::io::Result<()> {
    while session.conn.wants_write() {
        match session.conn.write_tls(&mut session.socket) {
            Ok(0) => return Err(std::io::Error::from(ErrorKind::ConnectionAborted)),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Pulls ciphertext off the socket, feeds it through `process_new_packets`,
/// and drains whatever plaintext is now buffered into `out`.
fn read_tls_app_data(session: &mut TlsSession, out: &mut [u8]) -> std::io::Result<usize> {
    match session.conn.reader().read(out) {
        // `Ok(0)` from rustls's `Reader` means the peer sent a clean
        // `close_notify`, not "no data yet" — that's `Err(WouldBlock)`.
        // Propagate it as-is so `recv_nonblocking` reports a disconnect
        // instead of retrying forever.
        Ok(n) => return Ok(n),
        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }

    match session.conn.read_tls(&mut session.socket) {
        Ok(0) => return Ok(0),
        Ok(_) => {}
        Err(e) => return Err(e),
    }

    session
        .conn
        .process_new_packets()
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e.to_string()))?;

    session.conn.reader().read(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn plain_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            let mut t = Transport::Plain(stream);
            t.send_bytes(b"hello transport").unwrap();
        });
        let (server, _) = listener.accept().unwrap();
        let mut t = Transport::Plain(server);
        let mut buf = [0u8; 64];
        let mut total = 0;
        while total < b"hello transport".len() {
            total += t.recv_nonblocking(&mut buf[total..]).unwrap();
        }
        assert_eq!(&buf[..total], b"hello transport");
        writer.join().unwrap();
    }
}
