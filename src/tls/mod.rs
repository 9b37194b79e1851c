//! TLS Session Factory and Handshake Driver (§4.5, §4.6).

pub mod credentials;
pub mod handshake;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls_pki_types::ServerName;

use crate::config;
use crate::error::{Error, Result};
pub use credentials::CredentialKind;
use credentials::{AcceptingVerifier, EphemeralIdentity};

/// Which side of the handshake a session plays (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Assembles the effective priority string: env override (or the built-in
/// default) plus the per-credential-kind suffix. Kept verbatim as a
/// diagnostic string (§4.5) even though rustls itself has no priority-string
/// input.
pub fn priority_string(kind: &CredentialKind) -> String {
    format!("{}:{}", config::tls_priorities_base(), kind.priority_suffix())
}

/// Either side of a live TLS session. Exactly one variant is ever
/// constructed for a given socket, mirroring the "session exclusively owns
/// transport" model of the data model's Design Notes.
pub enum Connection {
    Client(rustls::ClientConnection),
    Server(rustls::ServerConnection),
}

impl Connection {
    pub fn is_handshaking(&self) -> bool {
        match self {
            Connection::Client(c) => c.is_handshaking(),
            Connection::Server(c) => c.is_handshaking(),
        }
    }

    pub fn wants_read(&self) -> bool {
        match self {
            Connection::Client(c) => c.wants_read(),
            Connection::Server(c) => c.wants_read(),
        }
    }

    pub fn wants_write(&self) -> bool {
        match self {
            Connection::Client(c) => c.wants_write(),
            Connection::Server(c) => c.wants_write(),
        }
    }

    pub fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        match self {
            Connection::Client(c) => c.read_tls(rd),
            Connection::Server(c) => c.read_tls(rd),
        }
    }

    pub fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        match self {
            Connection::Client(c) => c.write_tls(wr),
            Connection::Server(c) => c.write_tls(wr),
        }
    }

    pub fn process_new_packets(&mut self) -> std::result::Result<rustls::IoState, rustls::Error> {
        match self {
            Connection::Client(c) => c.process_new_packets(),
            Connection::Server(c) => c.process_new_packets(),
        }
    }

    pub fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Connection::Client(c) => c.reader(),
            Connection::Server(c) => c.reader(),
        }
    }

    pub fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Connection::Client(c) => c.writer(),
            Connection::Server(c) => c.writer(),
        }
    }
}

/// A TLS session bound to its transport socket (§4.5: "Bind the underlying
/// socket as the transport").
pub struct TlsSession {
    pub conn: Connection,
    pub socket: TcpStream,
}

/// Builds client/server TLS sessions with the right cipher priority,
/// credential kind, and DH bounds (§4.5).
pub struct TlsSessionFactory;

impl TlsSessionFactory {
    /// `dh_min_bits` applies only to `Client` sessions (per §4.5: "For
    /// Client: if PCMK_dh_min_bits is set ... apply it as the minimum DH
    /// prime size"). It is recorded for diagnostics even on the ECDSA
    /// default path described in SPEC_FULL.md §4.5.
    pub fn new_session(
        socket: TcpStream,
        role: Role,
        kind: CredentialKind,
    ) -> Result<TlsSession> {
        let priority = priority_string(&kind);
        let role_label = match role {
            Role::Client => "client",
            Role::Server => "server",
        };

        if role == Role::Client {
            if let Some(bits) = config::dh_min_bits() {
                log::info!(
                    "Requiring server use a Diffie-Hellman prime of at least {bits} bits \
                     (recorded for diagnostics; the ECDSA handshake path does not negotiate \
                     finite-field DH)"
                );
            }
        }

        let identity = EphemeralIdentity::generate(&kind).map_err(|e| match e {
            Error::TlsConfig { reason, .. } => Error::TlsConfig {
                role: role_label,
                kind: kind.label(),
                priority: priority.clone(),
                reason,
            },
            other => other,
        })?;
        let verifier = Arc::new(AcceptingVerifier::new(&kind));

        let conn = match role {
            Role::Client => {
                let config = rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(verifier)
                    .with_client_auth_cert(vec![identity.cert], identity.key)
                    .map_err(|e| tls_config_error(role_label, &kind, &priority, e.to_string()))?;

                let server_name = ServerName::try_from("remote-transport")
                    .map_err(|e| tls_config_error(role_label, &kind, &priority, e.to_string()))?
                    .to_owned();

                let client = rustls::ClientConnection::new(Arc::new(config), server_name)
                    .map_err(|e| tls_config_error(role_label, &kind, &priority, e.to_string()))?;
                Connection::Client(client)
            }
            Role::Server => {
                let config = rustls::ServerConfig::builder()
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(vec![identity.cert], identity.key)
                    .map_err(|e| tls_config_error(role_label, &kind, &priority, e.to_string()))?;

                let server = rustls::ServerConnection::new(Arc::new(config))
                    .map_err(|e| tls_config_error(role_label, &kind, &priority, e.to_string()))?;
                Connection::Server(server)
            }
        };

        Ok(TlsSession { conn, socket })
    }
}

fn tls_config_error(role: &'static str, kind: &CredentialKind, priority: &str, reason: String) -> Error {
    Error::TlsConfig {
        role,
        kind: kind.label(),
        priority: priority.to_string(),
        reason,
    }
}

/// Bounds `dh_bits` to `[PCMK_dh_min_bits, PCMK_dh_max_bits]`, ignoring a max
/// that is smaller than the min (with a warning), matching
/// `pcmk__bound_dh_bits` exactly.
pub fn bound_dh_bits(dh_bits: u32) -> u32 {
    let min = config::dh_min_bits();
    let mut max = config::dh_max_bits();
    if let (Some(min), Some(m)) = (min, max) {
        if m < min {
            log::warn!("Ignoring PCMK_dh_max_bits because it is less than PCMK_dh_min_bits");
            max = None;
        }
    }
    if let Some(min) = min {
        if dh_bits < min {
            return min;
        }
    }
    if let Some(max) = max {
        if dh_bits > max {
            return max;
        }
    }
    dh_bits
}

/// Server-side DH parameter sizing (§4.5's `init_server_dh_params`). No
/// library-suggested bit count is available without a GnuTLS binding, so
/// this always starts from the source's documented fallback of 1024 bits
/// before applying the environment bounds.
pub fn init_server_dh_params() -> u32 {
    let suggested = 1024;
    let bits = bound_dh_bits(suggested);
    log::info!("Generating Diffie-Hellman parameters with {bits}-bit prime for TLS");
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_suffix_differs_by_kind() {
        let anon = priority_string(&CredentialKind::Anon);
        let psk = priority_string(&CredentialKind::Psk { key: vec![1, 2, 3] });
        assert!(anon.ends_with("+ANON-DH"));
        assert!(psk.ends_with("+DHE-PSK:+PSK"));
    }

    #[test]
    fn dh_bits_default_without_env() {
        // Without PCMK_dh_min_bits/PCMK_dh_max_bits set, bounds are no-ops.
        assert_eq!(bound_dh_bits(1024), 1024);
    }
}
