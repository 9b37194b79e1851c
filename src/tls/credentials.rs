//! Credential kinds and the ephemeral-certificate substitution for GnuTLS's
//! `ANON-DH` / `DHE-PSK` key exchanges (see SPEC_FULL.md §4.5 and DESIGN.md).

use std::sync::Arc;

use hmac::{Hmac, Mac};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::Sha256;
use x509_parser::prelude::FromDer;

use crate::error::{Error, Result};

/// The two credential kinds §4.5 distinguishes. `Psk`'s shared key never
/// travels on the wire; it only seeds the certificate-pinning check below.
#[derive(Clone)]
pub enum CredentialKind {
    Anon,
    Psk { key: Vec<u8> },
}

impl CredentialKind {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialKind::Anon => "anon",
            CredentialKind::Psk { .. } => "psk",
        }
    }

    /// The priority-string suffix §4.5 appends per credential kind.
    pub fn priority_suffix(&self) -> &'static str {
        match self {
            CredentialKind::Anon => "+ANON-DH",
            CredentialKind::Psk { .. } => "+DHE-PSK:+PSK",
        }
    }
}

const PSK_CN_CONTEXT: &[u8] = b"pcmk-remote-psk";

/// The expected certificate common name for a `Psk` session: a hex-encoded
/// HMAC-SHA256 of the shared key, standing in for "authenticated by shared
/// secret, no CA" now that raw PSK ciphersuites aren't available.
fn expected_psk_common_name(key: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(PSK_CN_CONTEXT);
    hex::encode(mac.finalize().into_bytes())
}

/// A freshly generated, self-signed certificate/key pair used for exactly
/// one session. Neither side persists an identity across sessions, which is
/// the property `ANON-DH` bought in the source.
pub struct EphemeralIdentity {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

impl EphemeralIdentity {
    /// Generates an ECDSA P-256 self-signed certificate. For `Psk`, the
    /// certificate's common name is set to `expected_psk_common_name(key)` so
    /// the peer's verifier (below) can check it without ever seeing `key`
    /// itself transit the handshake.
    pub fn generate(kind: &CredentialKind) -> Result<Self> {
        let common_name = match kind {
            CredentialKind::Anon => "remote-transport-anon".to_string(),
            CredentialKind::Psk { key } => expected_psk_common_name(key),
        };

        let mut params = rcgen::CertificateParams::new(vec!["remote-transport".to_string()])
            .map_err(|e| tls_config_err(kind, format!("certificate params: {e}")))?;
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, common_name);
        params.distinguished_name = dn;

        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| tls_config_err(kind, format!("key generation: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| tls_config_err(kind, format!("self-signed cert: {e}")))?;

        Ok(EphemeralIdentity {
            cert: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        })
    }
}

fn tls_config_err(kind: &CredentialKind, reason: String) -> Error {
    Error::TlsConfig {
        role: "session",
        kind: kind.label(),
        priority: String::new(),
        reason,
    }
}

/// Verifier that accepts any well-formed peer certificate (the `Anon`
/// path) or one whose common name matches the PSK-derived value (the `Psk`
/// path). Shared between client- and server-side verification since the
/// check is symmetric.
#[derive(Debug)]
pub struct AcceptingVerifier {
    expected_common_name: Option<String>,
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl AcceptingVerifier {
    pub fn new(kind: &CredentialKind) -> Self {
        let expected_common_name = match kind {
            CredentialKind::Anon => None,
            CredentialKind::Psk { key } => Some(expected_psk_common_name(key)),
        };
        AcceptingVerifier {
            expected_common_name,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    fn check_common_name(&self, cert: &CertificateDer<'_>) -> std::result::Result<(), rustls::Error> {
        let Some(expected) = &self.expected_common_name else {
            return Ok(()); // Anon: no identity check at all.
        };
        let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(cert.as_ref())
            .map_err(|_| rustls::Error::General("malformed peer certificate".into()))?;
        let actual = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default();
        if actual == expected {
            Ok(())
        } else {
            Err(rustls::Error::General(
                "PSK certificate common name mismatch".into(),
            ))
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        self.check_common_name(end_entity)?;
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
        .map(|_| rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
        .map(|_| rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

impl rustls::server::danger::ClientCertVerifier for AcceptingVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        // Servers in both credential kinds want *a* certificate to check
        // (Psk) or simply to complete the handshake uniformly (Anon); the
        // content check happens in `verify_client_cert` below.
        true
    }

    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: rustls_pki_types::UnixTime,
    ) -> std::result::Result<rustls::server::danger::ClientCertVerified, rustls::Error> {
        self.check_common_name(end_entity)?;
        Ok(rustls::server::danger::ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
        .map(|_| rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
        .map(|_| rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
