//! Certificate pinning during the TLS handshake.
//!
//! # Design
//! `PinningVerifier` wraps the default webpki verifier. Hosts without a
//! pinning entry get default trust evaluation only. Hosts with an entry must
//! pass default trust evaluation *and* present a leaf whose public-key hash
//! is in the entry's accepted set; any other result rejects the handshake.
//!
//! The hash is SHA-256 over a fixed RSA-2048 SubjectPublicKeyInfo header
//! followed by the leaf's raw public key, base64 encoded. For RSA-2048 keys
//! that is the standard SPKI pin.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::policy::PinningTable;

/// ASN.1 SubjectPublicKeyInfo header for an RSA-2048 public key.
pub const RSA_2048_ASN1_HEADER: [u8; 24] = [
    0x30, 0x82, 0x01, 0x22, 0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01,
    0x01, 0x05, 0x00, 0x03, 0x82, 0x01, 0x0f, 0x00,
];

#[derive(Debug, Error)]
pub enum PinError {
    #[error("leaf certificate could not be parsed: {0}")]
    Certificate(String),

    #[error("could not build the default verifier: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),
}

/// Pin for a raw public key: base64(SHA-256(RSA-2048 header || key)).
pub fn public_key_pin(raw_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(RSA_2048_ASN1_HEADER);
    hasher.update(raw_key);
    STANDARD.encode(hasher.finalize())
}

/// Pin for the public key of a DER-encoded certificate.
pub fn certificate_pin(der: &[u8]) -> Result<String, PinError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| PinError::Certificate(e.to_string()))?;
    Ok(public_key_pin(&cert.public_key().subject_public_key.data))
}

/// Root store with the Mozilla roots shipped in `webpki-roots`.
pub fn default_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    roots
}

/// Handshake verifier applying a pinning table on top of a default verifier.
#[derive(Debug)]
pub struct PinningVerifier {
    table: PinningTable,
    inner: Arc<dyn ServerCertVerifier>,
}

impl PinningVerifier {
    /// Pinning over webpki trust evaluation with `roots`.
    pub fn new(
        table: PinningTable,
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, PinError> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
        Ok(Self::with_inner(table, inner))
    }

    /// Pinning over an arbitrary default verifier.
    pub fn with_inner(table: PinningTable, inner: Arc<dyn ServerCertVerifier>) -> Self {
        Self { table, inner }
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let host = server_name.to_str();
        let Some((entry, accepted)) = self.table.lookup(&host) else {
            tracing::trace!(%host, "no pinning entry, default trust evaluation");
            return self
                .inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        };

        if let Err(e) = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            tracing::warn!(%host, entry, error = %e, "pinned host failed trust evaluation");
            return Err(e);
        }

        match certificate_pin(end_entity.as_ref()) {
            Ok(pin) if accepted.contains(&pin) => {
                tracing::debug!(%host, entry, "pinning ok");
                Ok(ServerCertVerified::assertion())
            }
            Ok(pin) => {
                tracing::warn!(%host, entry, %pin, "pinning mismatch");
                Err(rustls::Error::General(format!(
                    "public key pin mismatch for {host}"
                )))
            }
            Err(e) => {
                tracing::warn!(%host, entry, error = %e, "pinning error");
                Err(rustls::Error::General(e.to_string()))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Default verifier stand-in with a fixed verdict that counts its calls.
    #[derive(Debug)]
    struct FixedVerdict {
        trusted: bool,
        calls: AtomicUsize,
    }

    impl FixedVerdict {
        fn new(trusted: bool) -> Arc<Self> {
            Arc::new(Self {
                trusted,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ServerCertVerifier for FixedVerdict {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.trusted {
                Ok(ServerCertVerified::assertion())
            } else {
                Err(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::UnknownIssuer,
                ))
            }
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![SignatureScheme::ECDSA_NISTP256_SHA256]
        }
    }

    fn leaf(host: &str) -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap()
    }

    fn verify(
        verifier: &PinningVerifier,
        cert: &CertificateDer<'_>,
        host: &'static str,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let name = ServerName::try_from(host).unwrap();
        verifier.verify_server_cert(cert, &[], &name, &[], UnixTime::now())
    }

    #[test]
    fn pin_is_base64_sha256() {
        let pin = public_key_pin(b"key bytes");
        assert_eq!(pin.len(), 44);
        assert!(pin.ends_with('='));
        assert_ne!(pin, public_key_pin(b"other key bytes"));
    }

    #[test]
    fn certificate_pin_hashes_the_subject_public_key() {
        let key = leaf("example.com");
        let pin = certificate_pin(key.cert.der()).unwrap();
        assert_eq!(pin, public_key_pin(key.key_pair.public_key_raw()));
    }

    #[test]
    fn certificate_pin_rejects_garbage() {
        assert!(matches!(
            certificate_pin(b"not a certificate"),
            Err(PinError::Certificate(_))
        ));
    }

    #[test]
    fn unpinned_host_uses_default_evaluation() {
        let key = leaf("other.org");
        let inner = FixedVerdict::new(true);
        let verifier = PinningVerifier::with_inner(
            PinningTable::new().with("example.com", "unused"),
            inner.clone(),
        );
        assert!(verify(&verifier, key.cert.der(), "other.org").is_ok());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subdomain_with_matching_pin_is_accepted() {
        let key = leaf("sub.example.com");
        let pin = public_key_pin(key.key_pair.public_key_raw());
        let verifier = PinningVerifier::with_inner(
            PinningTable::new().with("example.com", vec![pin.as_str(), "backup"]),
            FixedVerdict::new(true),
        );
        assert!(verify(&verifier, key.cert.der(), "sub.example.com").is_ok());
    }

    #[test]
    fn pin_mismatch_cancels_the_handshake() {
        let key = leaf("sub.example.com");
        let verifier = PinningVerifier::with_inner(
            PinningTable::new().with("*.example.com", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
            FixedVerdict::new(true),
        );
        assert!(verify(&verifier, key.cert.der(), "sub.example.com").is_err());
    }

    #[test]
    fn failed_trust_evaluation_is_never_rescued_by_a_pin() {
        let key = leaf("example.com");
        let pin = public_key_pin(key.key_pair.public_key_raw());
        let verifier = PinningVerifier::with_inner(
            PinningTable::new().with("example.com", pin.as_str()),
            FixedVerdict::new(false),
        );
        assert!(verify(&verifier, key.cert.der(), "example.com").is_err());
    }

    #[test]
    fn webpki_verifier_builds_with_bundled_roots() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PinningVerifier::new(PinningTable::new(), default_roots(), provider).unwrap();
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
