//! Signature engine used by the routing protocol.
//!
//! The protocol only depends on the [`SignatureEngine`] contract; the
//! Ed25519 implementation below backs it with CA-issued certificates.

use crate::certificate::{Certificate, NodeCredentials, TrustStore};
use crate::error::CryptoResult;
use crate::seal;

/// Asymmetric operations needed by the protocol engine.
pub trait SignatureEngine {
    /// Wire encoding of the local certificate.
    fn own_certificate(&self) -> Vec<u8>;

    /// Sign `data` with the local private key.
    fn sign(&self, data: &[u8]) -> Vec<u8>;

    /// Validate a certificate against the CA and the current CRL.
    fn check_certificate(&self, cert: &[u8], now_ms: u64) -> bool;

    /// Validate `cert`, then verify `signature` over `data` with its key.
    fn verify(&self, cert: &[u8], data: &[u8], signature: &[u8], now_ms: u64) -> bool;

    /// True when `cert` carries the gateway marker.
    fn is_gateway_certificate(&self, cert: &[u8]) -> bool;

    /// True when `cert` carries the KDC marker.
    fn is_kdc_certificate(&self, cert: &[u8]) -> bool;

    /// Decrypt a group key sealed to the local certificate.
    fn open_gtk(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Install a new revocation list.
    fn set_crl(&mut self, crl: &[u8]) -> CryptoResult<()>;
}

/// [`SignatureEngine`] backed by Ed25519 certificates.
#[derive(Debug)]
pub struct Ed25519Engine {
    credentials: NodeCredentials,
    trust: TrustStore,
}

impl Ed25519Engine {
    /// Create an engine from local credentials and the CA trust store.
    pub fn new(credentials: NodeCredentials, trust: TrustStore) -> Self {
        Self { credentials, trust }
    }

    /// The local certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.credentials.certificate
    }

    /// The trust store in use.
    pub fn trust_store(&self) -> &TrustStore {
        &self.trust
    }
}

impl SignatureEngine for Ed25519Engine {
    fn own_certificate(&self) -> Vec<u8> {
        self.credentials.certificate.to_bytes()
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.credentials.sign(data)
    }

    fn check_certificate(&self, cert: &[u8], now_ms: u64) -> bool {
        let result = Certificate::from_bytes(cert).and_then(|cert| self.trust.check(&cert, now_ms));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "certificate rejected");
                false
            }
        }
    }

    fn verify(&self, cert: &[u8], data: &[u8], signature: &[u8], now_ms: u64) -> bool {
        let certificate = match Certificate::from_bytes(cert) {
            Ok(certificate) => certificate,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable certificate");
                return false;
            }
        };
        if let Err(e) = self.trust.check(&certificate, now_ms) {
            tracing::debug!(error = %e, subject = %certificate.subject, "certificate rejected");
            return false;
        }
        certificate.verify_signature(data, signature)
    }

    fn is_gateway_certificate(&self, cert: &[u8]) -> bool {
        Certificate::from_bytes(cert).map(|c| c.is_gateway()).unwrap_or(false)
    }

    fn is_kdc_certificate(&self, cert: &[u8]) -> bool {
        Certificate::from_bytes(cert).map(|c| c.is_kdc()).unwrap_or(false)
    }

    fn open_gtk(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        seal::open(&self.credentials.encryption_secret, sealed)
    }

    fn set_crl(&mut self, crl: &[u8]) -> CryptoResult<()> {
        self.trust.set_crl(crl)
    }
}
