//! Certificates, revocation lists and the trust store.
//!
//! A certificate binds a node address to an Ed25519 verification key and an
//! X25519 encryption key, and carries a comment field whose literal value
//! marks gateways (`gateway:true`) and the KDC (`kdc:true`). Certificates and
//! CRLs travel on the wire as their JSON encoding.

use crate::error::{CryptoError, CryptoResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use zeroize::{Zeroize, Zeroizing};
use std::net::Ipv4Addr;
use std::path::Path;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Comment marker of gateway certificates.
pub const GATEWAY_MARKER: &str = "gateway:true";

/// Comment marker of KDC certificates.
pub const KDC_MARKER: &str = "kdc:true";

/// A CA-issued node certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Serial number, unique per CA
    pub serial: u64,
    /// Address of the certified node
    pub subject: Ipv4Addr,
    /// Role marker
    pub comment: String,
    /// Ed25519 verification key
    pub verifying_key: [u8; 32],
    /// X25519 key used to seal group keys for this node
    pub encryption_key: [u8; 32],
    /// Expiry in milliseconds since the epoch, 0 for no expiry
    pub not_after_ms: u64,
    /// CA signature over [`Certificate::tbs_bytes`]
    pub signature: Vec<u8>,
}

impl Certificate {
    /// The to-be-signed portion of the certificate.
    pub fn tbs_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + self.comment.len());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.subject.octets());
        out.extend_from_slice(&(self.comment.len() as u32).to_le_bytes());
        out.extend_from_slice(self.comment.as_bytes());
        out.extend_from_slice(&self.verifying_key);
        out.extend_from_slice(&self.encryption_key);
        out.extend_from_slice(&self.not_after_ms.to_le_bytes());
        out
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing plain data into a Vec cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode a certificate from its wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::MalformedCertificate(e.to_string()))
    }

    /// True for gateway certificates.
    pub fn is_gateway(&self) -> bool {
        self.comment == GATEWAY_MARKER
    }

    /// True for KDC certificates.
    pub fn is_kdc(&self) -> bool {
        self.comment == KDC_MARKER
    }

    /// Parsed Ed25519 verification key.
    pub fn verification_key(&self) -> CryptoResult<VerifyingKey> {
        VerifyingKey::from_bytes(&self.verifying_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Verify `signature` over `data` with the certified key.
    pub fn verify_signature(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = self.verification_key() else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(data, &signature).is_ok()
    }
}

/// Certificate revocation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crl {
    /// Issue time in milliseconds since the epoch
    pub issued_at_ms: u64,
    /// Revoked certificate serials
    pub revoked: Vec<u64>,
    /// CA signature over [`Crl::tbs_bytes`]
    pub signature: Vec<u8>,
}

impl Crl {
    /// The to-be-signed portion of the list.
    pub fn tbs_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.revoked.len() * 8);
        out.extend_from_slice(&self.issued_at_ms.to_le_bytes());
        out.extend_from_slice(&(self.revoked.len() as u32).to_le_bytes());
        for serial in &self.revoked {
            out.extend_from_slice(&serial.to_le_bytes());
        }
        out
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode a CRL from its wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::MalformedCrl(e.to_string()))
    }
}

/// A node's certificate together with its private keys.
pub struct NodeCredentials {
    /// The node certificate
    pub certificate: Certificate,
    pub(crate) signing_key: SigningKey,
    pub(crate) encryption_secret: StaticSecret,
}

impl NodeCredentials {
    /// Assemble credentials from raw key bytes.
    pub fn from_parts(certificate: Certificate, signing_seed: [u8; 32], encryption_secret: [u8; 32]) -> CryptoResult<Self> {
        let signing_key = SigningKey::from_bytes(&signing_seed);
        if signing_key.verifying_key().to_bytes() != certificate.verifying_key {
            return Err(CryptoError::InvalidKey(
                "signing key does not match certificate".to_string(),
            ));
        }
        let encryption_secret = StaticSecret::from(encryption_secret);
        if X25519PublicKey::from(&encryption_secret).to_bytes() != certificate.encryption_key {
            return Err(CryptoError::InvalidKey(
                "encryption key does not match certificate".to_string(),
            ));
        }
        Ok(Self {
            certificate,
            signing_key,
            encryption_secret,
        })
    }

    /// Sign arbitrary bytes with the node key.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    /// Load a JSON certificate file and a JSON key file.
    pub fn load(cert_path: &Path, key_path: &Path) -> CryptoResult<Self> {
        let certificate = Certificate::from_bytes(&std::fs::read(cert_path)?)?;
        let key_file: KeyFile = serde_json::from_slice(&std::fs::read(key_path)?)?;
        let signing_seed = decode_key(&key_file.signing_key)?;
        let encryption_secret = decode_key(&key_file.encryption_key)?;
        Self::from_parts(certificate, signing_seed, encryption_secret)
    }

    /// Write the certificate and key files.
    pub fn save(&self, cert_path: &Path, key_path: &Path) -> CryptoResult<()> {
        std::fs::write(cert_path, self.certificate.to_bytes())?;
        let key_file = KeyFile {
            signing_key: hex::encode(self.signing_key.to_bytes()),
            encryption_key: hex::encode(self.encryption_secret.to_bytes()),
        };
        std::fs::write(key_path, serde_json::to_vec_pretty(&key_file)?)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    signing_key: String,
    encryption_key: String,
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        self.signing_key.zeroize();
        self.encryption_key.zeroize();
    }
}

fn decode_key(encoded: &str) -> CryptoResult<[u8; 32]> {
    let bytes = Zeroizing::new(hex::decode(encoded.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?);
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

/// Read a hex-encoded CA verification key.
pub fn load_ca_key(path: &Path) -> CryptoResult<[u8; 32]> {
    let content = std::fs::read_to_string(path)?;
    decode_key(&content)
}

impl std::fmt::Debug for NodeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCredentials")
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

/// Certificate authority used to provision nodes, gateways and the KDC.
pub struct CertificateAuthority {
    signing_key: SigningKey,
    next_serial: u64,
}

impl CertificateAuthority {
    /// Create a CA with a fresh random key.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Create a CA from a 32-byte key seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
            next_serial: 1,
        }
    }

    /// The CA verification key.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Issue a certificate for existing public keys.
    pub fn issue(
        &mut self,
        subject: Ipv4Addr,
        comment: &str,
        verifying_key: [u8; 32],
        encryption_key: [u8; 32],
        not_after_ms: u64,
    ) -> Certificate {
        let mut certificate = Certificate {
            serial: self.next_serial,
            subject,
            comment: comment.to_string(),
            verifying_key,
            encryption_key,
            not_after_ms,
            signature: Vec::new(),
        };
        self.next_serial += 1;
        certificate.signature = self.signing_key.sign(&certificate.tbs_bytes()).to_bytes().to_vec();
        certificate
    }

    /// Generate key pairs and issue a certificate for them.
    pub fn issue_credentials(&mut self, subject: Ipv4Addr, comment: &str, not_after_ms: u64) -> NodeCredentials {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        let encryption_secret = StaticSecret::random_from_rng(OsRng);
        let certificate = self.issue(
            subject,
            comment,
            signing_key.verifying_key().to_bytes(),
            X25519PublicKey::from(&encryption_secret).to_bytes(),
            not_after_ms,
        );
        NodeCredentials {
            certificate,
            signing_key,
            encryption_secret,
        }
    }

    /// Issue a signed revocation list.
    pub fn issue_crl(&self, revoked: Vec<u64>, issued_at_ms: u64) -> Crl {
        let mut crl = Crl {
            issued_at_ms,
            revoked,
            signature: Vec::new(),
        };
        crl.signature = self.signing_key.sign(&crl.tbs_bytes()).to_bytes().to_vec();
        crl
    }
}

/// CA key plus the currently installed revocation list.
#[derive(Debug, Clone)]
pub struct TrustStore {
    ca_key: VerifyingKey,
    revoked: HashSet<u64>,
    crl_issued_at_ms: Option<u64>,
}

impl TrustStore {
    /// Create a trust store for a CA verification key.
    pub fn new(ca_key: [u8; 32]) -> CryptoResult<Self> {
        let ca_key = VerifyingKey::from_bytes(&ca_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            ca_key,
            revoked: HashSet::new(),
            crl_issued_at_ms: None,
        })
    }

    /// Install a CA-signed revocation list, replacing the previous one.
    pub fn set_crl(&mut self, bytes: &[u8]) -> CryptoResult<()> {
        let crl = Crl::from_bytes(bytes)?;
        let signature = Signature::from_slice(&crl.signature).map_err(|_| CryptoError::CrlSignature)?;
        self.ca_key
            .verify(&crl.tbs_bytes(), &signature)
            .map_err(|_| CryptoError::CrlSignature)?;
        self.revoked = crl.revoked.into_iter().collect();
        self.crl_issued_at_ms = Some(crl.issued_at_ms);
        Ok(())
    }

    /// Issue time of the installed CRL.
    pub fn crl_issued_at(&self) -> Option<u64> {
        self.crl_issued_at_ms
    }

    /// Validate a certificate against the CA, its lifetime and the CRL.
    pub fn check(&self, certificate: &Certificate, now_ms: u64) -> CryptoResult<()> {
        let serial = certificate.serial;
        let signature = Signature::from_slice(&certificate.signature)
            .map_err(|_| CryptoError::CertificateSignature { serial })?;
        self.ca_key
            .verify(&certificate.tbs_bytes(), &signature)
            .map_err(|_| CryptoError::CertificateSignature { serial })?;
        if certificate.not_after_ms != 0 && now_ms > certificate.not_after_ms {
            return Err(CryptoError::CertificateExpired { serial });
        }
        if self.revoked.contains(&serial) {
            return Err(CryptoError::CertificateRevoked { serial });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_issued_certificate_checks() {
        let mut ca = CertificateAuthority::generate();
        let store = TrustStore::new(ca.public_key()).unwrap();
        let creds = ca.issue_credentials(addr(1), "", 0);
        assert!(store.check(&creds.certificate, 1_000).is_ok());
    }

    #[test]
    fn test_foreign_ca_rejected() {
        let mut ca = CertificateAuthority::generate();
        let other = CertificateAuthority::generate();
        let store = TrustStore::new(other.public_key()).unwrap();
        let creds = ca.issue_credentials(addr(1), "", 0);
        assert!(matches!(
            store.check(&creds.certificate, 0),
            Err(CryptoError::CertificateSignature { .. })
        ));
    }

    #[test]
    fn test_tampered_marker_breaks_signature() {
        let mut ca = CertificateAuthority::generate();
        let store = TrustStore::new(ca.public_key()).unwrap();
        let mut cert = ca.issue_credentials(addr(1), "", 0).certificate;
        cert.comment = GATEWAY_MARKER.to_string();
        assert!(store.check(&cert, 0).is_err());
    }

    #[test]
    fn test_expired_certificate_rejected() {
        let mut ca = CertificateAuthority::generate();
        let store = TrustStore::new(ca.public_key()).unwrap();
        let cert = ca.issue_credentials(addr(1), "", 5_000).certificate;
        assert!(store.check(&cert, 4_999).is_ok());
        assert!(matches!(
            store.check(&cert, 5_001),
            Err(CryptoError::CertificateExpired { .. })
        ));
    }

    #[test]
    fn test_crl_revokes_certificate() {
        let mut ca = CertificateAuthority::generate();
        let mut store = TrustStore::new(ca.public_key()).unwrap();
        let cert = ca.issue_credentials(addr(1), "", 0).certificate;
        let crl = ca.issue_crl(vec![cert.serial], 10);

        store.set_crl(&crl.to_bytes()).unwrap();

        assert_eq!(store.crl_issued_at(), Some(10));
        assert!(matches!(
            store.check(&cert, 0),
            Err(CryptoError::CertificateRevoked { .. })
        ));
    }

    #[test]
    fn test_forged_crl_rejected() {
        let ca = CertificateAuthority::generate();
        let rogue = CertificateAuthority::generate();
        let mut store = TrustStore::new(ca.public_key()).unwrap();
        let crl = rogue.issue_crl(vec![1, 2, 3], 10);
        assert!(matches!(store.set_crl(&crl.to_bytes()), Err(CryptoError::CrlSignature)));
        assert_eq!(store.crl_issued_at(), None);
    }

    #[test]
    fn test_role_markers() {
        let mut ca = CertificateAuthority::generate();
        let gw = ca.issue_credentials(addr(1), GATEWAY_MARKER, 0).certificate;
        let kdc = ca.issue_credentials(addr(2), KDC_MARKER, 0).certificate;
        assert!(gw.is_gateway() && !gw.is_kdc());
        assert!(kdc.is_kdc() && !kdc.is_gateway());
    }

    #[test]
    fn test_wire_round_trip_and_signature() {
        let mut ca = CertificateAuthority::generate();
        let creds = ca.issue_credentials(addr(9), "", 0);
        let decoded = Certificate::from_bytes(&creds.certificate.to_bytes()).unwrap();
        assert_eq!(decoded, creds.certificate);

        let signature = creds.sign(b"route request");
        assert!(decoded.verify_signature(b"route request", &signature));
        assert!(!decoded.verify_signature(b"route reply", &signature));
    }

    #[test]
    fn test_credentials_file_round_trip() {
        let mut ca = CertificateAuthority::generate();
        let creds = ca.issue_credentials(addr(3), GATEWAY_MARKER, 0);
        let dir = std::env::temp_dir().join(format!("paser-creds-{}", OsRng.next_u64()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("node.json");
        let key_path = dir.join("node.key");
        let ca_path = dir.join("ca.pub");

        creds.save(&cert_path, &key_path).unwrap();
        std::fs::write(&ca_path, hex::encode(ca.public_key())).unwrap();
        let loaded = NodeCredentials::load(&cert_path, &key_path).unwrap();
        let ca_key = load_ca_key(&ca_path).unwrap();

        assert_eq!(loaded.certificate, creds.certificate);
        assert_eq!(ca_key, ca.public_key());
        let signature = loaded.sign(b"hello");
        assert!(creds.certificate.verify_signature(b"hello", &signature));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_credentials_from_mismatched_parts_rejected() {
        let mut ca = CertificateAuthority::generate();
        let creds = ca.issue_credentials(addr(1), "", 0);
        let result = NodeCredentials::from_parts(creds.certificate, [7u8; 32], [8u8; 32]);
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }
}
