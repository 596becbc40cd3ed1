//! Error types for PASER cryptographic operations.

use thiserror::Error;

/// Errors raised by the cryptographic layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The authentication tree order is out of range
    #[error("Invalid authentication tree order {0} (must be <= 31)")]
    InvalidTreeOrder(u32),

    /// The operating system randomness source failed
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),

    /// Certificate bytes could not be decoded
    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),

    /// Certificate was not issued by the trusted CA
    #[error("Certificate {serial} has an invalid CA signature")]
    CertificateSignature { serial: u64 },

    /// Certificate is listed in the current CRL
    #[error("Certificate {serial} is revoked")]
    CertificateRevoked { serial: u64 },

    /// Certificate lifetime is over
    #[error("Certificate {serial} expired")]
    CertificateExpired { serial: u64 },

    /// Revocation list bytes could not be decoded
    #[error("Malformed CRL: {0}")]
    MalformedCrl(String),

    /// Revocation list was not signed by the trusted CA
    #[error("CRL signature verification failed")]
    CrlSignature,

    /// Key material is malformed
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Sealing a key for a recipient failed
    #[error("Seal failed: {0}")]
    Seal(String),

    /// Opening a sealed key failed
    #[error("Open failed: {0}")]
    Open(String),

    /// Key or certificate files could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding of key files failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
