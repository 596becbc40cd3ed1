//! Error types for the key distribution center.

use paser_crypto::CryptoError;
use paser_mesh::MeshError;
use thiserror::Error;

/// Errors raised while answering registrations or rotating keys.
#[derive(Debug, Error)]
pub enum KdcError {
    /// The requester's certificate is malformed, forged, expired or revoked
    #[error("Registration refused: {0}")]
    Refused(#[source] CryptoError),

    /// Sealing or signing failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The datagram could not be decoded
    #[error("Codec error: {0}")]
    Codec(#[from] MeshError),

    /// A datagram other than a registration request reached the KDC
    #[error("Unexpected packet: {0}")]
    UnexpectedPacket(String),
}

/// Result type for KDC operations.
pub type KdcResult<T> = Result<T, KdcError>;
