//! Error types for PASER mesh operations.
//!
//! [`MeshError`] covers failures the caller has to deal with (construction,
//! malformed input). [`DropReason`] explains why a received control message
//! was discarded; drops are never surfaced to peers.

use paser_crypto::CryptoError;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Input ended before a field could be read
    #[error("Truncated message: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// Leading type byte is not a known message kind
    #[error("Unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    /// Bytes left over after a complete message
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// A field holds a value the protocol does not allow
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Cryptographic failure, including entropy exhaustion
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Why an incoming control message or datagram was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    /// Wire decoding failed
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Node has not completed a registration yet
    #[error("node is not registered")]
    NotRegistered,

    /// Own authentication tree is not available
    #[error("authentication tree not ready")]
    RootNotReady,

    /// Own address appears in the accumulated route
    #[error("routing loop through own address")]
    Loop,

    /// Sequence number is not fresh
    #[error("stale sequence number from {src}")]
    StaleSequence { src: Ipv4Addr },

    /// Sender is farther away than the radio range allows
    #[error("implausible position of {src}")]
    Geographic { src: Ipv4Addr },

    /// Timestamp outside the tolerance window
    #[error("timestamp from {src} is out of tolerance")]
    Timestamp { src: Ipv4Addr },

    /// Asymmetric signature did not verify
    #[error("invalid signature from {src}")]
    Signature { src: Ipv4Addr },

    /// Certificate failed CA or CRL validation
    #[error("invalid certificate of {src}")]
    Certificate { src: Ipv4Addr },

    /// Keyed hash under the GTK did not verify
    #[error("invalid keyed hash from {src}")]
    KeyedHash { src: Ipv4Addr },

    /// One-time secret did not authenticate against the stored root
    #[error("invalid authentication path from {src}")]
    AuthPath { src: Ipv4Addr },

    /// No group key installed yet
    #[error("no group key installed")]
    MissingGtk,

    /// Sender is not in the neighbor table
    #[error("unknown neighbor {src}")]
    UnknownNeighbor { src: Ipv4Addr },

    /// Sender is a neighbor but not yet trusted
    #[error("neighbor {src} is not trusted")]
    UntrustedNeighbor { src: Ipv4Addr },

    /// Message was protected under a different key epoch
    #[error("key number {received} does not match local {local}")]
    KeyEpoch { received: u32, local: u32 },

    /// Reset announces a key epoch that is not newer than the local one
    #[error("key reset to {received} is not newer than {local}")]
    StaleReset { received: u32, local: u32 },

    /// No usable route
    #[error("no route to {dest}")]
    NoRoute { dest: Ipv4Addr },

    /// Root update from a node that is not a one-hop neighbor
    #[error("{src} is not a one-hop neighbor")]
    NotOneHop { src: Ipv4Addr },

    /// KDC material failed validation
    #[error("invalid KDC block: {0}")]
    KdcBlock(String),

    /// Nonce in a KDC reply does not match the outstanding request
    #[error("KDC nonce mismatch")]
    KdcNonce,

    /// Local cryptographic failure while building a response
    #[error("local crypto failure: {0}")]
    Crypto(String),
}

impl DropReason {
    /// True for drops that point at forged, replayed or revoked traffic.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            DropReason::Signature { .. }
                | DropReason::Certificate { .. }
                | DropReason::KeyedHash { .. }
                | DropReason::AuthPath { .. }
                | DropReason::Timestamp { .. }
                | DropReason::Geographic { .. }
                | DropReason::KdcBlock(_)
                | DropReason::KdcNonce
                | DropReason::Loop
        )
    }
}

impl From<MeshError> for DropReason {
    fn from(err: MeshError) -> Self {
        match err {
            MeshError::Crypto(e) => DropReason::Crypto(e.to_string()),
            other => DropReason::Malformed(other.to_string()),
        }
    }
}
