//! Cryptographic primitives for the PASER routing protocol.
//!
//! - **Authentication tree**: one-time secrets committed to by a SHA-256
//!   Merkle root, released one per hop-by-hop message
//! - **Keyed hash**: HMAC-SHA256 under the group transient key (GTK)
//! - **Certificates**: CA-issued Ed25519/X25519 certificates with gateway and
//!   KDC role markers, signed revocation lists and a trust store
//! - **Signature engine**: the asymmetric contract the protocol engine uses
//! - **Sealing**: X25519 + ChaCha20-Poly1305 transport of the GTK
//!
//! # Security Principles
//!
//! - Secrets and key files are zeroized after use
//! - Every certificate is checked against the CA and the current CRL before
//!   its key is used
//! - Keyed hashes are compared in constant time

pub mod auth_tree;
pub mod certificate;
pub mod engine;
pub mod error;
pub mod keyed_hash;
pub mod seal;

pub use auth_tree::{AuthTree, Hash, ReleasedSecret, MAX_TREE_ORDER};
pub use certificate::{
    load_ca_key, Certificate, CertificateAuthority, Crl, NodeCredentials, TrustStore,
    GATEWAY_MARKER, KDC_MARKER,
};
pub use engine::{Ed25519Engine, SignatureEngine};
pub use error::{CryptoError, CryptoResult};
