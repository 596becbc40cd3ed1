//! Sealing of the group transient key to a certificate holder.
//!
//! The sender performs an ephemeral X25519 agreement with the recipient's
//! certified encryption key and encrypts with ChaCha20-Poly1305 under a
//! BLAKE3-derived key. Sealed layout: ephemeral public key (32) ‖ nonce (12)
//! ‖ ciphertext.

use crate::certificate::Certificate;
use crate::error::{CryptoError, CryptoResult};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

const SEAL_CONTEXT: &str = "paser 2024 gtk seal v1";
const NONCE_SIZE: usize = 12;
const HEADER_SIZE: usize = 32 + NONCE_SIZE;

fn derive_cipher(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> ChaCha20Poly1305 {
    let mut material = Vec::with_capacity(96);
    material.extend_from_slice(shared);
    material.extend_from_slice(ephemeral);
    material.extend_from_slice(recipient);
    let mut key = blake3::derive_key(SEAL_CONTEXT, &material);
    material.zeroize();
    let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key));
    key.zeroize();
    cipher
}

/// Seal `plaintext` for the holder of `recipient`.
pub fn seal_to(recipient: &Certificate, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let recipient_key = X25519PublicKey::from(recipient.encryption_key);
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral).to_bytes();
    let shared = ephemeral.diffie_hellman(&recipient_key);

    let cipher = derive_cipher(shared.as_bytes(), &ephemeral_public, &recipient.encryption_key);
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Seal(e.to_string()))?;

    let mut sealed = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    sealed.extend_from_slice(&ephemeral_public);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed blob with the recipient's static secret.
pub fn open(secret: &StaticSecret, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < HEADER_SIZE {
        return Err(CryptoError::Open(format!(
            "sealed blob too short: {} bytes",
            sealed.len()
        )));
    }
    let mut ephemeral_public = [0u8; 32];
    ephemeral_public.copy_from_slice(&sealed[..32]);
    let nonce = Nonce::from_slice(&sealed[32..HEADER_SIZE]);

    let own_public = X25519PublicKey::from(secret).to_bytes();
    let shared = secret.diffie_hellman(&X25519PublicKey::from(ephemeral_public));
    let cipher = derive_cipher(shared.as_bytes(), &ephemeral_public, &own_public);
    cipher
        .decrypt(nonce, &sealed[HEADER_SIZE..])
        .map_err(|e| CryptoError::Open(e.to_string()))
}
