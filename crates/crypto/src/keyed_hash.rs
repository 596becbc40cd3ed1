//! HMAC-SHA256 keyed by the group transient key.

use crate::auth_tree::Hash;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed(gtk: &[u8], data: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, including the empty key.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(gtk)
        .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"));
    mac.update(data);
    mac
}

/// Compute the keyed hash of `data`.
pub fn compute(gtk: &[u8], data: &[u8]) -> Hash {
    keyed(gtk, data).finalize().into_bytes().into()
}

/// Constant-time verification of a keyed hash.
pub fn verify(gtk: &[u8], data: &[u8], tag: &[u8]) -> bool {
    keyed(gtk, data).verify_slice(tag).is_ok()
}
