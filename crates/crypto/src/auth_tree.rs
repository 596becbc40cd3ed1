//! Hash-tree authentication of one-time secrets.
//!
//! A node draws 2^k random secrets and commits to all of them with a single
//! binary SHA-256 hash tree. The root is distributed with asymmetrically
//! signed messages. Every hop-by-hop message afterwards reveals the next
//! unused secret together with its authentication path; receivers recompute
//! the root from it and remember the index (IV) so earlier secrets cannot be
//! replayed.
//!
//! The leaf index of secret `i` is written into its top `k` bits, which lets
//! a verifier recover the index from the secret alone.

use crate::error::{CryptoError, CryptoResult};
use paser_core::SECRET_LEN;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// SHA-256 digest.
pub type Hash = [u8; 32];

/// Largest supported tree order.
pub const MAX_TREE_ORDER: u32 = 31;

/// A released secret with everything a verifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedSecret {
    /// Leaf index of the secret
    pub index: u32,
    /// The secret itself
    pub secret: [u8; SECRET_LEN],
    /// Sibling hashes from the leaf up to (excluding) the root
    pub auth_path: Vec<Hash>,
}

/// Merkle tree over one-time secrets.
pub struct AuthTree {
    order: u32,
    secrets: Vec<[u8; SECRET_LEN]>,
    /// levels[0] holds the leaves, the last level holds only the root
    levels: Vec<Vec<Hash>>,
    iv: u32,
}

/// SHA-256 of a secret.
pub fn hash_leaf(secret: &[u8]) -> Hash {
    Sha256::digest(secret).into()
}

/// SHA-256 of two concatenated child hashes.
pub fn hash_parent(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Leaf index carried in the top `order` bits of a secret.
pub fn secret_index(secret: &[u8; SECRET_LEN], order: u32) -> u32 {
    let word = u32::from_be_bytes([secret[0], secret[1], secret[2], secret[3]]);
    word.checked_shr(32 - order).unwrap_or(0)
}

fn embed_index(secret: &mut [u8; SECRET_LEN], index: u32, order: u32) {
    if order == 0 {
        return;
    }
    let shift = 32 - order;
    let word = u32::from_be_bytes([secret[0], secret[1], secret[2], secret[3]]);
    let low_mask = (1u32 << shift) - 1;
    let tagged = (word & low_mask) | (index << shift);
    secret[..4].copy_from_slice(&tagged.to_be_bytes());
}

impl AuthTree {
    /// Create an empty tree of order `order`; call [`AuthTree::regenerate`]
    /// before releasing secrets.
    pub fn new(order: u32) -> CryptoResult<Self> {
        if order > MAX_TREE_ORDER {
            return Err(CryptoError::InvalidTreeOrder(order));
        }
        Ok(Self {
            order,
            secrets: Vec::new(),
            levels: Vec::new(),
            iv: 0,
        })
    }

    /// Discard the current secrets and build a fresh tree.
    pub fn regenerate(&mut self) -> CryptoResult<()> {
        self.wipe();

        let count = 1usize << self.order;
        let mut secrets = Vec::with_capacity(count);
        for index in 0..count {
            let mut secret = [0u8; SECRET_LEN];
            getrandom::getrandom(&mut secret)
                .map_err(|e| CryptoError::Entropy(e.to_string()))?;
            embed_index(&mut secret, index as u32, self.order);
            secrets.push(secret);
        }

        let mut levels = Vec::with_capacity(self.order as usize + 1);
        levels.push(secrets.iter().map(|s| hash_leaf(s)).collect::<Vec<_>>());
        while levels.last().map_or(0, Vec::len) > 1 {
            let below = &levels[levels.len() - 1];
            let above = below
                .chunks(2)
                .map(|pair| hash_parent(&pair[0], &pair[1]))
                .collect::<Vec<_>>();
            levels.push(above);
        }

        self.secrets = secrets;
        self.levels = levels;
        self.iv = 0;
        tracing::debug!(order = self.order, "authentication tree regenerated");
        Ok(())
    }

    /// Root of the current tree, all zero before the first generation.
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or([0u8; 32])
    }

    /// Index of the next secret to be released.
    pub fn iv(&self) -> u32 {
        self.iv
    }

    /// Tree order k.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Number of secrets per generation.
    pub fn capacity(&self) -> usize {
        1usize << self.order
    }

    /// True once a tree has been generated.
    pub fn is_ready(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// True when every secret of the current generation has been released.
    pub fn is_exhausted(&self) -> bool {
        self.is_ready() && self.iv as usize >= self.secrets.len()
    }

    /// Release the secret at the current IV and advance the IV.
    ///
    /// Returns `None` when no tree exists or the tree is exhausted; the
    /// caller must then regenerate and broadcast the new root.
    pub fn release_next_secret(&mut self) -> Option<ReleasedSecret> {
        let index = self.iv as usize;
        let secret = *self.secrets.get(index)?;

        let mut auth_path = Vec::with_capacity(self.order as usize);
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            auth_path.push(level[position ^ 1]);
            position >>= 1;
        }

        self.iv += 1;
        Some(ReleasedSecret {
            index: index as u32,
            secret,
            auth_path,
        })
    }

    fn wipe(&mut self) {
        for secret in &mut self.secrets {
            secret.zeroize();
        }
        self.secrets.clear();
        self.levels.clear();
    }
}

impl Drop for AuthTree {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl std::fmt::Debug for AuthTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTree")
            .field("order", &self.order)
            .field("iv", &self.iv)
            .field("root", &hex::encode(self.root()))
            .finish()
    }
}

/// Verify a revealed secret against a committed root.
///
/// The tree order is the length of the authentication path. The candidate
/// index is read from the secret; an index below `last_iv` is a replay.
/// Returns the IV to store for the sender on success.
pub fn verify(root: &Hash, secret: &[u8; SECRET_LEN], auth_path: &[Hash], last_iv: u32) -> Option<u32> {
    let order = u32::try_from(auth_path.len()).ok()?;
    if order > MAX_TREE_ORDER {
        return None;
    }
    let index = secret_index(secret, order);
    if last_iv > 0 && last_iv > index {
        return None;
    }

    let mut current = hash_leaf(secret);
    let mut position = index;
    for sibling in auth_path {
        current = if position & 1 == 1 {
            hash_parent(sibling, &current)
        } else {
            hash_parent(&current, sibling)
        };
        position >>= 1;
    }

    (current == *root).then_some(index + 1)
}
