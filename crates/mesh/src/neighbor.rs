//! One-hop neighbor table.
//!
//! A neighbor becomes *trusted* once a signed reply or acknowledgement has
//! been exchanged with it. Only trusted neighbors may carry GTK-protected
//! traffic. Each entry keeps the neighbor's authentication tree root and the
//! next secret index it is allowed to reveal.

use crate::timer::{TimerKind, TimerQueue};
use paser_core::{GeoPosition, TimerConfig};
use paser_crypto::Hash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// State kept for a one-hop neighbor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub addr: Ipv4Addr,
    /// Link was confirmed by a signed exchange
    pub trusted: bool,
    /// Authentication tree root of the neighbor
    pub root: Hash,
    /// Next secret index the neighbor may use
    pub iv: u32,
    pub position: GeoPosition,
    /// Certificate of the neighbor
    pub cert: Vec<u8>,
    pub is_valid: bool,
    pub ifindex: u32,
}

/// Fields learned from a signed message of the neighbor.
#[derive(Debug, Clone)]
pub struct NeighborUpdate {
    pub addr: Ipv4Addr,
    pub trusted: bool,
    pub root: Hash,
    pub iv: u32,
    pub position: GeoPosition,
    pub cert: Vec<u8>,
    pub ifindex: u32,
}

/// Neighbor table keyed by address.
#[derive(Debug)]
pub struct NeighborTable {
    entries: HashMap<Ipv4Addr, NeighborEntry>,
    delete_ms: u64,
    valid_ms: u64,
}

impl NeighborTable {
    pub fn new(timers: &TimerConfig) -> Self {
        Self {
            entries: HashMap::new(),
            delete_ms: timers.neighbor_delete_ms,
            valid_ms: timers.neighbor_valid_ms,
        }
    }

    pub fn find(&self, addr: &Ipv4Addr) -> Option<&NeighborEntry> {
        self.entries.get(addr)
    }

    /// True when `addr` is a valid, trusted neighbor.
    pub fn is_trusted_and_valid(&self, addr: &Ipv4Addr) -> bool {
        self.entries
            .get(addr)
            .map_or(false, |n| n.trusted && n.is_valid)
    }

    /// Insert a neighbor or refresh it from a signed message.
    ///
    /// An entry whose valid timer already expired loses its trust unless the
    /// update itself comes from a trust-establishing exchange.
    pub fn insert_or_update(&mut self, timers: &mut TimerQueue, now: u64, update: NeighborUpdate) {
        let addr = update.addr;
        let trusted = match self.entries.get(&addr) {
            Some(existing) => {
                let expired = !timers.contains(addr, TimerKind::NeighborValid);
                if expired || update.trusted {
                    timers.schedule(addr, TimerKind::NeighborValid, now + self.valid_ms);
                }
                (existing.trusted && !expired) || update.trusted
            }
            None => {
                timers.schedule(addr, TimerKind::NeighborValid, now + self.valid_ms);
                update.trusted
            }
        };
        timers.schedule(addr, TimerKind::NeighborDelete, now + self.delete_ms);

        self.entries.insert(
            addr,
            NeighborEntry {
                addr,
                trusted,
                root: update.root,
                iv: update.iv,
                position: update.position,
                cert: update.cert,
                is_valid: true,
                ifindex: update.ifindex,
            },
        );
    }

    /// Extend the lifetime of a neighbor.
    pub fn refresh_timeout(&mut self, timers: &mut TimerQueue, addr: Ipv4Addr, now: u64) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.is_valid = true;
            timers.schedule(addr, TimerKind::NeighborValid, now + self.valid_ms);
            timers.schedule(addr, TimerKind::NeighborDelete, now + self.delete_ms);
        }
    }

    /// Store the next allowed secret index after a verified secret.
    pub fn set_iv(&mut self, addr: Ipv4Addr, iv: u32) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.iv = iv;
        }
    }

    /// Store the next allowed secret index and mark the neighbor valid.
    pub fn set_iv_and_mark_valid(&mut self, addr: Ipv4Addr, iv: u32) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.iv = iv;
            entry.is_valid = true;
        }
    }

    /// Install a freshly announced authentication tree.
    pub fn replace_root(&mut self, addr: Ipv4Addr, root: Hash, iv: u32) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.root = root;
            entry.iv = iv;
        }
    }

    pub fn set_trusted(&mut self, addr: Ipv4Addr) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.trusted = true;
        }
    }

    /// Mark a neighbor unusable and stop its valid timer.
    pub fn mark_invalid(&mut self, timers: &mut TimerQueue, addr: Ipv4Addr) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.is_valid = false;
            timers.remove(addr, TimerKind::NeighborValid);
        }
    }

    /// Remove a neighbor together with its timers.
    pub fn remove(&mut self, timers: &mut TimerQueue, addr: Ipv4Addr) -> Option<NeighborEntry> {
        timers.remove(addr, TimerKind::NeighborValid);
        timers.remove(addr, TimerKind::NeighborDelete);
        self.entries.remove(&addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
