//! Outstanding route requests and unacknowledged replies.
//!
//! The message to retransmit lives in the timer queue; this list only counts
//! attempts per destination.

use paser_core::AddressRange;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Retry state of one outstanding request or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub dest: Ipv4Addr,
    pub tries: u32,
}

#[derive(Debug, Default)]
pub struct PendingList {
    entries: HashMap<Ipv4Addr, Pending>,
}

impl PendingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, dest: &Ipv4Addr) -> Option<&Pending> {
        self.entries.get(dest)
    }

    pub fn find_mut(&mut self, dest: &Ipv4Addr) -> Option<&mut Pending> {
        self.entries.get_mut(dest)
    }

    pub fn contains(&self, dest: &Ipv4Addr) -> bool {
        self.entries.contains_key(dest)
    }

    /// Start tracking `dest` with a fresh retry counter.
    pub fn add(&mut self, dest: Ipv4Addr) -> &mut Pending {
        let entry = self.entries.entry(dest).or_insert(Pending { dest, tries: 0 });
        entry.tries = 0;
        entry
    }

    pub fn remove(&mut self, dest: &Ipv4Addr) -> Option<Pending> {
        self.entries.remove(dest)
    }

    /// Destinations that fall inside `range`.
    pub fn find_in_range(&self, range: &AddressRange) -> Vec<Ipv4Addr> {
        let mut found: Vec<_> = self
            .entries
            .keys()
            .filter(|dest| range.contains(**dest))
            .copied()
            .collect();
        found.sort();
        found
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
