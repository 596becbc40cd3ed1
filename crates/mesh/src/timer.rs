//! Single time-ordered timer queue.
//!
//! Every protocol timer is identified by a destination address and a
//! [`TimerKind`]; adding a timer with an existing key replaces it. Timers
//! that drive retransmissions own the message to resend.

use crate::message::PaserMessage;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;

/// Purpose of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Resend the gateway's own KDC request
    KdcRequest,
    /// Retransmit a pending route request
    RouteDiscovery,
    /// Remove a routing entry
    RouteDelete,
    /// Mark a routing entry invalid
    RouteValid,
    /// Remove a neighbor entry
    NeighborDelete,
    /// Mark a neighbor entry invalid
    NeighborValid,
    /// Retransmit an unacknowledged UU_RREP
    ReplyAckTimeout,
    /// Send the next B_HELLO
    HelloSend,
    /// Repeat the B_ROOT broadcast
    RootRefresh,
}

/// Key of a timer in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    pub dest: Ipv4Addr,
    pub kind: TimerKind,
}

impl TimerKey {
    pub fn new(dest: Ipv4Addr, kind: TimerKind) -> Self {
        Self { dest, kind }
    }
}

/// A scheduled timer.
#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub key: TimerKey,
    /// Absolute expiry in milliseconds
    pub fire_at: u64,
    /// Message owned by a retransmission timer
    pub payload: Option<PaserMessage>,
    serial: u64,
}

/// Timer queue ordered by expiry, ties broken by insertion order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    by_key: HashMap<TimerKey, TimerEntry>,
    by_time: BTreeSet<(u64, u64, TimerKey)>,
    next_serial: u64,
}

impl TimerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer, replacing any timer with the same key.
    pub fn add(&mut self, dest: Ipv4Addr, kind: TimerKind, fire_at: u64, payload: Option<PaserMessage>) {
        let key = TimerKey::new(dest, kind);
        self.remove_key(&key);
        let serial = self.next_serial;
        self.next_serial += 1;
        self.by_time.insert((fire_at, serial, key));
        self.by_key.insert(
            key,
            TimerEntry {
                key,
                fire_at,
                payload,
                serial,
            },
        );
    }

    /// Schedule a timer without payload.
    pub fn schedule(&mut self, dest: Ipv4Addr, kind: TimerKind, fire_at: u64) {
        self.add(dest, kind, fire_at, None);
    }

    /// Cancel a timer and hand back its entry.
    pub fn remove(&mut self, dest: Ipv4Addr, kind: TimerKind) -> Option<TimerEntry> {
        self.remove_key(&TimerKey::new(dest, kind))
    }

    fn remove_key(&mut self, key: &TimerKey) -> Option<TimerEntry> {
        let entry = self.by_key.remove(key)?;
        self.by_time.remove(&(entry.fire_at, entry.serial, entry.key));
        Some(entry)
    }

    pub fn contains(&self, dest: Ipv4Addr, kind: TimerKind) -> bool {
        self.by_key.contains_key(&TimerKey::new(dest, kind))
    }

    pub fn get(&self, dest: Ipv4Addr, kind: TimerKind) -> Option<&TimerEntry> {
        self.by_key.get(&TimerKey::new(dest, kind))
    }

    /// Earliest expiry in the queue.
    pub fn next_deadline(&self) -> Option<u64> {
        self.by_time.iter().next().map(|(fire_at, _, _)| *fire_at)
    }

    /// Remove and return the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<TimerEntry> {
        let (fire_at, _, key) = *self.by_time.iter().next()?;
        if fire_at > now {
            return None;
        }
        self.remove_key(&key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Drop every timer and its payload.
    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_time.clear();
    }
}
