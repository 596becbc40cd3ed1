//! Collaborators of the routing engine.
//!
//! The engine never touches sockets, the kernel routing table or the system
//! clock directly. Hosts plug in implementations of these traits; tests use
//! recording fakes.

use paser_core::GeoPosition;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

/// A user data packet waiting for, or using, a PASER route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub payload: Vec<u8>,
}

impl Datagram {
    pub fn new(src: Ipv4Addr, dest: Ipv4Addr, payload: Vec<u8>) -> Self {
        Self { src, dest, payload }
    }
}

/// A route handed to the forwarding plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelRoute {
    pub dest: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub metric: u32,
    pub ifindex: u32,
}

/// Host mask used for per-node routes.
pub const HOST_MASK: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Outbound side of the engine.
pub trait Transport {
    /// Send an encoded control message to `dest` (unicast or broadcast) on
    /// interface `ifindex`.
    fn send_control(&mut self, dest: Ipv4Addr, ifindex: u32, bytes: Vec<u8>);

    /// Send an encoded KDC request to the key distribution center.
    fn send_to_kdc(&mut self, kdc: Ipv4Addr, bytes: Vec<u8>);

    /// Release a datagram that now has a usable route.
    fn deliver(&mut self, datagram: Datagram);

    /// Report a datagram that could not be routed (host-unreachable).
    fn report_unreachable(&mut self, datagram: Datagram);
}

/// Kernel or simulated forwarding table.
pub trait ForwardingTable {
    fn install_route(&mut self, route: KernelRoute);
    fn withdraw_route(&mut self, route: KernelRoute);
    /// Remove every route the engine installed.
    fn flush(&mut self);
}

/// Millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Source of the node's current position.
pub trait PositionSource {
    fn position(&self) -> GeoPosition;
}

/// Wall clock in milliseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Fixed position taken from configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticPosition(pub GeoPosition);

impl PositionSource for StaticPosition {
    fn position(&self) -> GeoPosition {
        self.0
    }
}
