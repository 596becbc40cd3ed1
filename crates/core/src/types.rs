//! Core types shared by every PASER crate.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Well-known UDP port for PASER control traffic and the KDC exchange.
pub const PASER_PORT: u16 = 653;

/// Length of a one-time authentication secret in bytes.
pub const SECRET_LEN: usize = 32;

/// Limited broadcast address; also the destination key of gateway searches.
pub const BROADCAST: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Largest sequence number.
pub const MAXSEQ: u32 = u32::MAX;

/// Geographic position of a node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPosition {
    /// Latitude (or x coordinate in a planar deployment)
    pub lat: f64,
    /// Longitude (or y coordinate in a planar deployment)
    pub lon: f64,
}

impl GeoPosition {
    /// Create a new position.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Squared euclidean distance to another position.
    pub fn distance_squared(&self, other: &GeoPosition) -> f64 {
        let dl = self.lat - other.lat;
        let dn = self.lon - other.lon;
        dl * dl + dn * dn
    }

    /// True when `other` lies within `radius` of this position.
    pub fn within(&self, other: &GeoPosition, radius: f64) -> bool {
        self.distance_squared(other) <= radius * radius
    }
}

/// A subnet reachable through a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    /// Network address
    pub addr: Ipv4Addr,
    /// Network mask
    pub mask: Ipv4Addr,
}

impl AddressRange {
    /// Create a new range.
    pub fn new(addr: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self { addr, mask }
    }

    /// Masked containment test.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(addr) & mask == u32::from(self.addr) & mask
    }
}

/// One hop of an accumulated route: the forwarder and the subnets behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRecord {
    /// Address of the forwarding node
    pub addr: Ipv4Addr,
    /// Subnets reachable through that node
    pub ranges: Vec<AddressRange>,
}

impl HopRecord {
    /// Create a new hop record.
    pub fn new(addr: Ipv4Addr, ranges: Vec<AddressRange>) -> Self {
        Self { addr, ranges }
    }
}

/// An address reported unreachable together with its last known sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreachableBlock {
    /// Unreachable destination
    pub addr: Ipv4Addr,
    /// Sequence number of the destination, 0 when unknown
    pub seq: u32,
}

/// A local network interface used for PASER traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Interface index
    pub ifindex: u32,
    /// Address assigned to the interface
    pub addr: Ipv4Addr,
    /// Broadcast address of the interface
    pub broadcast: Ipv4Addr,
    /// Network mask of the interface
    pub mask: Ipv4Addr,
}

impl NetworkInterface {
    /// True when `addr` is inside the interface's subnet.
    pub fn in_subnet(&self, addr: Ipv4Addr) -> bool {
        AddressRange::new(self.addr, self.mask).contains(addr)
    }
}
