//! Host-side collaborators of the protocol engine.

use paser_core::NetworkInterface;
use paser_mesh::{Datagram, ForwardingTable, KernelRoute, Transport};
use std::cell::RefCell;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::rc::Rc;
use tracing::{debug, info};

/// A datagram the engine asked the host to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub dest: Ipv4Addr,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Outbox {
    pub packets: Vec<Outgoing>,
}

/// Transport that collects outgoing packets until the event loop flushes
/// them to the socket.
#[derive(Debug, Default, Clone)]
pub struct OutboxTransport(pub Rc<RefCell<Outbox>>);

impl OutboxTransport {
    pub fn drain(&self) -> Vec<Outgoing> {
        std::mem::take(&mut self.0.borrow_mut().packets)
    }
}

impl Transport for OutboxTransport {
    fn send_control(&mut self, dest: Ipv4Addr, _ifindex: u32, bytes: Vec<u8>) {
        self.0.borrow_mut().packets.push(Outgoing { dest, bytes });
    }

    fn send_to_kdc(&mut self, kdc: Ipv4Addr, bytes: Vec<u8>) {
        self.0.borrow_mut().packets.push(Outgoing { dest: kdc, bytes });
    }

    fn deliver(&mut self, datagram: Datagram) {
        debug!(src = %datagram.src, dest = %datagram.dest, len = datagram.payload.len(), "datagram released");
    }

    fn report_unreachable(&mut self, datagram: Datagram) {
        info!(src = %datagram.src, dest = %datagram.dest, "destination unreachable");
    }
}

/// Forwarding table that only logs route changes and remembers the live set.
#[derive(Debug, Default)]
pub struct LoggingForwardingTable {
    routes: HashSet<KernelRoute>,
}

impl LoggingForwardingTable {
    /// Number of routes currently installed.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl ForwardingTable for LoggingForwardingTable {
    fn install_route(&mut self, route: KernelRoute) {
        if !self.routes.insert(route) {
            debug!(dest = %route.dest, next_hop = %route.next_hop, "route already installed");
            return;
        }
        info!(
            dest = %route.dest,
            mask = %route.mask,
            next_hop = %route.next_hop,
            metric = route.metric,
            ifindex = route.ifindex,
            "route installed"
        );
    }

    fn withdraw_route(&mut self, route: KernelRoute) {
        if self.routes.remove(&route) {
            info!(dest = %route.dest, mask = %route.mask, next_hop = %route.next_hop, "route withdrawn");
        }
    }

    fn flush(&mut self) {
        info!(routes = self.routes.len(), "forwarding table flushed");
        self.routes.clear();
    }
}

/// Interface whose network contains `src`; the first interface otherwise.
pub fn ifindex_for(interfaces: &[NetworkInterface], src: Ipv4Addr) -> u32 {
    interfaces
        .iter()
        .find(|i| u32::from(i.addr) & u32::from(i.mask) == u32::from(src) & u32::from(i.mask))
        .or_else(|| interfaces.first())
        .map_or(0, |i| i.ifindex)
}
