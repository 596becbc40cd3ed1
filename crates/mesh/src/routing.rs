//! PASER routing table.
//!
//! One entry per known destination. Entries carry the next hop, the hop
//! count, the destination's last sequence number and the subnets behind it.
//! Every change is mirrored into the [`ForwardingTable`]: a host route for
//! the destination and one route per subnet at `hop_count + 1`.
//!
//! The table never sends messages; it only needs the neighbor table to
//! judge whether a next hop is trusted.

use crate::neighbor::NeighborTable;
use crate::network::{ForwardingTable, KernelRoute, HOST_MASK};
use crate::timer::{TimerKind, TimerQueue};
use paser_core::{is_seq_new, AddressRange, HopRecord, TimerConfig, UnreachableBlock, BROADCAST};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Route to a single destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    /// Destination node
    pub dest: Ipv4Addr,
    /// Neighbor packets for `dest` are handed to
    pub next_hop: Ipv4Addr,
    /// Last known sequence number of `dest`, 0 when unknown
    pub seq: u32,
    /// Number of hops to `dest`
    pub hop_count: u32,
    /// `dest` is a gateway
    pub is_gateway: bool,
    /// Route may be used for forwarding
    pub is_valid: bool,
    /// Subnets behind `dest`
    pub ranges: Vec<AddressRange>,
    /// Certificate of `dest`, when one was received
    pub cert: Option<Vec<u8>>,
    /// Interface towards `next_hop`
    pub ifindex: u32,
}

impl RoutingEntry {
    fn host_route(&self) -> KernelRoute {
        KernelRoute {
            dest: self.dest,
            next_hop: self.next_hop,
            mask: HOST_MASK,
            metric: self.hop_count,
            ifindex: self.ifindex,
        }
    }

    fn subnet_routes(&self) -> impl Iterator<Item = KernelRoute> + '_ {
        self.ranges.iter().map(move |range| KernelRoute {
            dest: range.addr,
            next_hop: self.next_hop,
            mask: range.mask,
            metric: self.hop_count + 1,
            ifindex: self.ifindex,
        })
    }

    /// Host and subnet routes a valid entry keeps in the forwarding table.
    fn kernel_routes(&self) -> Vec<KernelRoute> {
        if !self.is_valid {
            return Vec::new();
        }
        let mut routes = vec![self.host_route()];
        routes.extend(self.subnet_routes());
        routes
    }

    fn default_route(&self) -> KernelRoute {
        KernelRoute {
            dest: Ipv4Addr::UNSPECIFIED,
            next_hop: self.next_hop,
            mask: Ipv4Addr::UNSPECIFIED,
            metric: self.hop_count + 1,
            ifindex: self.ifindex,
        }
    }

    fn unreachable(&self) -> UnreachableBlock {
        UnreachableBlock {
            addr: self.dest,
            seq: self.seq,
        }
    }
}

/// Information learned about a destination from a route request or reply.
#[derive(Debug, Clone)]
pub struct RouteUpdate {
    pub dest: Ipv4Addr,
    pub seq: u32,
    pub next_hop: Ipv4Addr,
    /// Hops between the next hop and `dest`; the entry stores `metric + 1`
    pub metric: u32,
    pub ifindex: u32,
    pub ranges: Vec<AddressRange>,
    pub cert: Option<Vec<u8>>,
    pub gateway: bool,
}

/// Forwarding routes derived from one entry and the best gateway.
struct KernelSnapshot {
    routes: Vec<KernelRoute>,
    default: Option<KernelRoute>,
}

/// Routing table keyed by destination.
#[derive(Debug)]
pub struct RoutingTable {
    entries: HashMap<Ipv4Addr, RoutingEntry>,
    delete_ms: u64,
    valid_ms: u64,
}

impl RoutingTable {
    pub fn new(timers: &TimerConfig) -> Self {
        Self {
            entries: HashMap::new(),
            delete_ms: timers.route_delete_ms,
            valid_ms: timers.route_valid_ms,
        }
    }

    /// Exact lookup by destination.
    pub fn find(&self, dest: &Ipv4Addr) -> Option<&RoutingEntry> {
        self.entries.get(dest)
    }

    /// Entry whose subnets contain `addr`; valid and shorter routes win.
    pub fn find_by_subnet(&self, addr: Ipv4Addr) -> Option<&RoutingEntry> {
        self.entries
            .values()
            .filter(|e| e.ranges.iter().any(|r| r.contains(addr)))
            .min_by_key(|e| (!e.is_valid, e.hop_count, u32::from(e.dest)))
    }

    /// Lookup used for forwarding: the best gateway for the broadcast
    /// address, otherwise the destination itself or a subnet owner.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&RoutingEntry> {
        if addr == BROADCAST {
            return self.best_gateway();
        }
        self.find(&addr).or_else(|| self.find_by_subnet(addr))
    }

    /// Closest valid gateway.
    pub fn best_gateway(&self) -> Option<&RoutingEntry> {
        self.entries
            .values()
            .filter(|e| e.is_gateway && e.is_valid)
            .min_by_key(|e| (e.hop_count, u32::from(e.dest)))
    }

    /// Destinations currently routed through `next_hop`.
    pub fn destinations_via(&self, next_hop: Ipv4Addr) -> Vec<Ipv4Addr> {
        let mut dests: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.next_hop == next_hop)
            .map(|e| e.dest)
            .collect();
        dests.sort();
        dests
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries; the caller clears timers and the forwarding table.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn arm(&self, timers: &mut TimerQueue, dest: Ipv4Addr, now: u64) {
        timers.schedule(dest, TimerKind::RouteValid, now + self.valid_ms);
        timers.schedule(dest, TimerKind::RouteDelete, now + self.delete_ms);
    }

    fn snapshot(&self, dest: Ipv4Addr) -> KernelSnapshot {
        KernelSnapshot {
            routes: self
                .entries
                .get(&dest)
                .map(RoutingEntry::kernel_routes)
                .unwrap_or_default(),
            default: self.best_gateway().map(RoutingEntry::default_route),
        }
    }

    /// Bring the forwarding table in line with the entry for `dest` after it
    /// changed. Only routes that differ from `before` are withdrawn or
    /// installed, and the default route follows the best gateway.
    fn commit(&self, kernel: &mut dyn ForwardingTable, dest: Ipv4Addr, before: KernelSnapshot) {
        let after = self.snapshot(dest);
        for route in before.routes.iter().filter(|r| !after.routes.contains(r)) {
            kernel.withdraw_route(*route);
        }
        for route in after.routes.iter().filter(|r| !before.routes.contains(r)) {
            kernel.install_route(*route);
        }
        if before.default != after.default {
            if let Some(route) = before.default {
                kernel.withdraw_route(route);
            }
            if let Some(route) = after.default {
                kernel.install_route(route);
            }
        }
    }

    /// Apply what a request or reply taught us about a destination.
    ///
    /// An existing route through a trusted neighbor is kept when it is valid,
    /// not longer than the offered one and the offered sequence number is not
    /// fresher; only its certificate and lifetime are refreshed then.
    pub fn insert_or_update(
        &mut self,
        neighbors: &NeighborTable,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        now: u64,
        update: RouteUpdate,
    ) {
        let dest = update.dest;
        let hop_count = update.metric + 1;
        self.arm(timers, dest, now);
        let before = self.snapshot(dest);

        match self.entries.get_mut(&dest) {
            None => {
                self.entries.insert(
                    dest,
                    RoutingEntry {
                        dest,
                        next_hop: update.next_hop,
                        seq: update.seq,
                        hop_count,
                        is_gateway: update.gateway,
                        is_valid: true,
                        ranges: update.ranges,
                        cert: update.cert,
                        ifindex: update.ifindex,
                    },
                );
            }
            Some(existing) => {
                let incumbent_trusted = neighbors
                    .find(&existing.next_hop)
                    .map_or(false, |n| n.trusted);
                let keep = incumbent_trusted
                    && existing.hop_count <= hop_count
                    && existing.is_valid
                    && update.seq != 0
                    && !is_seq_new(existing.seq, update.seq);
                if update.cert.is_some() {
                    existing.cert = update.cert;
                }
                if !keep {
                    existing.next_hop = update.next_hop;
                    existing.hop_count = hop_count;
                    if update.seq != 0 {
                        existing.seq = update.seq;
                    }
                    existing.is_gateway |= update.gateway;
                    existing.ranges = update.ranges;
                    existing.is_valid = true;
                    existing.ifindex = update.ifindex;
                }
            }
        }
        self.commit(kernel, dest, before);
    }

    /// Turn the entry for a neighbor into a one-hop route.
    pub fn make_one_hop(&mut self, kernel: &mut dyn ForwardingTable, neighbor: Ipv4Addr, ifindex: u32) {
        let before = self.snapshot(neighbor);
        let Some(entry) = self.entries.get_mut(&neighbor) else {
            return;
        };
        entry.next_hop = neighbor;
        entry.hop_count = 1;
        entry.ifindex = ifindex;
        self.commit(kernel, neighbor, before);
    }

    /// Revalidate a neighbor's route after a message arrived directly from it.
    pub fn refresh_timeout(
        &mut self,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        dest: Ipv4Addr,
        now: u64,
        ifindex: u32,
    ) {
        let before = self.snapshot(dest);
        let Some(entry) = self.entries.get_mut(&dest) else {
            return;
        };
        entry.is_valid = true;
        entry.next_hop = dest;
        entry.hop_count = 1;
        entry.ifindex = ifindex;
        self.arm(timers, dest, now);
        self.commit(kernel, dest, before);
    }

    /// Revalidate a route and record the destination's newer sequence number.
    pub fn refresh_timeout_with_seq(
        &mut self,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        dest: Ipv4Addr,
        seq: u32,
        now: u64,
    ) {
        let before = self.snapshot(dest);
        let Some(entry) = self.entries.get_mut(&dest) else {
            return;
        };
        entry.is_valid = true;
        if seq != 0 {
            entry.seq = seq;
        }
        self.arm(timers, dest, now);
        self.commit(kernel, dest, before);
    }

    pub fn set_seq(&mut self, dest: Ipv4Addr, seq: u32) {
        if let Some(entry) = self.entries.get_mut(&dest) {
            entry.seq = seq;
        }
    }

    /// Install routes for every hop of an accumulated route through a trusted
    /// forwarder. The last hop is one hop away, the first `route.len()` hops.
    /// Hops already reachable in as few hops keep their route.
    pub fn bulk_update(
        &mut self,
        neighbors: &NeighborTable,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        now: u64,
        route: &[HopRecord],
        forwarder: Ipv4Addr,
        ifindex: u32,
    ) {
        if !neighbors.is_trusted_and_valid(&forwarder) {
            return;
        }
        let mut hop_count = route.len() as u32 + 1;
        for hop in route {
            hop_count -= 1;
            let before = self.snapshot(hop.addr);
            match self.entries.get_mut(&hop.addr) {
                Some(entry) if entry.hop_count <= hop_count => continue,
                Some(entry) => {
                    entry.next_hop = forwarder;
                    entry.hop_count = hop_count;
                    entry.ranges = hop.ranges.clone();
                    entry.is_valid = true;
                    entry.ifindex = ifindex;
                }
                None => {
                    self.entries.insert(
                        hop.addr,
                        RoutingEntry {
                            dest: hop.addr,
                            next_hop: forwarder,
                            seq: 0,
                            hop_count,
                            is_gateway: false,
                            is_valid: true,
                            ranges: hop.ranges.clone(),
                            cert: None,
                            ifindex,
                        },
                    );
                }
            }
            self.arm(timers, hop.addr, now);
            self.commit(kernel, hop.addr, before);
        }
    }

    /// Withdraw a route from the forwarding table and mark it invalid. A
    /// non-zero `seq` is stored as the destination's latest number.
    pub fn mark_unreachable(
        &mut self,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        dest: Ipv4Addr,
        seq: u32,
    ) -> Option<UnreachableBlock> {
        let before = self.snapshot(dest);
        let entry = self.entries.get_mut(&dest)?;
        entry.is_valid = false;
        if seq != 0 {
            entry.seq = seq;
        }
        let block = entry.unreachable();
        timers.remove(dest, TimerKind::RouteValid);
        self.commit(kernel, dest, before);
        Some(block)
    }

    /// Invalidate every route through `next_hop`, the neighbor itself and the
    /// route to it. Returns the destinations that became unreachable.
    pub fn withdraw_all_via(
        &mut self,
        neighbors: &mut NeighborTable,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        next_hop: Ipv4Addr,
    ) -> Vec<UnreachableBlock> {
        let mut lost = Vec::new();
        for dest in self.destinations_via(next_hop) {
            if let Some(block) = self.mark_unreachable(timers, kernel, dest, 0) {
                lost.push(block);
            }
        }
        neighbors.mark_invalid(timers, next_hop);
        if self.entries.get(&next_hop).map_or(false, |e| e.next_hop != next_hop) {
            if let Some(block) = self.mark_unreachable(timers, kernel, next_hop, 0) {
                lost.push(block);
            }
        }
        lost
    }

    /// Remove an entry together with its timers and forwarding routes.
    pub fn remove(
        &mut self,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        dest: Ipv4Addr,
    ) -> Option<RoutingEntry> {
        timers.remove(dest, TimerKind::RouteValid);
        timers.remove(dest, TimerKind::RouteDelete);
        let before = self.snapshot(dest);
        let entry = self.entries.remove(&dest);
        self.commit(kernel, dest, before);
        entry
    }

    /// Remove every route through `next_hop` and withdraw it.
    pub fn remove_via(&mut self, timers: &mut TimerQueue, kernel: &mut dyn ForwardingTable, next_hop: Ipv4Addr) {
        for dest in self.destinations_via(next_hop) {
            self.remove(timers, kernel, dest);
        }
    }

    /// Extend the lifetime of the route used by data traffic to `dest`. When
    /// hellos are disabled the next hop is refreshed too.
    pub fn update_route_lifetimes(
        &mut self,
        neighbors: &mut NeighborTable,
        timers: &mut TimerQueue,
        dest: Ipv4Addr,
        now: u64,
        hello_enabled: bool,
    ) {
        let Some(entry) = self.lookup(dest).filter(|e| e.is_valid) else {
            return;
        };
        let (dest, next_hop) = (entry.dest, entry.next_hop);
        self.arm(timers, dest, now);
        if hello_enabled {
            return;
        }
        if neighbors.find(&next_hop).map_or(false, |n| n.is_valid) {
            neighbors.refresh_timeout(timers, next_hop, now);
        }
        if self.entries.get(&next_hop).map_or(false, |e| e.is_valid) {
            self.arm(timers, next_hop, now);
        }
    }

    /// Neighbor list for a B_HELLO: every valid one-hop route through a
    /// trusted, valid neighbor, followed by `own`.
    pub fn hello_neighbor_list(&self, neighbors: &NeighborTable, own: HopRecord) -> Vec<HopRecord> {
        let mut list: Vec<HopRecord> = self
            .entries
            .values()
            .filter(|e| e.is_valid && e.hop_count == 1)
            .filter(|e| neighbors.is_trusted_and_valid(&e.next_hop))
            .map(|e| HopRecord::new(e.dest, e.ranges.clone()))
            .collect();
        list.sort_by_key(|h| u32::from(h.addr));
        list.push(own);
        list
    }

    /// Refresh the one-hop route to the sender of a B_HELLO.
    pub fn update_neighbor_from_hello(
        &mut self,
        neighbors: &mut NeighborTable,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        record: &HopRecord,
        now: u64,
    ) {
        let before = self.snapshot(record.addr);
        let Some(entry) = self.entries.get_mut(&record.addr) else {
            return;
        };
        let next_hop = entry.next_hop;
        if neighbors.find(&next_hop).is_none() {
            return;
        }
        entry.hop_count = 1;
        entry.ranges = record.ranges.clone();
        entry.is_valid = true;
        self.arm(timers, record.addr, now);
        self.commit(kernel, record.addr, before);
        neighbors.refresh_timeout(timers, next_hop, now);
    }

    /// Learn a two-hop route from a neighbor's B_HELLO, unless a valid
    /// one-hop route through a trusted neighbor already exists.
    pub fn update_route_from_hello(
        &mut self,
        neighbors: &NeighborTable,
        timers: &mut TimerQueue,
        kernel: &mut dyn ForwardingTable,
        record: &HopRecord,
        via: Ipv4Addr,
        now: u64,
        ifindex: u32,
    ) {
        let before = self.snapshot(record.addr);
        match self.entries.get_mut(&record.addr) {
            Some(entry)
                if entry.hop_count == 1
                    && entry.is_valid
                    && neighbors.is_trusted_and_valid(&entry.next_hop) =>
            {
                return;
            }
            Some(entry) => {
                entry.next_hop = via;
                entry.hop_count = 2;
                entry.ranges = record.ranges.clone();
                entry.is_valid = true;
                entry.ifindex = ifindex;
            }
            None => {
                self.entries.insert(
                    record.addr,
                    RoutingEntry {
                        dest: record.addr,
                        next_hop: via,
                        seq: 0,
                        hop_count: 2,
                        is_gateway: false,
                        is_valid: true,
                        ranges: record.ranges.clone(),
                        cert: None,
                        ifindex,
                    },
                );
            }
        }
        self.arm(timers, record.addr, now);
        self.commit(kernel, record.addr, before);
    }
}
