//! The PASER protocol engine of one node.
//!
//! [`PaserNode`] owns all protocol state: neighbor and routing tables, the
//! timer queue, pending requests, the data queue, the authentication tree
//! and the group key. It is driven by three inputs, all of which run to
//! completion on the caller's thread:
//!
//! - [`PaserNode::handle_incoming_message`] for datagrams on the PASER port
//! - [`PaserNode::handle_outbound_datagram`] for user traffic needing a route
//! - [`PaserNode::dispatch_due_timers`] when the earliest deadline has passed
//!
//! Message handling lives in `processing`, message construction in
//! `outbound`, timers in `maintenance` and route discovery in `discovery`.

use crate::blacklist::RerrLimiter;
use crate::error::{DropReason, MeshResult};
use crate::message::{AuthProof, KdcRequest};
use crate::neighbor::NeighborTable;
use crate::network::{Clock, ForwardingTable, KernelRoute, PositionSource, Transport};
use crate::pending::PendingList;
use crate::queue::MessageQueue;
use crate::routing::RoutingTable;
use crate::timer::{TimerKind, TimerQueue};
use paser_core::{AddressRange, GeoPosition, HopRecord, PaserConfig, BROADCAST};
use paser_crypto::{keyed_hash, AuthTree, Hash, SignatureEngine};
use std::net::Ipv4Addr;
use tracing::{debug, error, info};
use zeroize::Zeroizing;

/// External services a node is wired to.
pub struct Collaborators {
    pub engine: Box<dyn SignatureEngine>,
    pub transport: Box<dyn Transport>,
    pub kernel: Box<dyn ForwardingTable>,
    pub clock: Box<dyn Clock>,
    pub position: Box<dyn PositionSource>,
}

/// Protocol engine of a single PASER node.
pub struct PaserNode {
    pub(crate) config: PaserConfig,
    pub(crate) engine: Box<dyn SignatureEngine>,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) kernel: Box<dyn ForwardingTable>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) position: Box<dyn PositionSource>,

    pub(crate) tree: AuthTree,
    pub(crate) neighbors: NeighborTable,
    pub(crate) routes: RoutingTable,
    pub(crate) timers: TimerQueue,
    /// Route requests waiting for a reply, keyed by destination
    pub(crate) rreq_list: PendingList,
    /// UU_RREPs waiting for a TU_RREP_ACK, keyed by next hop
    pub(crate) rrep_list: PendingList,
    pub(crate) queue: MessageQueue,
    pub(crate) rerr_limiter: RerrLimiter,

    pub(crate) seq: u32,
    pub(crate) key_nr: u32,
    pub(crate) gtk: Option<Zeroizing<Vec<u8>>>,
    pub(crate) kdc_cert: Vec<u8>,
    /// KDC signature authorizing the current key epoch
    pub(crate) reset_sign: Vec<u8>,
    pub(crate) is_registered: bool,
    pub(crate) was_registered: bool,
    /// Nonce of the outstanding gateway search or KDC request
    pub(crate) gw_nonce: u32,
    pub(crate) root_repeats_left: u32,
}

impl PaserNode {
    /// Build a node and generate its first authentication tree.
    ///
    /// The first root is not broadcast; neighbors learn it from signed
    /// requests and replies.
    pub fn new(config: PaserConfig, collaborators: Collaborators) -> MeshResult<Self> {
        config
            .validate()
            .map_err(|e| crate::error::MeshError::Configuration(e.to_string()))?;

        let mut tree = AuthTree::new(config.policy.tree_order)?;
        tree.regenerate()?;

        let Collaborators {
            engine,
            transport,
            kernel,
            clock,
            position,
        } = collaborators;

        let node = Self {
            neighbors: NeighborTable::new(&config.timers),
            routes: RoutingTable::new(&config.timers),
            rerr_limiter: RerrLimiter::new(config.timers.rerr_limit_ms),
            config,
            engine,
            transport,
            kernel,
            clock,
            position,
            tree,
            timers: TimerQueue::new(),
            rreq_list: PendingList::new(),
            rrep_list: PendingList::new(),
            queue: MessageQueue::new(),
            seq: 1,
            key_nr: 0,
            gtk: None,
            kdc_cert: Vec::new(),
            reset_sign: Vec::new(),
            is_registered: false,
            was_registered: false,
            gw_nonce: 0,
            root_repeats_left: 0,
        };
        Ok(node)
    }

    /// Install the own subnets, arm the hello timer and start registering:
    /// a gateway asks the KDC directly, every other node searches a gateway.
    pub fn start(&mut self) {
        let now = self.now();
        info!(
            node = %self.address(),
            gateway = self.config.node.is_gateway,
            "starting PASER node"
        );
        self.install_own_subnets();
        if self.config.policy.hello_enabled {
            self.reset_hello_timer(now);
        }
        if self.config.node.is_gateway {
            self.request_own_registration(now);
        } else {
            self.try_to_register();
        }
    }

    /// Primary address of the node.
    pub fn address(&self) -> Ipv4Addr {
        self.config.node.address
    }

    pub fn config(&self) -> &PaserConfig {
        &self.config
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn neighbor_table(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn pending_route_requests(&self) -> &PendingList {
        &self.rreq_list
    }

    pub fn pending_replies(&self) -> &PendingList {
        &self.rrep_list
    }

    /// Number of datagrams waiting for a route.
    pub fn queued_datagrams(&self) -> usize {
        self.queue.len()
    }

    pub fn is_registered(&self) -> bool {
        self.is_registered
    }

    pub fn was_registered(&self) -> bool {
        self.was_registered
    }

    pub fn has_gtk(&self) -> bool {
        self.gtk.as_ref().map_or(false, |gtk| !gtk.is_empty())
    }

    pub fn key_nr(&self) -> u32 {
        self.key_nr
    }

    pub fn sequence_number(&self) -> u32 {
        self.seq
    }

    /// Current authentication tree root.
    pub fn root(&self) -> Hash {
        self.tree.root()
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn here(&self) -> GeoPosition {
        self.position.position()
    }

    /// True for the node address and every interface address.
    pub(crate) fn is_local(&self, addr: Ipv4Addr) -> bool {
        addr == self.address() || self.config.node.interfaces.iter().any(|i| i.addr == addr)
    }

    pub(crate) fn in_own_subnets(&self, addr: Ipv4Addr) -> bool {
        self.config.node.subnets.iter().any(|r| r.contains(addr))
    }

    pub(crate) fn own_subnets(&self) -> Vec<AddressRange> {
        self.config.node.subnets.clone()
    }

    /// Address of interface `ifindex`, falling back to the node address.
    pub(crate) fn interface_addr(&self, ifindex: u32) -> Ipv4Addr {
        self.config
            .node
            .interfaces
            .iter()
            .find(|i| i.ifindex == ifindex)
            .map_or(self.address(), |i| i.addr)
    }

    pub(crate) fn interfaces(&self) -> Vec<(u32, Ipv4Addr)> {
        self.config
            .node
            .interfaces
            .iter()
            .map(|i| (i.ifindex, i.addr))
            .collect()
    }

    /// Interface a neighbor was heard on.
    pub(crate) fn neighbor_ifindex(&self, neighbor: Ipv4Addr) -> u32 {
        self.neighbors
            .find(&neighbor)
            .map(|n| n.ifindex)
            .or_else(|| self.config.node.interfaces.first().map(|i| i.ifindex))
            .unwrap_or(0)
    }

    pub(crate) fn own_hop(&self, ifaddr: Ipv4Addr) -> HopRecord {
        HopRecord::new(ifaddr, self.own_subnets())
    }

    pub(crate) fn bump_seq(&mut self) {
        self.seq = match self.seq.wrapping_add(1) {
            0 => 1,
            next => next,
        };
    }

    pub(crate) fn gtk(&self) -> Result<&[u8], DropReason> {
        match &self.gtk {
            Some(gtk) if !gtk.is_empty() => Ok(gtk.as_slice()),
            _ => Err(DropReason::MissingGtk),
        }
    }

    pub(crate) fn keyed_hash(&self, data: &[u8]) -> Result<Hash, DropReason> {
        Ok(keyed_hash::compute(self.gtk()?, data))
    }

    /// Release the next one-time secret. An exhausted tree is replaced and
    /// the new root announced before the secret is taken from it.
    pub(crate) fn next_proof(&mut self) -> Result<AuthProof, DropReason> {
        if self.tree.is_exhausted() || !self.tree.is_ready() {
            self.regenerate_tree()
                .map_err(|e| DropReason::Crypto(e.to_string()))?;
        }
        self.tree
            .release_next_secret()
            .map(AuthProof::from)
            .ok_or(DropReason::RootNotReady)
    }

    /// Generate a new authentication tree, broadcast its root and schedule
    /// the configured repetitions.
    pub(crate) fn regenerate_tree(&mut self) -> MeshResult<()> {
        if let Err(e) = self.tree.regenerate() {
            error!(node = %self.address(), error = %e, "authentication tree regeneration failed");
            return Err(e.into());
        }
        info!(node = %self.address(), root = %hex::encode(self.tree.root()), "authentication tree regenerated");
        self.send_root();
        self.root_repeats_left = self.config.policy.root_repetitions;
        if self.root_repeats_left > 0 {
            let at = self.now() + self.config.timers.root_repetition_ms;
            self.timers.schedule(BROADCAST, TimerKind::RootRefresh, at);
        }
        Ok(())
    }

    pub(crate) fn reset_hello_timer(&mut self, now: u64) {
        if self.config.policy.hello_enabled {
            let at = now + self.config.timers.hello_interval_ms;
            self.timers.schedule(BROADCAST, TimerKind::HelloSend, at);
        }
    }

    /// Own subnets are reachable directly, at metric 1.
    pub(crate) fn install_own_subnets(&mut self) {
        let ifindex = self
            .config
            .node
            .interfaces
            .first()
            .map_or(0, |i| i.ifindex);
        for range in self.own_subnets() {
            self.kernel.install_route(KernelRoute {
                dest: range.addr,
                next_hop: Ipv4Addr::UNSPECIFIED,
                mask: range.mask,
                metric: 1,
                ifindex,
            });
        }
    }

    /// Gateway registration: ask the KDC for the GTK on its own behalf.
    pub(crate) fn request_own_registration(&mut self, now: u64) {
        self.gw_nonce = rand::random();
        let request = KdcRequest {
            src: self.address(),
            gw_addr: self.address(),
            next_hop: self.address(),
            cert: self.engine.own_certificate(),
            nonce: self.gw_nonce,
        };
        self.send_kdc_request(request);
        let kdc = self.config.node.kdc_address;
        self.timers
            .schedule(kdc, TimerKind::KdcRequest, now + self.config.timers.kdc_wait_ms);
    }

    pub(crate) fn send_kdc_request(&mut self, request: KdcRequest) {
        debug!(node = %self.address(), src = %request.src, "sending KDC request");
        let kdc = self.config.node.kdc_address;
        self.transport.send_to_kdc(kdc, request.encode());
    }

    /// Forget all routing state after a key reset. Registration flags are
    /// cleared, the gateway-search nonce is renewed and the own subnets and
    /// the hello timer are restored.
    pub(crate) fn reset_state(&mut self) {
        info!(node = %self.address(), key_nr = self.key_nr, "resetting routing state");
        self.rreq_list.clear();
        self.rrep_list.clear();
        self.routes.clear();
        self.kernel.flush();
        self.neighbors.clear();
        self.timers.clear();
        self.queue.clear();
        self.rerr_limiter.clear();
        self.gtk = None;
        self.is_registered = false;
        self.was_registered = false;
        self.root_repeats_left = 0;
        self.gw_nonce = rand::random();
        let now = self.now();
        self.reset_hello_timer(now);
        self.install_own_subnets();
    }
}
