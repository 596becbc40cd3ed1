//! Simulated radio medium for multi-node tests
//!
//! Every node gets an in-memory transport and forwarding table and shares one
//! manual clock. Frames are delivered in FIFO order to the nodes linked to
//! the sender; KDC requests are answered by an in-process [`SimpleKdc`].

use paser_core::{logging, NetworkInterface, PaserConfig, BROADCAST};
use paser_crypto::{CertificateAuthority, Ed25519Engine, TrustStore, GATEWAY_MARKER, KDC_MARKER};
use paser_kdc::SimpleKdc;
use paser_mesh::network::StaticPosition;
use paser_mesh::{
    Clock, Collaborators, Datagram, DropReason, ForwardingTable, KernelRoute, MessageType, Packet,
    PaserMessage, PaserNode, Transport,
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::Ipv4Addr;
use std::rc::Rc;
use tracing::debug;

/// Address of the simulated KDC.
pub const KDC_ADDR: Ipv4Addr = Ipv4Addr::new(10, 10, 0, 1);

/// Simulation start time in milliseconds.
pub const START_MS: u64 = 1_000_000;

/// Frames stop being delivered after this many, to catch message storms.
const FRAME_BUDGET: usize = 10_000;

/// Address of simulated node `last`.
pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

/// Shared manual clock.
#[derive(Debug, Clone)]
pub struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    pub fn new(start: u64) -> Self {
        Self(Rc::new(Cell::new(start)))
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug)]
enum Outgoing {
    Control { dest: Ipv4Addr, bytes: Vec<u8> },
    Kdc { bytes: Vec<u8> },
}

#[derive(Debug, Default)]
struct RadioLog {
    outgoing: VecDeque<Outgoing>,
    delivered: Vec<Datagram>,
    unreachable: Vec<Datagram>,
}

#[derive(Debug, Default, Clone)]
struct SimRadio(Rc<RefCell<RadioLog>>);

impl Transport for SimRadio {
    fn send_control(&mut self, dest: Ipv4Addr, _ifindex: u32, bytes: Vec<u8>) {
        self.0.borrow_mut().outgoing.push_back(Outgoing::Control { dest, bytes });
    }

    fn send_to_kdc(&mut self, _kdc: Ipv4Addr, bytes: Vec<u8>) {
        self.0.borrow_mut().outgoing.push_back(Outgoing::Kdc { bytes });
    }

    fn deliver(&mut self, datagram: Datagram) {
        self.0.borrow_mut().delivered.push(datagram);
    }

    fn report_unreachable(&mut self, datagram: Datagram) {
        self.0.borrow_mut().unreachable.push(datagram);
    }
}

/// Forwarding table state of one node, keyed by (destination, mask).
#[derive(Debug, Default, Clone)]
pub struct SimKernel(Rc<RefCell<BTreeMap<(Ipv4Addr, Ipv4Addr), KernelRoute>>>);

impl SimKernel {
    pub fn route(&self, dest: Ipv4Addr, mask: Ipv4Addr) -> Option<KernelRoute> {
        self.0.borrow().get(&(dest, mask)).copied()
    }
}

impl ForwardingTable for SimKernel {
    fn install_route(&mut self, route: KernelRoute) {
        self.0.borrow_mut().insert((route.dest, route.mask), route);
    }

    fn withdraw_route(&mut self, route: KernelRoute) {
        self.0.borrow_mut().remove(&(route.dest, route.mask));
    }

    fn flush(&mut self) {
        self.0.borrow_mut().clear();
    }
}

/// A node and the handles to its simulated collaborators.
pub struct SimNode {
    pub node: PaserNode,
    pub kernel: SimKernel,
    radio: SimRadio,
}

impl SimNode {
    /// Datagrams released by the engine.
    pub fn delivered(&self) -> Vec<Datagram> {
        self.radio.0.borrow().delivered.clone()
    }

    /// Datagrams reported as unroutable.
    pub fn unreachable(&self) -> Vec<Datagram> {
        self.radio.0.borrow().unreachable.clone()
    }
}

/// A control message observed on the medium.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub from: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub message: PaserMessage,
}

/// A multi-node mesh with a KDC.
pub struct SimNetwork {
    pub ca: CertificateAuthority,
    pub clock: SimClock,
    pub kdc: SimpleKdc,
    nodes: BTreeMap<Ipv4Addr, SimNode>,
    links: BTreeSet<(Ipv4Addr, Ipv4Addr)>,
    /// Every control message sent so far
    pub transmissions: Vec<Transmission>,
    /// Every message a node dropped, with the reason
    pub drops: Vec<(Ipv4Addr, DropReason)>,
}

impl SimNetwork {
    pub fn new() -> Self {
        logging::init_test();
        let mut ca = CertificateAuthority::generate();
        let credentials = ca.issue_credentials(KDC_ADDR, KDC_MARKER, 0);
        let kdc = SimpleKdc::new(KDC_ADDR, credentials, trust(&ca));
        Self {
            ca,
            clock: SimClock::new(START_MS),
            kdc,
            nodes: BTreeMap::new(),
            links: BTreeSet::new(),
            transmissions: Vec::new(),
            drops: Vec::new(),
        }
    }

    /// Default configuration of simulated node `last`.
    pub fn config(last: u8, gateway: bool) -> PaserConfig {
        let mut config = PaserConfig::default();
        config.node.address = addr(last);
        config.node.is_gateway = gateway;
        config.node.kdc_address = KDC_ADDR;
        config.node.interfaces = vec![NetworkInterface {
            ifindex: 0,
            addr: addr(last),
            broadcast: BROADCAST,
            mask: Ipv4Addr::new(255, 255, 0, 0),
        }];
        config.policy.tree_order = 5;
        config
    }

    /// Add a node with the default configuration.
    pub fn add_node(&mut self, last: u8, gateway: bool) -> Ipv4Addr {
        self.add_node_with(Self::config(last, gateway))
    }

    /// Add a node with certificate and collaborators; it is not started.
    pub fn add_node_with(&mut self, config: PaserConfig) -> Ipv4Addr {
        let address = config.node.address;
        let marker = if config.node.is_gateway { GATEWAY_MARKER } else { "" };
        let credentials = self.ca.issue_credentials(address, marker, 0);
        let radio = SimRadio::default();
        let kernel = SimKernel::default();
        let node = PaserNode::new(
            config,
            Collaborators {
                engine: Box::new(Ed25519Engine::new(credentials, trust(&self.ca))),
                transport: Box::new(radio.clone()),
                kernel: Box::new(kernel.clone()),
                clock: Box::new(self.clock.clone()),
                position: Box::new(StaticPosition::default()),
            },
        )
        .expect("node configuration is valid");
        self.nodes.insert(address, SimNode { node, kernel, radio });
        address
    }

    pub fn link(&mut self, a: Ipv4Addr, b: Ipv4Addr) {
        self.links.insert(ordered(a, b));
    }

    pub fn unlink(&mut self, a: Ipv4Addr, b: Ipv4Addr) {
        self.links.remove(&ordered(a, b));
    }

    pub fn linked(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        self.links.contains(&ordered(a, b))
    }

    pub fn sim(&self, address: Ipv4Addr) -> &SimNode {
        &self.nodes[&address]
    }

    pub fn node(&self, address: Ipv4Addr) -> &PaserNode {
        &self.nodes[&address].node
    }

    pub fn node_mut(&mut self, address: Ipv4Addr) -> &mut PaserNode {
        &mut self.nodes.get_mut(&address).expect("unknown node").node
    }

    /// Start a node and run the medium until it is quiet.
    pub fn start(&mut self, address: Ipv4Addr) {
        self.node_mut(address).start();
        self.run();
    }

    /// Move time forward, fire due timers and run the medium.
    pub fn advance(&mut self, ms: u64) {
        self.clock.advance(ms);
        for sim in self.nodes.values_mut() {
            sim.node.dispatch_due_timers();
        }
        self.run();
    }

    /// Advance in steps of `step` until `done` holds or `limit` ms passed.
    /// Returns whether `done` was reached.
    pub fn advance_until(&mut self, step: u64, limit: u64, done: impl Fn(&Self) -> bool) -> bool {
        let mut elapsed = 0;
        while !done(self) {
            if elapsed >= limit {
                return false;
            }
            self.advance(step);
            elapsed += step;
        }
        true
    }

    /// Inject an encoded control message as if `from` had broadcast it.
    pub fn broadcast_from(&mut self, from: Ipv4Addr, bytes: Vec<u8>) {
        self.deliver_control(from, BROADCAST, bytes);
        self.run();
    }

    /// Deliver frames until no node has anything left to send.
    pub fn run(&mut self) {
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            let senders: Vec<Ipv4Addr> = self.nodes.keys().copied().collect();
            for from in senders {
                while let Some(frame) = self.next_frame(from) {
                    progressed = true;
                    delivered += 1;
                    assert!(delivered < FRAME_BUDGET, "message storm in simulated mesh");
                    match frame {
                        Outgoing::Control { dest, bytes } => self.deliver_control(from, dest, bytes),
                        Outgoing::Kdc { bytes } => self.deliver_to_kdc(from, bytes),
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// Control messages of `kind` sent by `from`.
    pub fn sent_by(&self, from: Ipv4Addr, kind: MessageType) -> Vec<&PaserMessage> {
        self.transmissions
            .iter()
            .filter(|t| t.from == from && t.message.kind() == kind)
            .map(|t| &t.message)
            .collect()
    }

    /// Drops whose reason is security relevant.
    pub fn security_drops(&self) -> Vec<&(Ipv4Addr, DropReason)> {
        self.drops
            .iter()
            .filter(|(_, reason)| reason.is_security_relevant())
            .collect()
    }

    fn next_frame(&self, from: Ipv4Addr) -> Option<Outgoing> {
        self.nodes[&from].radio.0.borrow_mut().outgoing.pop_front()
    }

    fn deliver_control(&mut self, from: Ipv4Addr, dest: Ipv4Addr, bytes: Vec<u8>) {
        if let Ok(Packet::Control(message)) = Packet::decode(&bytes) {
            self.transmissions.push(Transmission { from, dest, message });
        }
        let receivers: Vec<Ipv4Addr> = if dest == BROADCAST {
            self.nodes
                .keys()
                .copied()
                .filter(|&to| to != from && self.linked(from, to))
                .collect()
        } else if self.linked(from, dest) {
            vec![dest]
        } else {
            debug!(from = %from, dest = %dest, "frame lost, no link");
            Vec::new()
        };
        for to in receivers {
            let sim = self.nodes.get_mut(&to).expect("linked node exists");
            if let Err(reason) = sim.node.handle_incoming_message(&bytes, 0) {
                self.drops.push((to, reason));
            }
        }
    }

    fn deliver_to_kdc(&mut self, from: Ipv4Addr, bytes: Vec<u8>) {
        let now = self.clock.now_ms();
        match self.kdc.handle_datagram(&bytes, now) {
            Ok((gateway, reply)) => {
                if let Some(sim) = self.nodes.get_mut(&gateway) {
                    if let Err(reason) = sim.node.handle_incoming_message(&reply, 0) {
                        self.drops.push((gateway, reason));
                    }
                }
            }
            Err(e) => debug!(from = %from, error = %e, "KDC refused request"),
        }
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn trust(ca: &CertificateAuthority) -> TrustStore {
    TrustStore::new(ca.public_key()).expect("CA key is valid")
}

fn ordered(a: Ipv4Addr, b: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Build the chain `gateway(1) - 2 - 3 - ... - last` and register every node
/// in order.
pub fn registered_chain(last: u8) -> SimNetwork {
    let mut net = SimNetwork::new();
    let gateway = net.add_node(1, true);
    net.start(gateway);
    for n in 2..=last {
        let node = net.add_node(n, false);
        net.link(addr(n - 1), node);
        net.start(node);
        assert!(net.node(node).is_registered(), "node {node} failed to register");
    }
    net
}
