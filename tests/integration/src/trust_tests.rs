//! Link trust and hello-based route maintenance.

use crate::test_utils::{addr, registered_chain, SimNetwork};
use paser_mesh::network::HOST_MASK;
use paser_mesh::{Datagram, DropReason, MessageType, OutboundDisposition};

fn forged(reason: &DropReason) -> bool {
    matches!(
        reason,
        DropReason::Signature { .. }
            | DropReason::Certificate { .. }
            | DropReason::KeyedHash { .. }
            | DropReason::AuthPath { .. }
            | DropReason::Timestamp { .. }
    )
}

#[test]
fn test_chain_links_are_trusted_both_ways() {
    let net = registered_chain(3);
    for (a, b) in [(1, 2), (2, 3)] {
        let left = net.node(addr(a)).neighbor_table().find(&addr(b)).unwrap();
        let right = net.node(addr(b)).neighbor_table().find(&addr(a)).unwrap();
        assert!(left.trusted, "{a} does not trust {b}");
        assert!(right.trusted, "{b} does not trust {a}");
    }
}

#[test]
fn test_registered_neighbors_promote_link_to_trusted() {
    // b(3) and c(4) both register through a(2) before they can hear each other.
    let mut net = registered_chain(3);
    let (b, c) = (addr(3), addr(4));
    net.add_node(4, false);
    net.link(addr(2), c);
    net.start(c);
    assert!(net.node(c).is_registered());
    assert!(net.node(b).neighbor_table().find(&c).is_none());

    net.link(b, c);
    net.node_mut(b).route_discovery(c, false);
    net.run();

    assert!(net.node(b).neighbor_table().find(&c).unwrap().trusted);
    assert!(net.node(c).neighbor_table().find(&b).unwrap().trusted);
    let route = net.node(b).routing_table().find(&c).unwrap();
    assert!(route.is_valid);
    assert_eq!(route.hop_count, 1);
    assert_eq!(route.next_hop, c);
    let installed = net.sim(b).kernel.route(c, HOST_MASK).expect("host route to c");
    assert_eq!(installed.next_hop, c);
    assert_eq!(net.sent_by(b, MessageType::TuRrepAck).len(), 1);
}

#[test]
fn test_hellos_keep_routes_alive() {
    let mut net = registered_chain(3);

    // Well past the route and neighbor lifetimes.
    for _ in 0..20 {
        net.advance(1000);
    }

    assert!(!net.sent_by(addr(2), MessageType::BHello).is_empty());
    let route = net
        .node(addr(3))
        .routing_table()
        .find(&addr(1))
        .expect("route to gateway");
    assert!(route.is_valid);
    assert_eq!(route.next_hop, addr(2));
    assert_eq!(route.hop_count, 2);
    assert!(net.node(addr(3)).is_registered());

    let bad: Vec<_> = net.drops.iter().filter(|(_, r)| forged(r)).collect();
    assert!(bad.is_empty(), "unexpected drops: {bad:?}");
}

#[test]
fn test_routes_expire_without_neighbors() {
    let mut net = registered_chain(2);
    net.unlink(addr(1), addr(2));

    net.advance(7000);

    let route = net.node(addr(1)).routing_table().find(&addr(2));
    assert!(route.map_or(true, |r| !r.is_valid));
}

#[test]
fn test_data_follows_trusted_route() {
    let mut net = registered_chain(3);
    let datagram = Datagram::new(addr(3), addr(1), b"report".to_vec());

    let outcome = net.node_mut(addr(3)).handle_outbound_datagram(datagram.clone());

    assert_eq!(outcome, OutboundDisposition::Delivered);
    assert_eq!(net.sim(addr(3)).delivered(), vec![datagram]);
}

#[test]
fn test_unregistered_node_cannot_send() {
    let mut net = SimNetwork::new();
    let lonely = net.add_node(7, false);
    net.start(lonely);
    let datagram = Datagram::new(lonely, addr(1), b"hello".to_vec());

    let outcome = net.node_mut(lonely).handle_outbound_datagram(datagram.clone());

    assert_eq!(outcome, OutboundDisposition::Rejected);
    assert_eq!(net.sim(lonely).unreachable(), vec![datagram]);
}
