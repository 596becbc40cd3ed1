//! Gateway and node registration through the KDC.

use crate::test_utils::{addr, registered_chain, SimNetwork};
use paser_mesh::{MessageType, PaserMessage};

#[test]
fn test_gateway_registers_with_kdc() {
    let mut net = SimNetwork::new();
    let gateway = net.add_node(1, true);
    assert!(!net.node(gateway).is_registered());

    net.start(gateway);

    let node = net.node(gateway);
    assert!(node.is_registered());
    assert!(node.has_gtk());
    assert_eq!(node.key_nr(), 1);
    assert_eq!(net.kdc.status().gateways, vec![gateway]);
}

#[test]
fn test_node_registers_through_gateway() {
    let mut net = SimNetwork::new();
    let gateway = net.add_node(1, true);
    let client = net.add_node(2, false);
    net.link(gateway, client);
    net.start(gateway);
    net.start(client);

    let node = net.node(client);
    assert!(node.is_registered());
    assert!(node.has_gtk());
    assert_eq!(node.key_nr(), net.kdc.key_nr());

    let route = node.routing_table().find(&gateway).expect("route to gateway");
    assert!(route.is_valid);
    assert!(route.is_gateway);
    assert_eq!(route.hop_count, 1);

    assert!(net.node(gateway).neighbor_table().find(&client).unwrap().trusted);
    assert!(net.node(client).neighbor_table().find(&gateway).unwrap().trusted);

    // The registration reply carried the KDC block exactly once.
    let replies = net.sent_by(gateway, MessageType::UuRrep);
    assert_eq!(replies.len(), 1);
    assert!(matches!(replies[0], PaserMessage::UuRrep(r) if r.kdc.is_some()));
}

#[test]
fn test_isolated_node_stays_unregistered() {
    let mut net = SimNetwork::new();
    let gateway = net.add_node(1, true);
    let client = net.add_node(2, false);
    net.start(gateway);
    net.start(client);

    net.advance(1000);
    net.advance(1000);
    net.advance(1000);

    assert!(!net.node(client).is_registered());
    assert!(!net.node(client).has_gtk());
    // Nobody answers, so the gateway request keeps being repeated.
    let requests = net.sent_by(client, MessageType::UbRreq);
    assert!(requests.len() > 1);
    assert!(requests
        .iter()
        .all(|m| matches!(m, PaserMessage::UbRreq(r) if r.gw_flag)));
}

#[test]
fn test_registration_over_several_hops() {
    let net = registered_chain(4);

    for n in 2..=4 {
        assert!(net.node(addr(n)).has_gtk());
        assert_eq!(net.node(addr(n)).key_nr(), 1);
    }
    let route = net
        .node(addr(4))
        .routing_table()
        .find(&addr(1))
        .expect("route to gateway");
    assert!(route.is_valid);
    assert_eq!(route.next_hop, addr(3));
    assert_eq!(route.hop_count, 3);

    let back = net
        .node(addr(1))
        .routing_table()
        .find(&addr(4))
        .expect("route back to the far node");
    assert!(back.is_valid);
    assert_eq!(back.next_hop, addr(2));
}
