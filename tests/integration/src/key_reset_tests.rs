//! Key epoch rotation flooded from the KDC.

use crate::test_utils::{addr, registered_chain};
use paser_kdc::SimpleKdc;
use paser_core::BROADCAST;
use paser_mesh::{DropReason, PaserMessage, TimerKind};

#[test]
fn test_key_rotation_reaches_every_node() {
    let mut net = registered_chain(3);
    let rotation = net.kdc.rotate_key(SimpleKdc::generate_gtk());
    assert_eq!(rotation.gateways, vec![addr(1)]);

    let reset = PaserMessage::BReset(rotation.reset).encode();
    assert_eq!(net.node_mut(addr(1)).handle_incoming_message(&reset, 0), Ok(()));
    net.run();

    let converged = net.advance_until(500, 30_000, |net| {
        (1..=3).all(|n| {
            let node = net.node(addr(n));
            node.key_nr() == 2 && node.is_registered() && node.has_gtk()
        })
    });
    assert!(converged, "mesh did not converge on key epoch 2");
}

#[test]
fn test_reset_clears_node_state_and_restarts_registration() {
    let mut net = registered_chain(3);
    let node = addr(2);
    assert!(!net.node(node).routing_table().is_empty());
    assert!(!net.node(node).neighbor_table().is_empty());

    let rotation = net.kdc.rotate_key(SimpleKdc::generate_gtk());
    let reset = PaserMessage::BReset(rotation.reset).encode();
    assert_eq!(net.node_mut(node).handle_incoming_message(&reset, 0), Ok(()));

    let state = net.node(node);
    assert_eq!(state.key_nr(), 2);
    assert!(!state.has_gtk());
    assert!(!state.is_registered());
    assert!(state.routing_table().is_empty());
    assert!(state.neighbor_table().is_empty());
    assert!(state.pending_replies().is_empty());
    assert!(state.pending_route_requests().contains(&BROADCAST));
    assert!(state.timers().contains(BROADCAST, TimerKind::RouteDiscovery));
}

#[test]
fn test_replayed_reset_is_ignored() {
    let mut net = registered_chain(2);
    let rotation = net.kdc.rotate_key(SimpleKdc::generate_gtk());
    let reset = PaserMessage::BReset(rotation.reset).encode();
    assert_eq!(net.node_mut(addr(1)).handle_incoming_message(&reset, 0), Ok(()));
    net.run();
    assert!(net.node(addr(1)).is_registered());

    assert_eq!(
        net.node_mut(addr(1)).handle_incoming_message(&reset, 0),
        Err(DropReason::StaleReset { received: 2, local: 2 })
    );
    assert_eq!(net.node(addr(1)).key_nr(), 2);
}
