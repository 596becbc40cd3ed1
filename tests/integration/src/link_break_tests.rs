//! Route error reporting after link-layer failures.

use crate::test_utils::{addr, registered_chain};
use paser_mesh::network::HOST_MASK;
use paser_mesh::{MessageType, PaserMessage};

#[test]
fn test_link_break_reports_lost_destinations_once() {
    // gateway(1) - a(2) - x(3) - 4 - 5: both far nodes depend on x.
    let mut net = registered_chain(5);
    let (gateway, a, x) = (addr(1), addr(2), addr(3));
    let dependents = [addr(4), addr(5)];
    for dest in dependents {
        assert_eq!(net.node(a).routing_table().find(&dest).unwrap().next_hop, x);
        assert!(net.sim(a).kernel.route(dest, HOST_MASK).is_some());
    }

    net.unlink(a, x);
    net.node_mut(a).link_break_notification(addr(5));
    net.run();

    let errors = net.sent_by(a, MessageType::BRerr);
    assert_eq!(errors.len(), 1);
    let PaserMessage::BRerr(rerr) = errors[0] else {
        unreachable!()
    };
    let lost: Vec<_> = rerr.unreachable.iter().map(|u| u.addr).collect();
    assert_eq!(lost, vec![x, addr(4), addr(5)]);

    for dest in [x, addr(4), addr(5)] {
        assert!(!net.node(a).routing_table().find(&dest).unwrap().is_valid);
        assert!(net.sim(a).kernel.route(dest, HOST_MASK).is_none());
        assert!(!net.node(gateway).routing_table().find(&dest).unwrap().is_valid);
    }
    // The gateway side of the mesh is untouched.
    assert!(net.node(a).routing_table().find(&gateway).unwrap().is_valid);
}

#[test]
fn test_link_break_ignored_without_feedback() {
    let mut net = crate::test_utils::SimNetwork::new();
    for n in 1..=3 {
        let mut config = crate::test_utils::SimNetwork::config(n, n == 1);
        config.policy.link_layer_feedback = false;
        net.add_node_with(config);
    }
    net.link(addr(1), addr(2));
    net.link(addr(2), addr(3));
    for n in 1..=3 {
        net.start(addr(n));
    }

    net.node_mut(addr(2)).link_break_notification(addr(3));
    net.run();

    assert!(net.sent_by(addr(2), MessageType::BRerr).is_empty());
    assert!(net.node(addr(2)).routing_table().find(&addr(3)).unwrap().is_valid);
}
