//! Route discovery and admission of user traffic.

use crate::message::PaserMessage;
use crate::network::Datagram;
use crate::node::PaserNode;
use crate::timer::TimerKind;
use paser_core::{UnreachableBlock, BROADCAST};
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// What happened to a datagram handed to [`PaserNode::handle_outbound_datagram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundDisposition {
    /// A trusted route existed and the datagram was released
    Delivered,
    /// The datagram waits for a route discovery to finish
    Queued,
    /// No route can be found; the sender was told the host is unreachable
    Rejected,
}

impl PaserNode {
    /// Search a gateway unless the node is registered already. A node that
    /// lost its gateway searches again only when gateway research is on.
    pub fn try_to_register(&mut self) {
        if self.is_registered {
            return;
        }
        if self.was_registered && !self.config.policy.gateway_research {
            debug!(node = %self.address(), "gateway lost, research disabled");
            return;
        }
        self.route_discovery(BROADCAST, true);
    }

    /// Flood a UB_RREQ for `dest` on every interface and arm the
    /// retransmission timer. Nothing happens while a discovery for `dest`
    /// is already running. With `gateway_seek` the request asks any gateway
    /// for registration.
    pub fn route_discovery(&mut self, dest: Ipv4Addr, gateway_seek: bool) {
        if self.rreq_list.contains(&dest) {
            return;
        }
        if gateway_seek {
            self.gw_nonce = rand::random();
        }
        info!(node = %self.address(), dest = %dest, gateway_seek, "starting route discovery");

        let mut last = None;
        for (ifindex, ifaddr) in self.interfaces() {
            last = Some(self.send_ub_rreq(ifindex, ifaddr, dest, gateway_seek));
        }
        let Some(request) = last else {
            return;
        };
        self.bump_seq();
        self.rreq_list.add(dest);
        let at = self.now() + self.config.timers.rreq_wait_ms;
        self.timers.add(
            dest,
            TimerKind::RouteDiscovery,
            at,
            Some(PaserMessage::UbRreq(request)),
        );
    }

    /// Route a datagram produced locally or forwarded through this node.
    ///
    /// Datagrams are released only over a valid route whose next hop is a
    /// trusted neighbor. Otherwise locally originated traffic, and transit
    /// traffic eligible for local repair, is queued while a route is
    /// searched; anything else is answered with a route error.
    pub fn handle_outbound_datagram(&mut self, datagram: Datagram) -> OutboundDisposition {
        if !self.was_registered {
            debug!(node = %self.address(), dest = %datagram.dest, "not registered, datagram rejected");
            self.transport.report_unreachable(datagram);
            return OutboundDisposition::Rejected;
        }
        let dest = datagram.dest;
        let now = self.now();

        if self.trusted_route_to(dest).is_some() {
            let hello_enabled = self.config.policy.hello_enabled;
            self.routes.update_route_lifetimes(
                &mut self.neighbors,
                &mut self.timers,
                dest,
                now,
                hello_enabled,
            );
            self.transport.deliver(datagram);
            return OutboundDisposition::Delivered;
        }

        let local_src = datagram.src.is_unspecified()
            || self.is_local(datagram.src)
            || self.in_own_subnets(datagram.src);
        if local_src || self.local_repair_applies(dest) {
            debug!(node = %self.address(), dest = %dest, "queueing datagram until a route is found");
            self.queue.push(datagram);
            let target = self
                .routes
                .find_by_subnet(dest)
                .map_or(dest, |entry| entry.dest);
            self.route_discovery(target, false);
            return OutboundDisposition::Queued;
        }

        debug!(node = %self.address(), dest = %dest, src = %datagram.src, "no route for transit datagram");
        self.send_rerr(vec![UnreachableBlock { addr: dest, seq: 0 }]);
        self.transport.report_unreachable(datagram);
        OutboundDisposition::Rejected
    }

    /// Transit traffic may wait for a rediscovery when the broken route was
    /// short enough.
    pub(crate) fn local_repair_applies(&self, dest: Ipv4Addr) -> bool {
        if !self.config.policy.local_repair {
            return false;
        }
        self.routes
            .lookup(dest)
            .map_or(false, |entry| entry.hop_count <= self.config.policy.max_local_repair_hops)
    }
}
