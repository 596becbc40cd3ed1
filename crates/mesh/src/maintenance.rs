//! Timer expiry handling and link maintenance.

use crate::message::{BHello, PaserMessage, UbRreq, UuRrep};
use crate::node::PaserNode;
use crate::timer::{TimerEntry, TimerKind};
use paser_core::BROADCAST;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

impl PaserNode {
    /// Run every timer whose deadline has passed.
    pub fn dispatch_due_timers(&mut self) {
        let now = self.now();
        while let Some(entry) = self.timers.pop_due(now) {
            self.on_timer(entry, now);
        }
    }

    fn on_timer(&mut self, entry: TimerEntry, now: u64) {
        let dest = entry.key.dest;
        match entry.key.kind {
            TimerKind::KdcRequest => {
                if !self.is_registered && self.config.node.is_gateway {
                    warn!(node = %self.address(), "no answer from KDC, retrying");
                    self.request_own_registration(now);
                }
            }
            TimerKind::RouteDiscovery => match entry.payload {
                Some(PaserMessage::UbRreq(request)) => self.retry_route_request(request, now),
                _ => {
                    self.rreq_list.remove(&dest);
                }
            },
            TimerKind::RouteDelete => {
                debug!(node = %self.address(), dest = %dest, "route deleted");
                self.routes
                    .remove(&mut self.timers, self.kernel.as_mut(), dest);
            }
            TimerKind::NeighborDelete => {
                debug!(node = %self.address(), neighbor = %dest, "neighbor deleted");
                self.neighbors.remove(&mut self.timers, dest);
            }
            TimerKind::RouteValid => {
                self.routes
                    .mark_unreachable(&mut self.timers, self.kernel.as_mut(), dest, 0);
                if self.neighbors.find(&dest).is_some() {
                    self.link_expired(dest);
                } else {
                    self.check_gateway_reachable();
                }
            }
            TimerKind::NeighborValid => self.link_expired(dest),
            TimerKind::ReplyAckTimeout => match entry.payload {
                Some(PaserMessage::UuRrep(reply)) => self.retry_reply(dest, reply, now),
                _ => {
                    self.rrep_list.remove(&dest);
                }
            },
            TimerKind::HelloSend => self.send_hello(now),
            TimerKind::RootRefresh => {
                self.send_root();
                self.root_repeats_left = self.root_repeats_left.saturating_sub(1);
                if self.root_repeats_left > 0 {
                    let at = now + self.config.timers.root_repetition_ms;
                    self.timers.schedule(BROADCAST, TimerKind::RootRefresh, at);
                }
            }
        }
    }

    /// Resend a UB_RREQ or give up on the destination.
    fn retry_route_request(&mut self, mut request: UbRreq, now: u64) {
        let dest = request.dest;
        let tries = match self.rreq_list.find_mut(&dest) {
            Some(pending) => {
                pending.tries += 1;
                pending.tries
            }
            None => return,
        };
        if tries >= self.config.timers.rreq_tries {
            info!(node = %self.address(), dest = %dest, "route discovery failed");
            self.rreq_list.remove(&dest);
            for datagram in self.queue.take_for(dest) {
                self.transport.report_unreachable(datagram);
            }
            if !self.config.node.is_gateway && self.routes.best_gateway().is_none() {
                self.is_registered = false;
                self.try_to_register();
            }
            return;
        }

        debug!(node = %self.address(), dest = %dest, tries, "retransmitting UB_RREQ");
        let own = self.is_local(request.src);
        let here = self.here();
        let own_cert = self.engine.own_certificate();
        for (ifindex, ifaddr) in self.interfaces() {
            if own {
                request.src = ifaddr;
                request.seq = self.seq;
                request.geo_querying = here;
            }
            request.seq_forw = self.seq;
            request.key_nr = self.key_nr;
            request.route = vec![self.own_hop(ifaddr)];
            request.metric = 0;
            request.cert_forw = own_cert.clone();
            request.root = self.tree.root();
            request.iv = self.tree.iv();
            request.geo_forwarding = here;
            request.timestamp = now;
            request.sign = self.engine.sign(&request.signable());
            self.transport
                .send_control(BROADCAST, ifindex, request.encode());
        }
        self.bump_seq();
        let at = now + self.config.timers.rreq_wait_ms;
        self.timers.add(
            dest,
            TimerKind::RouteDiscovery,
            at,
            Some(PaserMessage::UbRreq(request)),
        );
        self.reset_hello_timer(now);
    }

    /// Resend an unacknowledged UU_RREP to `next_hop` or give up.
    fn retry_reply(&mut self, next_hop: Ipv4Addr, mut reply: UuRrep, now: u64) {
        let tries = match self.rrep_list.find_mut(&next_hop) {
            Some(pending) => {
                pending.tries += 1;
                pending.tries
            }
            None => return,
        };
        if tries >= self.config.timers.rrep_tries {
            info!(node = %self.address(), neighbor = %next_hop, "reply was never acknowledged");
            self.rrep_list.remove(&next_hop);
            return;
        }

        debug!(node = %self.address(), neighbor = %next_hop, tries, "retransmitting UU_RREP");
        let here = self.here();
        if self.is_local(reply.dest) {
            reply.seq = self.seq;
            reply.geo_dest = here;
        }
        reply.key_nr = self.key_nr;
        reply.geo_forwarding = here;
        reply.root = self.tree.root();
        reply.iv = self.tree.iv();
        reply.timestamp = now;
        reply.sign = self.engine.sign(&reply.signable());
        let ifindex = self.neighbor_ifindex(next_hop);
        self.transport.send_control(next_hop, ifindex, reply.encode());
        self.bump_seq();
        let at = now + self.config.timers.rrep_wait_ms;
        self.timers.add(
            next_hop,
            TimerKind::ReplyAckTimeout,
            at,
            Some(PaserMessage::UuRrep(reply)),
        );
    }

    /// Broadcast a B_HELLO on every interface that has trusted neighbors,
    /// then re-arm the hello timer.
    fn send_hello(&mut self, now: u64) {
        if self.tree.is_ready() && self.gtk().is_ok() {
            let here = self.here();
            for (ifindex, ifaddr) in self.interfaces() {
                let neighbors = self
                    .routes
                    .hello_neighbor_list(&self.neighbors, self.own_hop(ifaddr));
                if neighbors.len() <= 1 {
                    continue;
                }
                let proof = match self.next_proof() {
                    Ok(proof) => proof,
                    Err(reason) => {
                        warn!(node = %self.address(), %reason, "cannot authenticate hello");
                        break;
                    }
                };
                let mut hello = BHello {
                    src: ifaddr,
                    seq: self.seq,
                    neighbors,
                    geo: here,
                    proof,
                    hash: [0; 32],
                };
                match self.keyed_hash(&hello.signable()) {
                    Ok(hash) => hello.hash = hash,
                    Err(_) => break,
                }
                self.transport
                    .send_control(BROADCAST, ifindex, hello.encode());
                self.bump_seq();
            }
        }
        self.reset_hello_timer(now);
    }

    /// A neighbor stopped being heard: invalidate it and every route
    /// through it.
    fn link_expired(&mut self, neighbor: Ipv4Addr) {
        let lost = self.routes.withdraw_all_via(
            &mut self.neighbors,
            &mut self.timers,
            self.kernel.as_mut(),
            neighbor,
        );
        info!(node = %self.address(), neighbor = %neighbor, lost = lost.len(), "link expired");
        self.check_gateway_reachable();
    }

    /// Without a route to any gateway a client is no longer registered and
    /// starts looking for one.
    fn check_gateway_reachable(&mut self) {
        if self.config.node.is_gateway || self.routes.best_gateway().is_some() {
            return;
        }
        if self.is_registered {
            info!(node = %self.address(), "no gateway reachable");
        }
        self.is_registered = false;
        self.try_to_register();
    }

    /// Forwarding to `dest` failed at the link layer. Every route through
    /// the same next hop is invalidated and, if asked for, reported in one
    /// B_RERR.
    pub fn message_failed(&mut self, dest: Ipv4Addr, report: bool) {
        let Some(next_hop) = self.routes.find(&dest).map(|e| e.next_hop) else {
            return;
        };
        if self.neighbors.find(&next_hop).is_none() || self.routes.find(&next_hop).is_none() {
            return;
        }
        let lost = self.routes.withdraw_all_via(
            &mut self.neighbors,
            &mut self.timers,
            self.kernel.as_mut(),
            next_hop,
        );
        warn!(node = %self.address(), next_hop = %next_hop, lost = lost.len(), "link broken");
        if report {
            self.send_rerr(lost);
        }
    }

    /// Link-layer feedback: a frame towards `dest` could not be delivered.
    /// Short routes are repaired locally, longer ones reported upstream.
    pub fn link_break_notification(&mut self, dest: Ipv4Addr) {
        if !self.config.policy.link_layer_feedback {
            return;
        }
        if self.local_repair_applies(dest) {
            self.message_failed(dest, false);
            self.route_discovery(dest, false);
        } else {
            self.message_failed(dest, true);
        }
        self.check_gateway_reachable();
    }

    /// Extend the routes used by forwarded traffic in both directions.
    pub fn refresh_routes_for_traffic(&mut self, src: Ipv4Addr, dest: Ipv4Addr) {
        let now = self.now();
        let hello_enabled = self.config.policy.hello_enabled;
        for addr in [dest, src] {
            self.routes.update_route_lifetimes(
                &mut self.neighbors,
                &mut self.timers,
                addr,
                now,
                hello_enabled,
            );
        }
    }
}
