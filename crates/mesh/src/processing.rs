//! Validation and processing of received control messages.
//!
//! Every handler runs its checks in a fixed order and stops at the first
//! failure, returning the [`DropReason`]. Nothing is sent back to the peer
//! for a dropped message except a B_RESET when it used an outdated key
//! epoch.

use crate::error::DropReason;
use crate::message::{
    reset_signable, AuthProof, BHello, BReset, BRerr, BRoot, KdcBlock, KdcReply, KdcRequest, Packet,
    PaserMessage, TuRrep, TuRrepAck, TuRreq, UbRreq, UuRrep,
};
use crate::neighbor::NeighborUpdate;
use crate::node::PaserNode;
use crate::routing::RouteUpdate;
use crate::timer::TimerKind;
use paser_core::{is_seq_new, AddressRange, GeoPosition, HopRecord, UnreachableBlock, BROADCAST};
use paser_crypto::{auth_tree, keyed_hash, Hash};
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

impl PaserNode {
    /// Process a datagram received on the PASER port through interface
    /// `ifindex`. Dropped messages are logged and reported to the caller.
    pub fn handle_incoming_message(&mut self, bytes: &[u8], ifindex: u32) -> Result<(), DropReason> {
        let result = match Packet::decode(bytes) {
            Ok(Packet::Control(msg)) => self.handle_control(msg, ifindex),
            Ok(Packet::KdcReply(reply)) => self.handle_kdc_reply(reply),
            Ok(Packet::KdcRequest(request)) => Err(DropReason::Malformed(format!(
                "KDC request for {} on the routing port",
                request.src
            ))),
            Err(e) => Err(e.into()),
        };
        if let Err(reason) = &result {
            if reason.is_security_relevant() {
                warn!(node = %self.address(), %reason, "dropped control message");
            } else {
                debug!(node = %self.address(), %reason, "dropped control message");
            }
        }
        result
    }

    fn handle_control(&mut self, msg: PaserMessage, ifindex: u32) -> Result<(), DropReason> {
        if !self.tree.is_ready() {
            return Err(DropReason::RootNotReady);
        }
        match msg {
            PaserMessage::UbRreq(m) => self.handle_ub_rreq(m, ifindex),
            PaserMessage::UuRrep(m) => self.handle_uu_rrep(m, ifindex),
            PaserMessage::TuRreq(m) => self.handle_tu_rreq(m, ifindex),
            PaserMessage::TuRrep(m) => self.handle_tu_rrep(m, ifindex),
            PaserMessage::TuRrepAck(m) => self.handle_tu_rrep_ack(m),
            PaserMessage::BRerr(m) => self.handle_rerr(m),
            PaserMessage::BHello(m) => self.handle_hello(m, ifindex),
            PaserMessage::BRoot(m) => self.handle_root(m),
            PaserMessage::BReset(m) => self.handle_reset(m),
        }
    }

    fn handle_ub_rreq(&mut self, msg: UbRreq, ifindex: u32) -> Result<(), DropReason> {
        self.require_registered()?;
        let forwarder = self.check_route_loop(&msg.route)?;
        if !self.fresh_request(msg.src, msg.dest, msg.seq, forwarder, msg.seq_forw) {
            return Err(DropReason::StaleSequence { src: msg.src });
        }
        self.check_position(forwarder, &msg.geo_forwarding)?;
        self.check_timestamp(forwarder, msg.timestamp)?;
        self.check_signature(forwarder, &msg.cert_forw, &msg.signable(), &msg.sign)?;
        if msg.key_nr != 0 {
            self.check_key_epoch(msg.key_nr)?;
        }

        let now = self.now();
        self.neighbors.insert_or_update(
            &mut self.timers,
            now,
            NeighborUpdate {
                addr: forwarder,
                trusted: false,
                root: msg.root,
                iv: msg.iv,
                position: msg.geo_forwarding,
                cert: msg.cert_forw.clone(),
                ifindex,
            },
        );
        let forwarder_is_gateway = self.engine.is_gateway_certificate(&msg.cert_forw);
        self.update_route(
            now,
            RouteUpdate {
                dest: forwarder,
                seq: msg.seq_forw,
                next_hop: forwarder,
                metric: 0,
                ifindex,
                ranges: last_ranges(&msg.route),
                cert: Some(msg.cert_forw.clone()),
                gateway: forwarder_is_gateway,
            },
        );

        let querying_cert = if msg.gw_flag {
            if !self.engine.check_certificate(&msg.cert, now) {
                return Err(DropReason::Certificate { src: msg.src });
            }
            Some(msg.cert.clone())
        } else {
            None
        };
        let querying_is_gateway = querying_cert
            .as_deref()
            .map_or(false, |cert| self.engine.is_gateway_certificate(cert));
        let origin_ranges = first_ranges(&msg.route);
        self.update_route(
            now,
            RouteUpdate {
                dest: msg.src,
                seq: msg.seq,
                next_hop: forwarder,
                metric: msg.metric,
                ifindex,
                ranges: origin_ranges.clone(),
                cert: querying_cert,
                gateway: querying_is_gateway,
            },
        );
        self.learn_path(msg.src, &origin_ranges, &msg.route, forwarder, ifindex, now);

        let for_me = (self.config.node.is_gateway && msg.dest == BROADCAST)
            || self.is_local(msg.dest)
            || self.in_own_subnets(msg.dest);
        if for_me {
            if self.config.node.is_gateway && msg.gw_flag {
                info!(node = %self.address(), querying = %msg.src, "relaying registration to KDC");
                self.send_kdc_request(KdcRequest {
                    src: msg.src,
                    gw_addr: self.address(),
                    next_hop: forwarder,
                    cert: msg.cert,
                    nonce: msg.nonce,
                });
                return Ok(());
            }
            let reply = self.send_uu_rrep(msg.src, forwarder, None)?;
            self.arm_reply_ack(forwarder, reply);
            return Ok(());
        }

        match self.trusted_route_to(msg.dest) {
            Some((dest, next_hop)) => {
                if next_hop != forwarder {
                    self.forward_ub_rreq_to_tu_rreq(&msg, next_hop, dest)?;
                }
                Ok(())
            }
            None => {
                self.forward_ub_rreq(&msg);
                Ok(())
            }
        }
    }

    fn handle_uu_rrep(&mut self, msg: UuRrep, ifindex: u32) -> Result<(), DropReason> {
        let for_me = self.is_local(msg.src);
        if !self.is_registered && !self.was_registered && !for_me {
            return Err(DropReason::NotRegistered);
        }
        let forwarder = self.check_route_loop(&msg.route)?;
        if !self.fresh_reply(msg.src, msg.dest, msg.seq) {
            return Err(DropReason::StaleSequence { src: msg.dest });
        }
        self.check_position(forwarder, &msg.geo_forwarding)?;
        self.check_timestamp(forwarder, msg.timestamp)?;
        if msg.gw_flag && for_me {
            let block = msg
                .kdc
                .as_ref()
                .ok_or_else(|| DropReason::KdcBlock("registration reply without KDC block".into()))?;
            self.accept_kdc_block(block)?;
        }
        self.check_signature(forwarder, &msg.cert_forw, &msg.signable(), &msg.sign)?;
        self.check_key_epoch(msg.key_nr)?;

        let now = self.now();
        self.neighbors.insert_or_update(
            &mut self.timers,
            now,
            NeighborUpdate {
                addr: forwarder,
                trusted: true,
                root: msg.root,
                iv: msg.iv,
                position: msg.geo_forwarding,
                cert: msg.cert_forw.clone(),
                ifindex,
            },
        );
        let forwarder_is_gateway = self.engine.is_gateway_certificate(&msg.cert_forw);
        self.update_route(
            now,
            RouteUpdate {
                dest: forwarder,
                seq: 0,
                next_hop: forwarder,
                metric: 0,
                ifindex,
                ranges: last_ranges(&msg.route),
                cert: Some(msg.cert_forw.clone()),
                gateway: forwarder_is_gateway,
            },
        );
        let dest_ranges = first_ranges(&msg.route);
        self.update_route(
            now,
            RouteUpdate {
                dest: msg.dest,
                seq: msg.seq,
                next_hop: forwarder,
                metric: msg.metric_dest,
                ifindex,
                ranges: dest_ranges.clone(),
                cert: None,
                gateway: msg.gw_flag,
            },
        );
        self.routes.bulk_update(
            &self.neighbors,
            &mut self.timers,
            self.kernel.as_mut(),
            now,
            &msg.route,
            forwarder,
            ifindex,
        );
        self.send_tu_rrep_ack(forwarder)?;

        if msg.gw_flag {
            self.mark_registered();
        }
        self.route_established(msg.dest, &dest_ranges);

        if for_me {
            info!(node = %self.address(), dest = %msg.dest, next_hop = %forwarder, "route established");
            return Ok(());
        }
        let Some((next_hop, trusted)) = self.usable_next_hop(msg.src) else {
            self.send_rerr(vec![UnreachableBlock { addr: msg.src, seq: 0 }]);
            return Err(DropReason::NoRoute { dest: msg.src });
        };
        if trusted {
            self.forward_uu_rrep_to_tu_rrep(&msg, next_hop)
        } else {
            let forwarded = self.forward_uu_rrep(&msg, next_hop);
            self.arm_reply_ack(next_hop, forwarded);
            Ok(())
        }
    }

    fn handle_tu_rreq(&mut self, msg: TuRreq, ifindex: u32) -> Result<(), DropReason> {
        self.require_registered()?;
        self.check_key_epoch(msg.key_nr)?;
        let forwarder = self.check_route_loop(&msg.route)?;
        if !self.fresh_request(msg.src, msg.dest, msg.seq, forwarder, msg.seq_forw) {
            return Err(DropReason::StaleSequence { src: msg.src });
        }
        self.check_position(forwarder, &msg.geo_forwarding)?;
        self.require_trusted_neighbor(forwarder)?;
        self.check_keyed_hash(forwarder, &msg.signable(), &msg.hash)?;
        let iv = self.verify_secret(forwarder, &msg.proof)?;

        let now = self.now();
        self.neighbors.set_iv_and_mark_valid(forwarder, iv);
        self.neighbors.refresh_timeout(&mut self.timers, forwarder, now);
        self.routes
            .refresh_timeout_with_seq(
                &mut self.timers,
                self.kernel.as_mut(),
                forwarder,
                msg.seq_forw,
                now,
            );

        let querying_cert = if msg.gw_flag {
            if !self.engine.check_certificate(&msg.cert, now) {
                return Err(DropReason::Certificate { src: msg.src });
            }
            Some(msg.cert.clone())
        } else {
            None
        };
        let querying_is_gateway = querying_cert
            .as_deref()
            .map_or(false, |cert| self.engine.is_gateway_certificate(cert));
        let origin_ranges = first_ranges(&msg.route);
        self.update_route(
            now,
            RouteUpdate {
                dest: msg.src,
                seq: msg.seq,
                next_hop: forwarder,
                metric: msg.metric,
                ifindex,
                ranges: origin_ranges.clone(),
                cert: querying_cert,
                gateway: querying_is_gateway,
            },
        );
        self.learn_path(msg.src, &origin_ranges, &msg.route, forwarder, ifindex, now);

        if self.is_local(msg.dest) || self.in_own_subnets(msg.dest) {
            if msg.gw_flag && self.config.node.is_gateway {
                info!(node = %self.address(), querying = %msg.src, "relaying registration to KDC");
                self.send_kdc_request(KdcRequest {
                    src: msg.src,
                    gw_addr: self.address(),
                    next_hop: forwarder,
                    cert: msg.cert,
                    nonce: msg.nonce,
                });
                return Ok(());
            }
            return self.send_tu_rrep(msg.src, forwarder, None);
        }

        match self.trusted_route_to(msg.dest) {
            Some((_, next_hop)) => self.forward_tu_rreq(&msg, next_hop),
            None => {
                self.send_rerr(vec![UnreachableBlock { addr: msg.dest, seq: 0 }]);
                Err(DropReason::NoRoute { dest: msg.dest })
            }
        }
    }

    fn handle_tu_rrep(&mut self, msg: TuRrep, ifindex: u32) -> Result<(), DropReason> {
        self.require_registered()?;
        self.check_key_epoch(msg.key_nr)?;
        let forwarder = self.check_route_loop(&msg.route)?;
        if !self.fresh_reply(msg.src, msg.dest, msg.seq) {
            return Err(DropReason::StaleSequence { src: msg.dest });
        }
        self.check_position(forwarder, &msg.geo_forwarding)?;
        self.require_trusted_neighbor(forwarder)?;
        self.check_keyed_hash(forwarder, &msg.signable(), &msg.hash)?;
        let for_me = self.is_local(msg.src);
        if msg.gw_flag && for_me {
            let block = msg
                .kdc
                .as_ref()
                .ok_or_else(|| DropReason::KdcBlock("registration reply without KDC block".into()))?;
            self.accept_kdc_block(block)?;
        }
        let iv = self.verify_secret(forwarder, &msg.proof)?;

        let now = self.now();
        self.neighbors.set_iv_and_mark_valid(forwarder, iv);
        self.neighbors.refresh_timeout(&mut self.timers, forwarder, now);
        self.routes.refresh_timeout(
            &mut self.timers,
            self.kernel.as_mut(),
            forwarder,
            now,
            ifindex,
        );

        let dest_ranges = first_ranges(&msg.route);
        self.update_route(
            now,
            RouteUpdate {
                dest: msg.dest,
                seq: msg.seq,
                next_hop: forwarder,
                metric: msg.metric_dest,
                ifindex,
                ranges: dest_ranges.clone(),
                cert: None,
                gateway: msg.gw_flag,
            },
        );
        if msg.gw_flag {
            self.mark_registered();
        }
        self.learn_path(msg.dest, &dest_ranges, &msg.route, forwarder, ifindex, now);

        if for_me {
            self.route_established(msg.dest, &dest_ranges);
            info!(node = %self.address(), dest = %msg.dest, next_hop = %forwarder, "route established");
            return Ok(());
        }
        let next_hop = self
            .routes
            .find(&msg.src)
            .map(|e| e.next_hop)
            .ok_or(DropReason::NoRoute { dest: msg.src })?;
        let trusted = self
            .neighbors
            .find(&next_hop)
            .map(|n| n.trusted)
            .ok_or(DropReason::NoRoute { dest: msg.src })?;
        if trusted {
            self.forward_tu_rrep(&msg, next_hop)
        } else {
            let forwarded = self.forward_tu_rrep_to_uu_rrep(&msg, next_hop);
            self.arm_reply_ack(next_hop, forwarded);
            Ok(())
        }
    }

    fn handle_tu_rrep_ack(&mut self, msg: TuRrepAck) -> Result<(), DropReason> {
        self.require_registered()?;
        self.check_key_epoch(msg.key_nr)?;
        let src = msg.src;
        if self.neighbors.find(&src).is_none() {
            return Err(DropReason::UnknownNeighbor { src });
        }
        if !self.fresh_from(src, msg.seq) {
            return Err(DropReason::StaleSequence { src });
        }
        self.check_keyed_hash(src, &msg.signable(), &msg.hash)?;
        let iv = self.verify_secret(src, &msg.proof)?;
        self.neighbors.set_iv_and_mark_valid(src, iv);
        if self.routes.find(&src).is_none() {
            return Err(DropReason::NoRoute { dest: src });
        }

        let now = self.now();
        let ifindex = self.neighbor_ifindex(src);
        self.routes.make_one_hop(self.kernel.as_mut(), src, ifindex);
        self.routes
            .refresh_timeout_with_seq(&mut self.timers, self.kernel.as_mut(), src, msg.seq, now);
        self.neighbors.refresh_timeout(&mut self.timers, src, now);
        self.neighbors.set_trusted(src);
        info!(node = %self.address(), neighbor = %src, "link is trusted");

        for dest in self.routes.destinations_via(src) {
            let ranges = self
                .routes
                .find(&dest)
                .map(|e| e.ranges.clone())
                .unwrap_or_default();
            self.route_established(dest, &ranges);
        }
        self.rrep_list.remove(&src);
        self.timers.remove(src, TimerKind::ReplyAckTimeout);
        Ok(())
    }

    fn handle_rerr(&mut self, msg: BRerr) -> Result<(), DropReason> {
        self.require_registered()?;
        self.check_key_epoch(msg.key_nr)?;
        let src = msg.src;
        if self.neighbors.find(&src).is_none() {
            return Err(DropReason::UnknownNeighbor { src });
        }
        if !self.fresh_from(src, msg.seq) {
            return Err(DropReason::StaleSequence { src });
        }
        self.check_keyed_hash(src, &msg.signable(), &msg.hash)?;
        let iv = self.verify_secret(src, &msg.proof)?;
        self.neighbors.set_iv(src, iv);

        let mut lost = Vec::new();
        for block in &msg.unreachable {
            let Some(entry) = self.routes.find(&block.addr) else {
                continue;
            };
            if entry.next_hop != src || !entry.is_valid {
                continue;
            }
            let reported_older = block.seq != 0 && is_seq_new(block.seq, entry.seq);
            if reported_older {
                continue;
            }
            if let Some(withdrawn) =
                self.routes
                    .mark_unreachable(&mut self.timers, self.kernel.as_mut(), block.addr, block.seq)
            {
                lost.push(withdrawn);
            }
        }
        if !lost.is_empty() {
            info!(node = %self.address(), reporter = %src, count = lost.len(), "routes withdrawn after route error");
            self.send_rerr(lost);
        }
        Ok(())
    }

    fn handle_hello(&mut self, msg: BHello, ifindex: u32) -> Result<(), DropReason> {
        self.require_registered()?;
        let src = msg.src;
        let trusted = match self.neighbors.find(&src) {
            Some(neighbor) => neighbor.trusted,
            None => return Err(DropReason::UnknownNeighbor { src }),
        };
        if !self.fresh_from(src, msg.seq) {
            return Err(DropReason::StaleSequence { src });
        }
        self.check_position(src, &msg.geo)?;
        self.check_keyed_hash(src, &msg.signable(), &msg.hash)?;
        let iv = self.verify_secret(src, &msg.proof)?;

        if !trusted {
            debug!(node = %self.address(), neighbor = %src, "hello from untrusted neighbor, starting discovery");
            self.route_discovery(src, false);
            return Ok(());
        }
        if !msg.neighbors.iter().any(|hop| self.is_local(hop.addr)) {
            debug!(node = %self.address(), neighbor = %src, "not listed in neighbor's hello, starting discovery");
            self.route_discovery(src, false);
            return Ok(());
        }
        self.neighbors.set_iv_and_mark_valid(src, iv);

        let now = self.now();
        for record in &msg.neighbors {
            if self.is_local(record.addr) {
                continue;
            }
            if record.addr == src {
                self.routes.update_neighbor_from_hello(
                    &mut self.neighbors,
                    &mut self.timers,
                    self.kernel.as_mut(),
                    record,
                    now,
                );
            } else {
                self.routes.update_route_from_hello(
                    &self.neighbors,
                    &mut self.timers,
                    self.kernel.as_mut(),
                    record,
                    src,
                    now,
                    ifindex,
                );
            }
        }
        Ok(())
    }

    fn handle_root(&mut self, msg: BRoot) -> Result<(), DropReason> {
        self.require_registered()?;
        let src = msg.src;
        if !self.fresh_from(src, msg.seq) {
            return Err(DropReason::StaleSequence { src });
        }
        self.check_position(src, &msg.geo)?;
        self.check_timestamp(src, msg.timestamp)?;
        self.check_signature(src, &msg.cert, &msg.signable(), &msg.sign)?;
        if self.routes.find(&src).map_or(true, |e| e.hop_count != 1) {
            return Err(DropReason::NotOneHop { src });
        }
        if self.neighbors.find(&src).is_none() {
            return Err(DropReason::UnknownNeighbor { src });
        }
        self.routes.set_seq(src, msg.seq);
        self.neighbors.replace_root(src, msg.root, msg.iv);
        debug!(node = %self.address(), neighbor = %src, root = %hex::encode(msg.root), "neighbor root updated");
        Ok(())
    }

    fn handle_reset(&mut self, msg: BReset) -> Result<(), DropReason> {
        self.require_registered()?;
        if msg.key_nr < self.key_nr {
            self.send_reset();
        }
        if msg.key_nr <= self.key_nr {
            return Err(DropReason::StaleReset {
                received: msg.key_nr,
                local: self.key_nr,
            });
        }
        if !self.engine.is_kdc_certificate(&msg.cert) {
            return Err(DropReason::Certificate { src: msg.src });
        }
        self.check_signature(msg.src, &msg.cert, &msg.signable(), &msg.sign)?;

        info!(node = %self.address(), from = self.key_nr, to = msg.key_nr, "key reset");
        self.key_nr = msg.key_nr;
        self.reset_state();
        self.kdc_cert = msg.cert;
        self.reset_sign = msg.sign;
        self.send_reset();
        if self.config.node.is_gateway {
            let now = self.now();
            self.request_own_registration(now);
        } else {
            self.try_to_register();
        }
        Ok(())
    }

    /// Process a KDC reply: registration of this gateway, or a registration
    /// answer to relay towards a node that asked through us.
    pub(crate) fn handle_kdc_reply(&mut self, reply: KdcReply) -> Result<(), DropReason> {
        if self.is_local(reply.src) {
            self.accept_kdc_block(&reply.block)?;
            self.is_registered = true;
            self.was_registered = true;
            self.timers
                .remove(self.config.node.kdc_address, TimerKind::KdcRequest);
            info!(node = %self.address(), key_nr = self.key_nr, "gateway registered with KDC");
            return Ok(());
        }

        let next_hop = reply.next_hop;
        let trusted = self
            .neighbors
            .find(&next_hop)
            .map(|n| n.trusted)
            .ok_or(DropReason::UnknownNeighbor { src: next_hop })?;
        debug!(node = %self.address(), querying = %reply.src, next_hop = %next_hop, trusted, "answering registration");
        if trusted {
            self.send_tu_rrep(reply.src, next_hop, Some(reply.block))
        } else {
            let rrep = self.send_uu_rrep(reply.src, next_hop, Some(reply.block))?;
            self.arm_reply_ack(next_hop, rrep);
            Ok(())
        }
    }

    /// Drop neighbors whose certificate no longer validates, together with
    /// every route through them. Returns whether a gateway is still known.
    pub(crate) fn check_all_certificates(&mut self) -> bool {
        let now = self.now();
        let revoked: Vec<Ipv4Addr> = self
            .neighbors
            .iter()
            .filter(|n| !n.cert.is_empty() && !self.engine.check_certificate(&n.cert, now))
            .map(|n| n.addr)
            .collect();
        for addr in revoked {
            warn!(node = %self.address(), neighbor = %addr, "neighbor certificate revoked");
            self.routes
                .remove_via(&mut self.timers, self.kernel.as_mut(), addr);
            self.routes
                .remove(&mut self.timers, self.kernel.as_mut(), addr);
            self.neighbors.remove(&mut self.timers, addr);
        }
        self.routes.best_gateway().is_some()
    }

    /// Validate KDC material addressed to this node and install the GTK,
    /// the CRL and the reset authorization it carries.
    fn accept_kdc_block(&mut self, block: &KdcBlock) -> Result<(), DropReason> {
        if block.nonce != self.gw_nonce {
            return Err(DropReason::KdcNonce);
        }
        let now = self.now();
        if !self.engine.is_kdc_certificate(&block.cert_kdc) {
            return Err(DropReason::KdcBlock("certificate lacks the KDC role".into()));
        }
        if !self
            .engine
            .verify(&block.cert_kdc, &block.signable(), &block.sign, now)
        {
            return Err(DropReason::KdcBlock("signature does not verify".into()));
        }
        let reset = reset_signable(block.key_nr, &block.cert_kdc);
        if !self.engine.verify(&block.cert_kdc, &reset, &block.sign_key, now) {
            return Err(DropReason::KdcBlock("key signature does not verify".into()));
        }
        let gtk = self
            .engine
            .open_gtk(&block.gtk)
            .map_err(|e| DropReason::KdcBlock(e.to_string()))?;
        if !block.crl.is_empty() {
            self.engine
                .set_crl(&block.crl)
                .map_err(|e| DropReason::KdcBlock(e.to_string()))?;
            self.check_all_certificates();
        }
        self.gtk = Some(Zeroizing::new(gtk));
        self.key_nr = block.key_nr;
        self.kdc_cert = block.cert_kdc.clone();
        self.reset_sign = block.sign_key.clone();
        info!(node = %self.address(), key_nr = block.key_nr, "group key installed");
        Ok(())
    }

    fn mark_registered(&mut self) {
        self.is_registered = true;
        self.was_registered = true;
        self.clear_pending(BROADCAST, &[]);
    }

    fn update_route(&mut self, now: u64, update: RouteUpdate) {
        self.routes.insert_or_update(
            &self.neighbors,
            &mut self.timers,
            self.kernel.as_mut(),
            now,
            update,
        );
    }

    /// When the route to `origin` goes through a trusted neighbor, learn
    /// every hop of `route` and release traffic waiting for `origin`.
    fn learn_path(
        &mut self,
        origin: Ipv4Addr,
        origin_ranges: &[AddressRange],
        route: &[HopRecord],
        forwarder: Ipv4Addr,
        ifindex: u32,
        now: u64,
    ) {
        let Some(next_hop) = self.routes.find(&origin).map(|e| e.next_hop) else {
            return;
        };
        if !self.neighbors.is_trusted_and_valid(&next_hop) {
            return;
        }
        self.routes.bulk_update(
            &self.neighbors,
            &mut self.timers,
            self.kernel.as_mut(),
            now,
            route,
            forwarder,
            ifindex,
        );
        self.route_established(origin, origin_ranges);
    }

    /// Stop discovery for `dest` and its subnets and send the traffic that
    /// waited for it.
    pub(crate) fn route_established(&mut self, dest: Ipv4Addr, ranges: &[AddressRange]) {
        self.clear_pending(dest, ranges);
        let mut ready = self.queue.take_for(dest);
        for range in ranges {
            ready.extend(self.queue.take_in_range(range));
        }
        for datagram in ready {
            self.transport.deliver(datagram);
        }
    }

    fn clear_pending(&mut self, dest: Ipv4Addr, ranges: &[AddressRange]) {
        let mut done = vec![dest];
        for range in ranges {
            done.extend(self.rreq_list.find_in_range(range));
        }
        for dest in done {
            if self.rreq_list.remove(&dest).is_some() {
                self.timers.remove(dest, TimerKind::RouteDiscovery);
            }
        }
    }

    /// Valid route to `addr` whose next hop is a valid trusted neighbor.
    /// Returns the route's destination and next hop.
    pub(crate) fn trusted_route_to(&self, addr: Ipv4Addr) -> Option<(Ipv4Addr, Ipv4Addr)> {
        self.routes
            .lookup(addr)
            .filter(|e| e.is_valid && self.neighbors.is_trusted_and_valid(&e.next_hop))
            .map(|e| (e.dest, e.next_hop))
    }

    /// Next hop towards `addr` if the route and the neighbor are valid,
    /// with the neighbor's trust state.
    fn usable_next_hop(&self, addr: Ipv4Addr) -> Option<(Ipv4Addr, bool)> {
        let entry = self.routes.find(&addr).filter(|e| e.is_valid)?;
        let neighbor = self.neighbors.find(&entry.next_hop).filter(|n| n.is_valid)?;
        Some((entry.next_hop, neighbor.trusted))
    }

    fn require_registered(&self) -> Result<(), DropReason> {
        if self.was_registered {
            Ok(())
        } else {
            Err(DropReason::NotRegistered)
        }
    }

    fn require_trusted_neighbor(&self, addr: Ipv4Addr) -> Result<(), DropReason> {
        match self.neighbors.find(&addr) {
            None => Err(DropReason::UnknownNeighbor { src: addr }),
            Some(n) if !n.trusted => Err(DropReason::UntrustedNeighbor { src: addr }),
            Some(_) => Ok(()),
        }
    }

    /// Reject messages of another key epoch and tell the sender about ours.
    fn check_key_epoch(&mut self, received: u32) -> Result<(), DropReason> {
        if received == self.key_nr {
            return Ok(());
        }
        self.send_reset();
        Err(DropReason::KeyEpoch {
            received,
            local: self.key_nr,
        })
    }

    /// The accumulated route must not contain us. Returns the last forwarder.
    fn check_route_loop(&self, route: &[HopRecord]) -> Result<Ipv4Addr, DropReason> {
        let last = route
            .last()
            .ok_or_else(|| DropReason::Malformed("empty route".into()))?;
        if route.iter().any(|hop| self.is_local(hop.addr)) {
            return Err(DropReason::Loop);
        }
        Ok(last.addr)
    }

    fn check_position(&self, src: Ipv4Addr, pos: &GeoPosition) -> Result<(), DropReason> {
        if self.here().within(pos, self.config.policy.radius) {
            Ok(())
        } else {
            Err(DropReason::Geographic { src })
        }
    }

    fn check_timestamp(&self, src: Ipv4Addr, timestamp: u64) -> Result<(), DropReason> {
        if self.now().abs_diff(timestamp) <= self.config.timers.timestamp_tolerance_ms {
            Ok(())
        } else {
            Err(DropReason::Timestamp { src })
        }
    }

    fn check_signature(&self, src: Ipv4Addr, cert: &[u8], data: &[u8], sign: &[u8]) -> Result<(), DropReason> {
        if self.engine.verify(cert, data, sign, self.now()) {
            Ok(())
        } else {
            Err(DropReason::Signature { src })
        }
    }

    fn check_keyed_hash(&self, src: Ipv4Addr, data: &[u8], hash: &Hash) -> Result<(), DropReason> {
        if keyed_hash::verify(self.gtk()?, data, hash) {
            Ok(())
        } else {
            Err(DropReason::KeyedHash { src })
        }
    }

    /// Authenticate a revealed secret against the neighbor's root. Returns
    /// the IV to store for the neighbor.
    fn verify_secret(&self, src: Ipv4Addr, proof: &AuthProof) -> Result<u32, DropReason> {
        let neighbor = self
            .neighbors
            .find(&src)
            .ok_or(DropReason::UnknownNeighbor { src })?;
        auth_tree::verify(&neighbor.root, &proof.secret, &proof.auth_path, neighbor.iv)
            .ok_or(DropReason::AuthPath { src })
    }

    /// Freshness of a route request. A request addressed to us may repeat
    /// the originator's current number; the forwarder's number must always
    /// be new.
    fn fresh_request(&self, src: Ipv4Addr, dest: Ipv4Addr, seq: u32, forwarder: Ipv4Addr, seq_forw: u32) -> bool {
        let for_me = self.is_local(dest) || (self.config.node.is_gateway && dest == BROADCAST);
        match (self.routes.find(&src), self.routes.find(&forwarder)) {
            (Some(s), Some(f)) if for_me => {
                (seq == s.seq || is_seq_new(s.seq, seq)) && is_seq_new(f.seq, seq_forw)
            }
            (Some(s), Some(f)) => is_seq_new(s.seq, seq) && is_seq_new(f.seq, seq_forw),
            (None, Some(f)) => is_seq_new(f.seq, seq_forw),
            (Some(s), None) => is_seq_new(s.seq, seq),
            (None, None) => true,
        }
    }

    /// Freshness of a route reply from `responder` towards `querying`.
    fn fresh_reply(&self, querying: Ipv4Addr, responder: Ipv4Addr, seq: u32) -> bool {
        match self.routes.find(&responder) {
            Some(e) if self.is_local(querying) => seq == e.seq || is_seq_new(e.seq, seq),
            Some(e) => is_seq_new(e.seq, seq),
            None => true,
        }
    }

    fn fresh_from(&self, src: Ipv4Addr, seq: u32) -> bool {
        self.routes
            .find(&src)
            .map_or(true, |e| is_seq_new(e.seq, seq))
    }
}

fn first_ranges(route: &[HopRecord]) -> Vec<AddressRange> {
    route.first().map(|h| h.ranges.clone()).unwrap_or_default()
}

fn last_ranges(route: &[HopRecord]) -> Vec<AddressRange> {
    route.last().map(|h| h.ranges.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::*;
    use crate::testing::addr;
    use paser_crypto::{CertificateAuthority, KDC_MARKER};

    const GTK: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn pair(ca: &mut CertificateAuthority) -> (Harness, Harness) {
        let mut a = harness(ca, config(1, false));
        let mut b = harness(ca, config(2, false));
        register(&mut a.node, GTK, 1);
        register(&mut b.node, GTK, 1);
        (a, b)
    }

    /// Deliver everything `from` sent so far to `to`, returning the results.
    fn relay(from: &Harness, to: &mut Harness) -> Vec<Result<(), DropReason>> {
        from.transport
            .drain_control()
            .into_iter()
            .map(|(_, _, bytes)| to.node.handle_incoming_message(&bytes, 0))
            .collect()
    }

    fn only_message(h: &Harness) -> PaserMessage {
        let sent = h.transport.drain_control();
        assert_eq!(sent.len(), 1, "expected exactly one message");
        PaserMessage::decode(&sent[0].2).unwrap()
    }

    /// A discovers B; after UB_RREQ, UU_RREP and TU_RREP_ACK both sides
    /// trust each other.
    fn handshake(a: &mut Harness, b: &mut Harness) {
        a.node.route_discovery(addr(2), false);
        assert_eq!(relay(a, b), vec![Ok(())]);
        assert_eq!(relay(b, a), vec![Ok(())]);
        assert_eq!(relay(a, b), vec![Ok(())]);
    }

    #[test]
    fn test_unregistered_node_drops_requests() {
        let mut ca = CertificateAuthority::generate();
        let mut a = harness(&mut ca, config(1, false));
        let mut b = harness(&mut ca, config(2, false));
        register(&mut a.node, GTK, 1);
        a.node.route_discovery(addr(2), false);
        assert_eq!(relay(&a, &mut b), vec![Err(DropReason::NotRegistered)]);
    }

    #[test]
    fn test_handshake_makes_link_trusted() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);

        a.node.route_discovery(addr(2), false);
        assert_eq!(relay(&a, &mut b), vec![Ok(())]);
        assert!(b.node.pending_replies().contains(&addr(1)));
        assert!(b.node.timers().contains(addr(1), TimerKind::ReplyAckTimeout));
        assert!(!b.node.neighbor_table().find(&addr(1)).unwrap().trusted);

        assert_eq!(relay(&b, &mut a), vec![Ok(())]);
        assert!(a.node.neighbor_table().find(&addr(2)).unwrap().trusted);
        assert!(!a.node.pending_route_requests().contains(&addr(2)));
        let route = a.node.routing_table().find(&addr(2)).unwrap();
        assert_eq!(route.hop_count, 1);
        assert!(route.is_valid);

        assert_eq!(relay(&a, &mut b), vec![Ok(())]);
        assert!(b.node.neighbor_table().find(&addr(1)).unwrap().trusted);
        assert!(b.node.pending_replies().is_empty());
        assert!(!b.node.timers().contains(addr(1), TimerKind::ReplyAckTimeout));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        a.node.route_discovery(addr(2), false);
        let PaserMessage::UbRreq(mut rreq) = only_message(&a) else {
            panic!("expected UB_RREQ");
        };
        rreq.metric = 7;
        let result = b.node.handle_incoming_message(&rreq.encode(), 0);
        assert_eq!(result, Err(DropReason::Signature { src: addr(1) }));
        assert!(b.node.neighbor_table().is_empty());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        a.node.route_discovery(addr(2), false);
        b.clock.advance(120_001);
        assert_eq!(relay(&a, &mut b), vec![Err(DropReason::Timestamp { src: addr(1) })]);
    }

    #[test]
    fn test_own_address_in_route_is_a_loop() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        a.node.route_discovery(addr(3), false);
        let PaserMessage::UbRreq(mut rreq) = only_message(&a) else {
            panic!("expected UB_RREQ");
        };
        rreq.route.insert(0, HopRecord::new(addr(2), Vec::new()));
        let result = b.node.handle_incoming_message(&rreq.encode(), 0);
        assert_eq!(result, Err(DropReason::Loop));
    }

    #[test]
    fn test_foreign_key_epoch_rejected() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        b.node.key_nr = 2;
        a.node.route_discovery(addr(2), false);
        assert_eq!(
            relay(&a, &mut b),
            vec![Err(DropReason::KeyEpoch { received: 1, local: 2 })]
        );
    }

    #[test]
    fn test_replayed_ack_rejected() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        a.node.route_discovery(addr(2), false);
        relay(&a, &mut b);
        relay(&b, &mut a);
        let ack = a.transport.drain_control().remove(0).2;
        assert_eq!(b.node.handle_incoming_message(&ack, 0), Ok(()));
        assert_eq!(
            b.node.handle_incoming_message(&ack, 0),
            Err(DropReason::StaleSequence { src: addr(1) })
        );

        // A fresh sequence number does not make the spent secret usable.
        let PaserMessage::TuRrepAck(mut replay) = PaserMessage::decode(&ack).unwrap() else {
            panic!("expected TU_RREP_ACK");
        };
        replay.seq += 10;
        replay.hash = keyed_hash::compute(GTK, &replay.signable());
        assert_eq!(
            b.node.handle_incoming_message(&replay.encode(), 0),
            Err(DropReason::AuthPath { src: addr(1) })
        );
    }

    #[test]
    fn test_wrong_group_key_rejected() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        a.node.route_discovery(addr(2), false);
        relay(&a, &mut b);
        relay(&b, &mut a);
        b.node.gtk = Some(Zeroizing::new(b"another group key".to_vec()));
        assert_eq!(relay(&a, &mut b), vec![Err(DropReason::KeyedHash { src: addr(1) })]);
    }

    #[test]
    fn test_route_error_withdraws_routes_through_reporter() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        handshake(&mut a, &mut b);

        let now = a.node.now();
        a.node.update_route(
            now,
            RouteUpdate {
                dest: addr(3),
                seq: 5,
                next_hop: addr(2),
                metric: 1,
                ifindex: 0,
                ranges: Vec::new(),
                cert: None,
                gateway: false,
            },
        );
        assert!(b.node.send_rerr(vec![UnreachableBlock { addr: addr(3), seq: 0 }]));
        assert_eq!(relay(&b, &mut a), vec![Ok(())]);

        let route = a.node.routing_table().find(&addr(3)).unwrap();
        assert!(!route.is_valid);
        assert_eq!(a.kernel.withdrawn_to(addr(3)).len(), 1);
        // The loss is propagated further.
        assert!(matches!(only_message(&a), PaserMessage::BRerr(ref e) if e.unreachable[0].addr == addr(3)));
    }

    #[test]
    fn test_route_error_with_older_sequence_ignored() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        handshake(&mut a, &mut b);
        let now = a.node.now();
        a.node.update_route(
            now,
            RouteUpdate {
                dest: addr(3),
                seq: 50,
                next_hop: addr(2),
                metric: 1,
                ifindex: 0,
                ranges: Vec::new(),
                cert: None,
                gateway: false,
            },
        );
        b.node.send_rerr(vec![UnreachableBlock { addr: addr(3), seq: 40 }]);
        assert_eq!(relay(&b, &mut a), vec![Ok(())]);
        assert!(a.node.routing_table().find(&addr(3)).unwrap().is_valid);
        assert!(a.transport.drain_control().is_empty());
    }

    #[test]
    fn test_new_root_replaces_neighbor_root() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        handshake(&mut a, &mut b);

        b.node.regenerate_tree().unwrap();
        let results = relay(&b, &mut a);
        assert_eq!(results, vec![Ok(())]);
        let neighbor = a.node.neighbor_table().find(&addr(2)).unwrap();
        assert_eq!(neighbor.root, b.node.root());
        assert_eq!(neighbor.iv, 0);
    }

    #[test]
    fn test_root_from_distant_node_rejected() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, mut b) = pair(&mut ca);
        b.node.regenerate_tree().unwrap();
        assert_eq!(relay(&b, &mut a), vec![Err(DropReason::NotOneHop { src: addr(2) })]);
    }

    #[test]
    fn test_key_reset_restarts_registration() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, _b) = pair(&mut ca);
        let kdc = ca.issue_credentials(Ipv4Addr::new(10, 10, 0, 1), KDC_MARKER, 0);
        let cert = kdc.certificate.to_bytes();
        let reset = BReset {
            src: Ipv4Addr::new(10, 10, 0, 1),
            key_nr: 2,
            sign: kdc.sign(&reset_signable(2, &cert)),
            cert,
        };

        assert_eq!(a.node.handle_incoming_message(&reset.encode(), 0), Ok(()));
        assert_eq!(a.node.key_nr(), 2);
        assert!(!a.node.has_gtk());
        assert!(!a.node.is_registered());

        let sent: Vec<PaserMessage> = a
            .transport
            .drain_control()
            .into_iter()
            .map(|(_, _, bytes)| PaserMessage::decode(&bytes).unwrap())
            .collect();
        assert_eq!(sent.iter().filter(|m| matches!(m, PaserMessage::BReset(_))).count(), 2);
        assert!(sent
            .iter()
            .any(|m| matches!(m, PaserMessage::UbRreq(r) if r.gw_flag && r.dest == BROADCAST)));

        // The same epoch again is stale.
        assert_eq!(
            a.node.handle_incoming_message(&reset.encode(), 0),
            Err(DropReason::NotRegistered)
        );
    }

    #[test]
    fn test_reset_signed_by_ordinary_node_rejected() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, _b) = pair(&mut ca);
        let rogue = ca.issue_credentials(addr(9), "", 0);
        let cert = rogue.certificate.to_bytes();
        let reset = BReset {
            src: addr(9),
            key_nr: 5,
            sign: rogue.sign(&reset_signable(5, &cert)),
            cert,
        };
        assert_eq!(
            a.node.handle_incoming_message(&reset.encode(), 0),
            Err(DropReason::Certificate { src: addr(9) })
        );
        assert_eq!(a.node.key_nr(), 1);
    }

    #[test]
    fn test_kdc_request_on_routing_port_is_malformed() {
        let mut ca = CertificateAuthority::generate();
        let (mut a, _b) = pair(&mut ca);
        let request = KdcRequest {
            src: addr(2),
            gw_addr: addr(1),
            next_hop: addr(2),
            cert: Vec::new(),
            nonce: 1,
        };
        assert!(matches!(
            a.node.handle_incoming_message(&request.encode(), 0),
            Err(DropReason::Malformed(_))
        ));
    }
}
