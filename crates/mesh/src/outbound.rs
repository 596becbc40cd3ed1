//! Construction and transmission of PASER control messages.
//!
//! Every transmitted message consumes one local sequence number. Messages
//! over untrusted links are signed with the local certificate; messages over
//! trusted links reveal the next one-time secret and carry a keyed hash
//! under the GTK.

use crate::error::DropReason;
use crate::message::{
    BReset, BRerr, BRoot, KdcBlock, PaserMessage, TuRrep, TuRrepAck, TuRreq, UbRreq, UuRrep,
};
use crate::node::PaserNode;
use crate::timer::TimerKind;
use paser_core::{UnreachableBlock, BROADCAST};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

impl PaserNode {
    /// Broadcast a fresh UB_RREQ from interface `ifindex`. Returns the
    /// message for the retransmission timer.
    pub(crate) fn send_ub_rreq(&mut self, ifindex: u32, ifaddr: Ipv4Addr, dest: Ipv4Addr, gateway_seek: bool) -> UbRreq {
        let now = self.now();
        let here = self.here();
        let own_cert = self.engine.own_certificate();
        let mut msg = UbRreq {
            src: ifaddr,
            dest,
            seq: self.seq,
            key_nr: self.key_nr,
            seq_forw: self.seq,
            gw_flag: gateway_seek,
            route: vec![self.own_hop(ifaddr)],
            metric: 0,
            nonce: if gateway_seek { self.gw_nonce } else { 0 },
            cert: if gateway_seek { own_cert.clone() } else { Vec::new() },
            cert_forw: own_cert,
            root: self.tree.root(),
            iv: self.tree.iv(),
            geo_querying: here,
            geo_forwarding: here,
            timestamp: now,
            sign: Vec::new(),
        };
        msg.sign = self.engine.sign(&msg.signable());
        debug!(node = %self.address(), dest = %dest, seq = msg.seq, gateway_seek, "sending UB_RREQ");
        self.transport.send_control(BROADCAST, ifindex, msg.encode());
        self.reset_hello_timer(now);
        msg
    }

    /// Answer a route request over an untrusted link.
    pub(crate) fn send_uu_rrep(
        &mut self,
        querying: Ipv4Addr,
        forwarder: Ipv4Addr,
        kdc: Option<KdcBlock>,
    ) -> Result<UuRrep, DropReason> {
        let metric_querying = self
            .routes
            .find(&querying)
            .filter(|e| e.is_valid)
            .map(|e| e.hop_count)
            .ok_or(DropReason::NoRoute { dest: querying })?;
        let ifindex = self.neighbor_ifindex(forwarder);
        let ifaddr = self.interface_addr(ifindex);
        let here = self.here();
        let mut msg = UuRrep {
            src: querying,
            dest: ifaddr,
            seq: self.seq,
            key_nr: self.key_nr,
            gw_flag: kdc.is_some(),
            route: vec![self.own_hop(ifaddr)],
            metric_querying,
            metric_dest: 0,
            cert_forw: self.engine.own_certificate(),
            root: self.tree.root(),
            iv: self.tree.iv(),
            geo_dest: here,
            geo_forwarding: here,
            kdc,
            timestamp: self.now(),
            sign: Vec::new(),
        };
        msg.sign = self.engine.sign(&msg.signable());
        debug!(node = %self.address(), querying = %querying, next_hop = %forwarder, "sending UU_RREP");
        self.transport.send_control(forwarder, ifindex, msg.encode());
        self.bump_seq();
        Ok(msg)
    }

    /// Answer a route request over a trusted link.
    pub(crate) fn send_tu_rrep(
        &mut self,
        querying: Ipv4Addr,
        forwarder: Ipv4Addr,
        kdc: Option<KdcBlock>,
    ) -> Result<(), DropReason> {
        let metric_querying = self
            .routes
            .find(&querying)
            .filter(|e| e.is_valid)
            .map(|e| e.hop_count)
            .ok_or(DropReason::NoRoute { dest: querying })?;
        let proof = self.next_proof()?;
        let ifindex = self.neighbor_ifindex(forwarder);
        let ifaddr = self.interface_addr(ifindex);
        let here = self.here();
        let mut msg = TuRrep {
            src: querying,
            dest: ifaddr,
            seq: self.seq,
            key_nr: self.key_nr,
            gw_flag: kdc.is_some(),
            route: vec![self.own_hop(ifaddr)],
            metric_querying,
            metric_dest: 0,
            kdc,
            geo_dest: here,
            geo_forwarding: here,
            proof,
            hash: [0; 32],
        };
        msg.hash = self.keyed_hash(&msg.signable())?;
        debug!(node = %self.address(), querying = %querying, next_hop = %forwarder, "sending TU_RREP");
        self.transport.send_control(forwarder, ifindex, msg.encode());
        self.bump_seq();
        Ok(())
    }

    /// Acknowledge a UU_RREP received from `forwarder`.
    pub(crate) fn send_tu_rrep_ack(&mut self, forwarder: Ipv4Addr) -> Result<(), DropReason> {
        let proof = self.next_proof()?;
        let ifindex = self.neighbor_ifindex(forwarder);
        let mut msg = TuRrepAck {
            src: self.interface_addr(ifindex),
            dest: forwarder,
            seq: self.seq,
            key_nr: self.key_nr,
            proof,
            hash: [0; 32],
        };
        msg.hash = self.keyed_hash(&msg.signable())?;
        debug!(node = %self.address(), neighbor = %forwarder, "sending TU_RREP_ACK");
        self.transport.send_control(forwarder, ifindex, msg.encode());
        self.bump_seq();
        Ok(())
    }

    /// Broadcast a route error on every interface. A report about a single
    /// destination is rate limited. Returns whether anything was sent.
    pub(crate) fn send_rerr(&mut self, unreachable: Vec<UnreachableBlock>) -> bool {
        let now = self.now();
        match unreachable.as_slice() {
            [] => return false,
            [single] if !self.rerr_limiter.allow(single.addr, now) => {
                debug!(node = %self.address(), dest = %single.addr, "route error rate limited");
                return false;
            }
            _ => {}
        }
        if self.gtk().is_err() {
            debug!(node = %self.address(), "no group key, route error not sent");
            return false;
        }

        let here = self.here();
        for (ifindex, ifaddr) in self.interfaces() {
            let proof = match self.next_proof() {
                Ok(proof) => proof,
                Err(reason) => {
                    warn!(node = %self.address(), %reason, "cannot authenticate route error");
                    return false;
                }
            };
            let mut msg = BRerr {
                src: ifaddr,
                dest: BROADCAST,
                seq: self.seq,
                key_nr: self.key_nr,
                unreachable: unreachable.clone(),
                geo_forwarding: here,
                proof,
                hash: [0; 32],
            };
            match self.keyed_hash(&msg.signable()) {
                Ok(hash) => msg.hash = hash,
                Err(_) => return false,
            }
            debug!(node = %self.address(), count = unreachable.len(), "broadcasting B_RERR");
            self.transport.send_control(BROADCAST, ifindex, msg.encode());
            self.bump_seq();
        }
        true
    }

    /// Broadcast the current authentication tree root on every interface.
    pub(crate) fn send_root(&mut self) {
        let here = self.here();
        let now = self.now();
        for (ifindex, ifaddr) in self.interfaces() {
            let mut msg = BRoot {
                src: ifaddr,
                seq: self.seq,
                cert: self.engine.own_certificate(),
                root: self.tree.root(),
                iv: self.tree.iv(),
                geo: here,
                timestamp: now,
                sign: Vec::new(),
            };
            msg.sign = self.engine.sign(&msg.signable());
            self.transport.send_control(BROADCAST, ifindex, msg.encode());
            self.bump_seq();
        }
    }

    /// Relay the KDC-signed key reset of the current epoch, twice per
    /// interface.
    pub(crate) fn send_reset(&mut self) {
        if self.kdc_cert.is_empty() || self.reset_sign.is_empty() {
            debug!(node = %self.address(), "no reset authorization to relay");
            return;
        }
        for (ifindex, ifaddr) in self.interfaces() {
            let msg = BReset {
                src: ifaddr,
                key_nr: self.key_nr,
                cert: self.kdc_cert.clone(),
                sign: self.reset_sign.clone(),
            };
            let bytes = msg.encode();
            self.transport.send_control(BROADCAST, ifindex, bytes.clone());
            self.transport.send_control(BROADCAST, ifindex, bytes);
        }
    }

    /// Track a UU_RREP sent to `next_hop` until it is acknowledged.
    pub(crate) fn arm_reply_ack(&mut self, next_hop: Ipv4Addr, msg: UuRrep) {
        let at = self.now() + self.config.timers.rrep_wait_ms;
        self.rrep_list.add(next_hop);
        self.timers.add(
            next_hop,
            TimerKind::ReplyAckTimeout,
            at,
            Some(PaserMessage::UuRrep(msg)),
        );
    }

    /// Re-flood a UB_RREQ on every interface with the own hop appended.
    pub(crate) fn forward_ub_rreq(&mut self, msg: &UbRreq) {
        let now = self.now();
        let here = self.here();
        let own_cert = self.engine.own_certificate();
        for (ifindex, ifaddr) in self.interfaces() {
            let mut fwd = msg.clone();
            fwd.timestamp = now;
            fwd.seq_forw = self.seq;
            fwd.route.push(self.own_hop(ifaddr));
            fwd.metric += 1;
            fwd.cert_forw = own_cert.clone();
            fwd.root = self.tree.root();
            fwd.iv = self.tree.iv();
            fwd.geo_forwarding = here;
            fwd.sign = self.engine.sign(&fwd.signable());
            self.transport.send_control(BROADCAST, ifindex, fwd.encode());
        }
        debug!(node = %self.address(), src = %msg.src, dest = %msg.dest, "re-flooding UB_RREQ");
        self.bump_seq();
        self.reset_hello_timer(now);
    }

    /// Forward a flooded request as a TU_RREQ along a known trusted route.
    pub(crate) fn forward_ub_rreq_to_tu_rreq(
        &mut self,
        msg: &UbRreq,
        next_hop: Ipv4Addr,
        dest: Ipv4Addr,
    ) -> Result<(), DropReason> {
        let proof = self.next_proof()?;
        let ifindex = self.neighbor_ifindex(next_hop);
        let ifaddr = self.interface_addr(ifindex);
        let mut route = msg.route.clone();
        route.push(self.own_hop(ifaddr));
        let mut fwd = TuRreq {
            src: msg.src,
            dest,
            seq: msg.seq,
            key_nr: self.key_nr,
            seq_forw: self.seq,
            gw_flag: msg.gw_flag,
            route,
            metric: msg.metric + 1,
            nonce: msg.nonce,
            cert: if msg.gw_flag { msg.cert.clone() } else { Vec::new() },
            geo_querying: msg.geo_querying,
            geo_forwarding: self.here(),
            proof,
            hash: [0; 32],
        };
        fwd.hash = self.keyed_hash(&fwd.signable())?;
        debug!(node = %self.address(), src = %msg.src, next_hop = %next_hop, "UB_RREQ continues as TU_RREQ");
        self.transport.send_control(next_hop, ifindex, fwd.encode());
        self.bump_seq();
        Ok(())
    }

    pub(crate) fn forward_tu_rreq(&mut self, msg: &TuRreq, next_hop: Ipv4Addr) -> Result<(), DropReason> {
        let proof = self.next_proof()?;
        let ifindex = self.neighbor_ifindex(next_hop);
        let ifaddr = self.interface_addr(ifindex);
        let mut fwd = msg.clone();
        fwd.seq_forw = self.seq;
        fwd.route.push(self.own_hop(ifaddr));
        fwd.metric += 1;
        fwd.geo_forwarding = self.here();
        fwd.proof = proof;
        fwd.hash = self.keyed_hash(&fwd.signable())?;
        self.transport.send_control(next_hop, ifindex, fwd.encode());
        self.bump_seq();
        Ok(())
    }

    /// Forward a UU_RREP over another untrusted link, re-signed by us.
    /// Returns the forwarded copy for the acknowledgement timer.
    pub(crate) fn forward_uu_rrep(&mut self, msg: &UuRrep, next_hop: Ipv4Addr) -> UuRrep {
        let ifindex = self.neighbor_ifindex(next_hop);
        let ifaddr = self.interface_addr(ifindex);
        let mut fwd = msg.clone();
        fwd.timestamp = self.now();
        fwd.route.push(self.own_hop(ifaddr));
        fwd.metric_dest += 1;
        fwd.cert_forw = self.engine.own_certificate();
        fwd.root = self.tree.root();
        fwd.iv = self.tree.iv();
        fwd.geo_forwarding = self.here();
        fwd.sign = self.engine.sign(&fwd.signable());
        self.transport.send_control(next_hop, ifindex, fwd.encode());
        self.bump_seq();
        fwd
    }

    pub(crate) fn forward_uu_rrep_to_tu_rrep(&mut self, msg: &UuRrep, next_hop: Ipv4Addr) -> Result<(), DropReason> {
        let proof = self.next_proof()?;
        let ifindex = self.neighbor_ifindex(next_hop);
        let ifaddr = self.interface_addr(ifindex);
        let mut route = msg.route.clone();
        route.push(self.own_hop(ifaddr));
        let mut fwd = TuRrep {
            src: msg.src,
            dest: msg.dest,
            seq: msg.seq,
            key_nr: self.key_nr,
            gw_flag: msg.gw_flag,
            route,
            metric_querying: msg.metric_querying,
            metric_dest: msg.metric_dest + 1,
            kdc: msg.kdc.clone(),
            geo_dest: msg.geo_dest,
            geo_forwarding: self.here(),
            proof,
            hash: [0; 32],
        };
        fwd.hash = self.keyed_hash(&fwd.signable())?;
        self.transport.send_control(next_hop, ifindex, fwd.encode());
        self.bump_seq();
        Ok(())
    }

    /// Forward a TU_RREP over an untrusted link as a signed UU_RREP.
    pub(crate) fn forward_tu_rrep_to_uu_rrep(&mut self, msg: &TuRrep, next_hop: Ipv4Addr) -> UuRrep {
        let ifindex = self.neighbor_ifindex(next_hop);
        let ifaddr = self.interface_addr(ifindex);
        let mut route = msg.route.clone();
        route.push(self.own_hop(ifaddr));
        let mut fwd = UuRrep {
            src: msg.src,
            dest: msg.dest,
            seq: msg.seq,
            key_nr: self.key_nr,
            gw_flag: msg.gw_flag,
            route,
            metric_querying: msg.metric_querying,
            metric_dest: msg.metric_dest + 1,
            cert_forw: self.engine.own_certificate(),
            root: self.tree.root(),
            iv: self.tree.iv(),
            geo_dest: msg.geo_dest,
            geo_forwarding: self.here(),
            kdc: msg.kdc.clone(),
            timestamp: self.now(),
            sign: Vec::new(),
        };
        fwd.sign = self.engine.sign(&fwd.signable());
        self.transport.send_control(next_hop, ifindex, fwd.encode());
        self.bump_seq();
        fwd
    }

    pub(crate) fn forward_tu_rrep(&mut self, msg: &TuRrep, next_hop: Ipv4Addr) -> Result<(), DropReason> {
        let proof = self.next_proof()?;
        let ifindex = self.neighbor_ifindex(next_hop);
        let ifaddr = self.interface_addr(ifindex);
        let mut fwd = msg.clone();
        fwd.route.push(self.own_hop(ifaddr));
        fwd.metric_dest += 1;
        fwd.geo_forwarding = self.here();
        fwd.proof = proof;
        fwd.hash = self.keyed_hash(&fwd.signable())?;
        self.transport.send_control(next_hop, ifindex, fwd.encode());
        self.bump_seq();
        Ok(())
    }
}
