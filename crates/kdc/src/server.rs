//! Registration and key rotation.

use crate::error::{KdcError, KdcResult};
use paser_crypto::{seal, Certificate, Crl, NodeCredentials, TrustStore};
use paser_mesh::message::{reset_signable, BReset, KdcBlock, KdcReply, KdcRequest, Packet};
use rand::RngCore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Length of a generated group key.
pub const GTK_LEN: usize = 32;

/// A new key epoch and the gateways that must learn about it.
#[derive(Debug, Clone)]
pub struct KeyRotation {
    pub reset: BReset,
    pub gateways: Vec<Ipv4Addr>,
}

/// Snapshot of the KDC state for logging and inspection.
#[derive(Debug, Clone, Serialize)]
pub struct KdcStatus {
    pub address: Ipv4Addr,
    pub key_nr: u32,
    pub gateways: Vec<Ipv4Addr>,
    pub has_crl: bool,
}

/// In-process key distribution center.
pub struct SimpleKdc {
    address: Ipv4Addr,
    credentials: NodeCredentials,
    trust: TrustStore,
    gtk: Zeroizing<Vec<u8>>,
    key_nr: u32,
    crl: Vec<u8>,
    gateways: BTreeSet<Ipv4Addr>,
}

impl SimpleKdc {
    /// Create a KDC with a fresh random GTK at key epoch 1. The credentials
    /// must carry the KDC role.
    pub fn new(address: Ipv4Addr, credentials: NodeCredentials, trust: TrustStore) -> Self {
        Self {
            address,
            credentials,
            trust,
            gtk: Self::generate_gtk(),
            key_nr: 1,
            crl: Vec::new(),
            gateways: BTreeSet::new(),
        }
    }

    /// Random group key of [`GTK_LEN`] bytes.
    pub fn generate_gtk() -> Zeroizing<Vec<u8>> {
        let mut gtk = Zeroizing::new(vec![0u8; GTK_LEN]);
        rand::thread_rng().fill_bytes(gtk.as_mut_slice());
        gtk
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn key_nr(&self) -> u32 {
        self.key_nr
    }

    /// The GTK of the current epoch.
    pub fn gtk(&self) -> &[u8] {
        &self.gtk
    }

    pub fn status(&self) -> KdcStatus {
        KdcStatus {
            address: self.address,
            key_nr: self.key_nr,
            gateways: self.gateways.iter().copied().collect(),
            has_crl: !self.crl.is_empty(),
        }
    }

    /// Publish a revocation list with every following registration.
    pub fn set_crl(&mut self, crl: &Crl) -> KdcResult<()> {
        let bytes = crl.to_bytes();
        self.trust.set_crl(&bytes)?;
        info!(kdc = %self.address, revoked = crl.revoked.len(), "revocation list updated");
        self.crl = bytes;
        Ok(())
    }

    /// Answer a registration request relayed by a gateway.
    pub fn handle_request(&mut self, request: &KdcRequest, now_ms: u64) -> KdcResult<KdcReply> {
        let certificate = Certificate::from_bytes(&request.cert).map_err(KdcError::Refused)?;
        if let Err(e) = self.trust.check(&certificate, now_ms) {
            warn!(kdc = %self.address, src = %request.src, error = %e, "registration refused");
            return Err(KdcError::Refused(e));
        }

        let block = self.key_block(&certificate, request.nonce)?;
        self.gateways.insert(request.gw_addr);
        info!(
            kdc = %self.address,
            src = %request.src,
            gateway = %request.gw_addr,
            key_nr = self.key_nr,
            "registration answered"
        );
        Ok(KdcReply {
            src: request.src,
            gw_addr: request.gw_addr,
            next_hop: request.next_hop,
            block,
        })
    }

    /// Decode a datagram from a gateway and answer it. Returns the gateway
    /// address and the encoded reply.
    pub fn handle_datagram(&mut self, bytes: &[u8], now_ms: u64) -> KdcResult<(Ipv4Addr, Vec<u8>)> {
        match Packet::decode(bytes)? {
            Packet::KdcRequest(request) => {
                let reply = self.handle_request(&request, now_ms)?;
                Ok((reply.gw_addr, reply.encode()))
            }
            other => {
                debug!(kdc = %self.address, "ignoring non-registration packet");
                Err(KdcError::UnexpectedPacket(format!("{other:?}")))
            }
        }
    }

    /// Move to the next key epoch with `new_gtk`.
    pub fn rotate_key(&mut self, new_gtk: Zeroizing<Vec<u8>>) -> KeyRotation {
        self.gtk = new_gtk;
        self.key_nr += 1;
        info!(kdc = %self.address, key_nr = self.key_nr, "group key rotated");
        KeyRotation {
            reset: self.reset_message(),
            gateways: self.gateways.iter().copied().collect(),
        }
    }

    /// Signed `B_RESET` for the current epoch.
    pub fn reset_message(&self) -> BReset {
        let cert = self.credentials.certificate.to_bytes();
        BReset {
            src: self.address,
            key_nr: self.key_nr,
            sign: self.credentials.sign(&reset_signable(self.key_nr, &cert)),
            cert,
        }
    }

    fn key_block(&self, recipient: &Certificate, nonce: u32) -> KdcResult<KdcBlock> {
        let cert_kdc = self.credentials.certificate.to_bytes();
        let mut block = KdcBlock {
            gtk: seal::seal_to(recipient, &self.gtk)?,
            nonce,
            crl: self.crl.clone(),
            sign_key: self
                .credentials
                .sign(&reset_signable(self.key_nr, &cert_kdc)),
            cert_kdc,
            sign: Vec::new(),
            key_nr: self.key_nr,
        };
        block.sign = self.credentials.sign(&block.signable());
        Ok(block)
    }
}
