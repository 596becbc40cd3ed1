//! PASER control messages and the KDC exchange records.
//!
//! Every message starts with a one-byte type tag. The *signable* encoding of
//! a message is its complete encoding without the trailing signature (for
//! asymmetrically signed kinds) or keyed hash (for GTK-protected kinds).
//!
//! | tag  | kind          | protection                     |
//! |------|---------------|--------------------------------|
//! | 0    | UB_RREQ       | signature of the last forwarder |
//! | 1    | UU_RREP       | signature of the last forwarder |
//! | 2    | TU_RREQ       | GTK hash + one-time secret     |
//! | 3    | TU_RREP       | GTK hash + one-time secret     |
//! | 4    | TU_RREP_ACK   | GTK hash + one-time secret     |
//! | 5    | B_RERR        | GTK hash + one-time secret     |
//! | 6    | B_HELLO       | GTK hash + one-time secret     |
//! | 7    | B_ROOT        | signature of the originator    |
//! | 8    | B_RESET       | KDC signature                  |
//! | 0x10 | KDC request   | gateway to KDC                 |
//! | 0x11 | KDC reply     | KDC to gateway                 |

use crate::error::{MeshError, MeshResult};
use crate::wire::{Reader, Writer};
use paser_core::{GeoPosition, HopRecord, UnreachableBlock, SECRET_LEN};
use paser_crypto::{Hash, ReleasedSecret};
use std::net::Ipv4Addr;

/// Tag of a gateway-to-KDC request.
pub const KDC_REQUEST_TAG: u8 = 0x10;
/// Tag of a KDC-to-gateway reply.
pub const KDC_REPLY_TAG: u8 = 0x11;

/// Type tag of a PASER control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    UbRreq = 0,
    UuRrep = 1,
    TuRreq = 2,
    TuRrep = 3,
    TuRrepAck = 4,
    BRerr = 5,
    BHello = 6,
    BRoot = 7,
    BReset = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = MeshError;

    fn try_from(tag: u8) -> MeshResult<Self> {
        Ok(match tag {
            0 => MessageType::UbRreq,
            1 => MessageType::UuRrep,
            2 => MessageType::TuRreq,
            3 => MessageType::TuRrep,
            4 => MessageType::TuRrepAck,
            5 => MessageType::BRerr,
            6 => MessageType::BHello,
            7 => MessageType::BRoot,
            8 => MessageType::BReset,
            other => return Err(MeshError::UnknownMessageType(other)),
        })
    }
}

/// A released one-time secret and its authentication path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthProof {
    pub secret: [u8; SECRET_LEN],
    pub auth_path: Vec<Hash>,
}

impl From<ReleasedSecret> for AuthProof {
    fn from(released: ReleasedSecret) -> Self {
        Self {
            secret: released.secret,
            auth_path: released.auth_path,
        }
    }
}

impl AuthProof {
    fn write(&self, w: &mut Writer) {
        w.put_hash(&self.secret);
        w.put_hashes(&self.auth_path);
    }

    fn read(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            secret: r.hash()?,
            auth_path: r.hashes()?,
        })
    }
}

/// Registration material issued by the KDC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcBlock {
    /// GTK sealed to the requesting node's certificate
    pub gtk: Vec<u8>,
    /// Echo of the requester's nonce
    pub nonce: u32,
    /// Current certificate revocation list
    pub crl: Vec<u8>,
    /// Certificate of the KDC
    pub cert_kdc: Vec<u8>,
    /// KDC signature over [`KdcBlock::signable`]
    pub sign: Vec<u8>,
    /// Key epoch of the GTK
    pub key_nr: u32,
    /// KDC signature over [`reset_signable`], replayed in B_RESET messages
    pub sign_key: Vec<u8>,
}

impl KdcBlock {
    /// Bytes covered by `sign`: GTK, nonce, key number, CRL, KDC certificate.
    pub fn signable(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_bytes(&self.gtk);
        w.put_u32(self.nonce);
        w.put_u32(self.key_nr);
        w.put_bytes(&self.crl);
        w.put_bytes(&self.cert_kdc);
        w.into_bytes()
    }

    fn write(&self, w: &mut Writer) {
        w.put_bytes(&self.gtk);
        w.put_u32(self.nonce);
        w.put_bytes(&self.crl);
        w.put_bytes(&self.cert_kdc);
        w.put_bytes(&self.sign);
        w.put_u32(self.key_nr);
        w.put_bytes(&self.sign_key);
    }

    fn read(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            gtk: r.bytes()?,
            nonce: r.u32()?,
            crl: r.bytes()?,
            cert_kdc: r.bytes()?,
            sign: r.bytes()?,
            key_nr: r.u32()?,
            sign_key: r.bytes()?,
        })
    }

    fn write_opt(block: &Option<KdcBlock>, w: &mut Writer) {
        match block {
            Some(block) => {
                w.put_bool(true);
                block.write(w);
            }
            None => w.put_bool(false),
        }
    }

    fn read_opt(r: &mut Reader<'_>) -> MeshResult<Option<Self>> {
        if r.bool()? {
            Ok(Some(Self::read(r)?))
        } else {
            Ok(None)
        }
    }
}

/// Bytes the KDC signs to authorize a key reset: key number and KDC
/// certificate.
pub fn reset_signable(key_nr: u32, cert_kdc: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u32(key_nr);
    w.put_bytes(cert_kdc);
    w.into_bytes()
}

macro_rules! signed_encoding {
    ($name:ident, $kind:expr) => {
        impl $name {
            /// Bytes covered by the signature.
            pub fn signable(&self) -> Vec<u8> {
                let mut w = Writer::new();
                w.put_u8($kind as u8);
                self.write_fields(&mut w);
                w.into_bytes()
            }

            /// Complete wire encoding.
            pub fn encode(&self) -> Vec<u8> {
                let mut w = Writer::new();
                w.put_u8($kind as u8);
                self.write_fields(&mut w);
                w.put_bytes(&self.sign);
                w.into_bytes()
            }
        }
    };
}

macro_rules! keyed_encoding {
    ($name:ident, $kind:expr) => {
        impl $name {
            /// Bytes covered by the keyed hash.
            pub fn signable(&self) -> Vec<u8> {
                let mut w = Writer::new();
                w.put_u8($kind as u8);
                self.write_fields(&mut w);
                w.into_bytes()
            }

            /// Complete wire encoding.
            pub fn encode(&self) -> Vec<u8> {
                let mut w = Writer::new();
                w.put_u8($kind as u8);
                self.write_fields(&mut w);
                w.put_hash(&self.hash);
                w.into_bytes()
            }
        }
    };
}

/// Unicast-less route request, flooded hop by hop and signed by every
/// forwarder.
#[derive(Debug, Clone, PartialEq)]
pub struct UbRreq {
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub seq: u32,
    pub key_nr: u32,
    /// Sequence number of the last forwarder
    pub seq_forw: u32,
    /// Set when the request is a gateway search carrying a registration
    pub gw_flag: bool,
    /// Accumulated route, originator first
    pub route: Vec<HopRecord>,
    /// Hops between the querying node and the last forwarder
    pub metric: u32,
    pub nonce: u32,
    /// Certificate of the querying node (gateway searches only)
    pub cert: Vec<u8>,
    /// Certificate of the last forwarder
    pub cert_forw: Vec<u8>,
    /// Authentication tree root of the last forwarder
    pub root: Hash,
    /// Next unused secret index of the last forwarder
    pub iv: u32,
    pub geo_querying: GeoPosition,
    pub geo_forwarding: GeoPosition,
    pub timestamp: u64,
    pub sign: Vec<u8>,
}

impl UbRreq {
    fn write_fields(&self, w: &mut Writer) {
        w.put_addr(self.src);
        w.put_addr(self.dest);
        w.put_u32(self.seq);
        w.put_u32(self.key_nr);
        w.put_u32(self.seq_forw);
        w.put_bool(self.gw_flag);
        w.put_hops(&self.route);
        w.put_u32(self.metric);
        w.put_u32(self.nonce);
        w.put_bytes(&self.cert);
        w.put_bytes(&self.cert_forw);
        w.put_hash(&self.root);
        w.put_u32(self.iv);
        w.put_geo(&self.geo_querying);
        w.put_geo(&self.geo_forwarding);
        w.put_u64(self.timestamp);
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            dest: r.addr()?,
            seq: r.u32()?,
            key_nr: r.u32()?,
            seq_forw: r.u32()?,
            gw_flag: r.bool()?,
            route: r.hops()?,
            metric: r.u32()?,
            nonce: r.u32()?,
            cert: r.bytes()?,
            cert_forw: r.bytes()?,
            root: r.hash()?,
            iv: r.u32()?,
            geo_querying: r.geo()?,
            geo_forwarding: r.geo()?,
            timestamp: r.u64()?,
            sign: r.bytes()?,
        })
    }
}
signed_encoding!(UbRreq, MessageType::UbRreq);

/// Unicast reply to a UB_RREQ sent over a not yet trusted link.
#[derive(Debug, Clone, PartialEq)]
pub struct UuRrep {
    /// Querying node
    pub src: Ipv4Addr,
    /// Answering node
    pub dest: Ipv4Addr,
    pub seq: u32,
    pub key_nr: u32,
    pub gw_flag: bool,
    /// Accumulated route, answering node first
    pub route: Vec<HopRecord>,
    pub metric_querying: u32,
    pub metric_dest: u32,
    pub cert_forw: Vec<u8>,
    pub root: Hash,
    pub iv: u32,
    pub geo_dest: GeoPosition,
    pub geo_forwarding: GeoPosition,
    pub kdc: Option<KdcBlock>,
    pub timestamp: u64,
    pub sign: Vec<u8>,
}

impl UuRrep {
    fn write_fields(&self, w: &mut Writer) {
        w.put_addr(self.src);
        w.put_addr(self.dest);
        w.put_u32(self.seq);
        w.put_u32(self.key_nr);
        w.put_bool(self.gw_flag);
        w.put_hops(&self.route);
        w.put_u32(self.metric_querying);
        w.put_u32(self.metric_dest);
        w.put_bytes(&self.cert_forw);
        w.put_hash(&self.root);
        w.put_u32(self.iv);
        w.put_geo(&self.geo_dest);
        w.put_geo(&self.geo_forwarding);
        KdcBlock::write_opt(&self.kdc, w);
        w.put_u64(self.timestamp);
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            dest: r.addr()?,
            seq: r.u32()?,
            key_nr: r.u32()?,
            gw_flag: r.bool()?,
            route: r.hops()?,
            metric_querying: r.u32()?,
            metric_dest: r.u32()?,
            cert_forw: r.bytes()?,
            root: r.hash()?,
            iv: r.u32()?,
            geo_dest: r.geo()?,
            geo_forwarding: r.geo()?,
            kdc: KdcBlock::read_opt(r)?,
            timestamp: r.u64()?,
            sign: r.bytes()?,
        })
    }
}
signed_encoding!(UuRrep, MessageType::UuRrep);

/// Route request forwarded over a trusted link.
#[derive(Debug, Clone, PartialEq)]
pub struct TuRreq {
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub seq: u32,
    pub key_nr: u32,
    pub seq_forw: u32,
    pub gw_flag: bool,
    pub route: Vec<HopRecord>,
    pub metric: u32,
    pub nonce: u32,
    pub cert: Vec<u8>,
    pub geo_querying: GeoPosition,
    pub geo_forwarding: GeoPosition,
    pub proof: AuthProof,
    pub hash: Hash,
}

impl TuRreq {
    fn write_fields(&self, w: &mut Writer) {
        w.put_addr(self.src);
        w.put_addr(self.dest);
        w.put_u32(self.seq);
        w.put_u32(self.key_nr);
        w.put_u32(self.seq_forw);
        w.put_bool(self.gw_flag);
        w.put_hops(&self.route);
        w.put_u32(self.metric);
        w.put_u32(self.nonce);
        w.put_bytes(&self.cert);
        w.put_geo(&self.geo_querying);
        w.put_geo(&self.geo_forwarding);
        self.proof.write(w);
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            dest: r.addr()?,
            seq: r.u32()?,
            key_nr: r.u32()?,
            seq_forw: r.u32()?,
            gw_flag: r.bool()?,
            route: r.hops()?,
            metric: r.u32()?,
            nonce: r.u32()?,
            cert: r.bytes()?,
            geo_querying: r.geo()?,
            geo_forwarding: r.geo()?,
            proof: AuthProof::read(r)?,
            hash: r.hash()?,
        })
    }
}
keyed_encoding!(TuRreq, MessageType::TuRreq);

/// Route reply forwarded over a trusted link.
#[derive(Debug, Clone, PartialEq)]
pub struct TuRrep {
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub seq: u32,
    pub key_nr: u32,
    pub gw_flag: bool,
    pub route: Vec<HopRecord>,
    pub metric_querying: u32,
    pub metric_dest: u32,
    pub kdc: Option<KdcBlock>,
    pub geo_dest: GeoPosition,
    pub geo_forwarding: GeoPosition,
    pub proof: AuthProof,
    pub hash: Hash,
}

impl TuRrep {
    fn write_fields(&self, w: &mut Writer) {
        w.put_addr(self.src);
        w.put_addr(self.dest);
        w.put_u32(self.seq);
        w.put_u32(self.key_nr);
        w.put_bool(self.gw_flag);
        w.put_hops(&self.route);
        w.put_u32(self.metric_querying);
        w.put_u32(self.metric_dest);
        KdcBlock::write_opt(&self.kdc, w);
        w.put_geo(&self.geo_dest);
        w.put_geo(&self.geo_forwarding);
        self.proof.write(w);
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            dest: r.addr()?,
            seq: r.u32()?,
            key_nr: r.u32()?,
            gw_flag: r.bool()?,
            route: r.hops()?,
            metric_querying: r.u32()?,
            metric_dest: r.u32()?,
            kdc: KdcBlock::read_opt(r)?,
            geo_dest: r.geo()?,
            geo_forwarding: r.geo()?,
            proof: AuthProof::read(r)?,
            hash: r.hash()?,
        })
    }
}
keyed_encoding!(TuRrep, MessageType::TuRrep);

/// Acknowledgement of a UU_RREP; promotes the link to trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct TuRrepAck {
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub seq: u32,
    pub key_nr: u32,
    pub proof: AuthProof,
    pub hash: Hash,
}

impl TuRrepAck {
    fn write_fields(&self, w: &mut Writer) {
        w.put_addr(self.src);
        w.put_addr(self.dest);
        w.put_u32(self.seq);
        w.put_u32(self.key_nr);
        self.proof.write(w);
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            dest: r.addr()?,
            seq: r.u32()?,
            key_nr: r.u32()?,
            proof: AuthProof::read(r)?,
            hash: r.hash()?,
        })
    }
}
keyed_encoding!(TuRrepAck, MessageType::TuRrepAck);

/// Broadcast route error.
#[derive(Debug, Clone, PartialEq)]
pub struct BRerr {
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub seq: u32,
    pub key_nr: u32,
    pub unreachable: Vec<UnreachableBlock>,
    pub geo_forwarding: GeoPosition,
    pub proof: AuthProof,
    pub hash: Hash,
}

impl BRerr {
    fn write_fields(&self, w: &mut Writer) {
        w.put_addr(self.src);
        w.put_addr(self.dest);
        w.put_u32(self.seq);
        w.put_u32(self.key_nr);
        w.put_unreachable(&self.unreachable);
        w.put_geo(&self.geo_forwarding);
        self.proof.write(w);
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            dest: r.addr()?,
            seq: r.u32()?,
            key_nr: r.u32()?,
            unreachable: r.unreachable()?,
            geo_forwarding: r.geo()?,
            proof: AuthProof::read(r)?,
            hash: r.hash()?,
        })
    }
}
keyed_encoding!(BRerr, MessageType::BRerr);

/// Periodic neighbor announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct BHello {
    pub src: Ipv4Addr,
    pub seq: u32,
    /// Trusted one-hop neighbors of the sender plus the sender itself
    pub neighbors: Vec<HopRecord>,
    pub geo: GeoPosition,
    pub proof: AuthProof,
    pub hash: Hash,
}

impl BHello {
    fn write_fields(&self, w: &mut Writer) {
        w.put_addr(self.src);
        w.put_u32(self.seq);
        w.put_hops(&self.neighbors);
        w.put_geo(&self.geo);
        self.proof.write(w);
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            seq: r.u32()?,
            neighbors: r.hops()?,
            geo: r.geo()?,
            proof: AuthProof::read(r)?,
            hash: r.hash()?,
        })
    }
}
keyed_encoding!(BHello, MessageType::BHello);

/// Announcement of a freshly generated authentication tree root.
#[derive(Debug, Clone, PartialEq)]
pub struct BRoot {
    pub src: Ipv4Addr,
    pub seq: u32,
    pub cert: Vec<u8>,
    pub root: Hash,
    pub iv: u32,
    pub geo: GeoPosition,
    pub timestamp: u64,
    pub sign: Vec<u8>,
}

impl BRoot {
    fn write_fields(&self, w: &mut Writer) {
        w.put_addr(self.src);
        w.put_u32(self.seq);
        w.put_bytes(&self.cert);
        w.put_hash(&self.root);
        w.put_u32(self.iv);
        w.put_geo(&self.geo);
        w.put_u64(self.timestamp);
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            seq: r.u32()?,
            cert: r.bytes()?,
            root: r.hash()?,
            iv: r.u32()?,
            geo: r.geo()?,
            timestamp: r.u64()?,
            sign: r.bytes()?,
        })
    }
}
signed_encoding!(BRoot, MessageType::BRoot);

/// KDC-authorized switch to a new key epoch, relayed by every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BReset {
    pub src: Ipv4Addr,
    pub key_nr: u32,
    /// Certificate of the KDC
    pub cert: Vec<u8>,
    /// KDC signature over [`reset_signable`]
    pub sign: Vec<u8>,
}

impl BReset {
    /// Bytes covered by the KDC signature.
    pub fn signable(&self) -> Vec<u8> {
        reset_signable(self.key_nr, &self.cert)
    }

    /// Complete wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(MessageType::BReset as u8);
        w.put_addr(self.src);
        w.put_u32(self.key_nr);
        w.put_bytes(&self.cert);
        w.put_bytes(&self.sign);
        w.into_bytes()
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            key_nr: r.u32()?,
            cert: r.bytes()?,
            sign: r.bytes()?,
        })
    }
}

/// Any PASER control message.
#[derive(Debug, Clone, PartialEq)]
pub enum PaserMessage {
    UbRreq(UbRreq),
    UuRrep(UuRrep),
    TuRreq(TuRreq),
    TuRrep(TuRrep),
    TuRrepAck(TuRrepAck),
    BRerr(BRerr),
    BHello(BHello),
    BRoot(BRoot),
    BReset(BReset),
}

impl PaserMessage {
    /// Type tag of the message.
    pub fn kind(&self) -> MessageType {
        match self {
            PaserMessage::UbRreq(_) => MessageType::UbRreq,
            PaserMessage::UuRrep(_) => MessageType::UuRrep,
            PaserMessage::TuRreq(_) => MessageType::TuRreq,
            PaserMessage::TuRrep(_) => MessageType::TuRrep,
            PaserMessage::TuRrepAck(_) => MessageType::TuRrepAck,
            PaserMessage::BRerr(_) => MessageType::BRerr,
            PaserMessage::BHello(_) => MessageType::BHello,
            PaserMessage::BRoot(_) => MessageType::BRoot,
            PaserMessage::BReset(_) => MessageType::BReset,
        }
    }

    /// Source address carried in the message.
    pub fn src(&self) -> Ipv4Addr {
        match self {
            PaserMessage::UbRreq(m) => m.src,
            PaserMessage::UuRrep(m) => m.src,
            PaserMessage::TuRreq(m) => m.src,
            PaserMessage::TuRrep(m) => m.src,
            PaserMessage::TuRrepAck(m) => m.src,
            PaserMessage::BRerr(m) => m.src,
            PaserMessage::BHello(m) => m.src,
            PaserMessage::BRoot(m) => m.src,
            PaserMessage::BReset(m) => m.src,
        }
    }

    /// Complete wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PaserMessage::UbRreq(m) => m.encode(),
            PaserMessage::UuRrep(m) => m.encode(),
            PaserMessage::TuRreq(m) => m.encode(),
            PaserMessage::TuRrep(m) => m.encode(),
            PaserMessage::TuRrepAck(m) => m.encode(),
            PaserMessage::BRerr(m) => m.encode(),
            PaserMessage::BHello(m) => m.encode(),
            PaserMessage::BRoot(m) => m.encode(),
            PaserMessage::BReset(m) => m.encode(),
        }
    }

    /// Decode a control message, rejecting unknown tags and trailing bytes.
    pub fn decode(bytes: &[u8]) -> MeshResult<Self> {
        let mut r = Reader::new(bytes);
        let kind = MessageType::try_from(r.u8()?)?;
        let message = Self::decode_kind(kind, &mut r)?;
        r.finish()?;
        Ok(message)
    }

    fn decode_kind(kind: MessageType, r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(match kind {
            MessageType::UbRreq => PaserMessage::UbRreq(UbRreq::read_fields(r)?),
            MessageType::UuRrep => PaserMessage::UuRrep(UuRrep::read_fields(r)?),
            MessageType::TuRreq => PaserMessage::TuRreq(TuRreq::read_fields(r)?),
            MessageType::TuRrep => PaserMessage::TuRrep(TuRrep::read_fields(r)?),
            MessageType::TuRrepAck => PaserMessage::TuRrepAck(TuRrepAck::read_fields(r)?),
            MessageType::BRerr => PaserMessage::BRerr(BRerr::read_fields(r)?),
            MessageType::BHello => PaserMessage::BHello(BHello::read_fields(r)?),
            MessageType::BRoot => PaserMessage::BRoot(BRoot::read_fields(r)?),
            MessageType::BReset => PaserMessage::BReset(BReset::read_fields(r)?),
        })
    }
}

/// Registration request a gateway relays to the KDC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcRequest {
    /// Node asking for registration
    pub src: Ipv4Addr,
    /// Gateway relaying the request
    pub gw_addr: Ipv4Addr,
    /// Neighbor of the gateway the answer goes back through
    pub next_hop: Ipv4Addr,
    /// Certificate of `src`
    pub cert: Vec<u8>,
    pub nonce: u32,
}

impl KdcRequest {
    /// Complete wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(KDC_REQUEST_TAG);
        w.put_addr(self.src);
        w.put_addr(self.gw_addr);
        w.put_addr(self.next_hop);
        w.put_bytes(&self.cert);
        w.put_u32(self.nonce);
        w.into_bytes()
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            gw_addr: r.addr()?,
            next_hop: r.addr()?,
            cert: r.bytes()?,
            nonce: r.u32()?,
        })
    }
}

/// KDC answer to a [`KdcRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcReply {
    pub src: Ipv4Addr,
    pub gw_addr: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub block: KdcBlock,
}

impl KdcReply {
    /// Complete wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(KDC_REPLY_TAG);
        w.put_addr(self.src);
        w.put_addr(self.gw_addr);
        w.put_addr(self.next_hop);
        self.block.write(&mut w);
        w.into_bytes()
    }

    fn read_fields(r: &mut Reader<'_>) -> MeshResult<Self> {
        Ok(Self {
            src: r.addr()?,
            gw_addr: r.addr()?,
            next_hop: r.addr()?,
            block: KdcBlock::read(r)?,
        })
    }
}

/// Anything that can arrive on the PASER port.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Control(PaserMessage),
    KdcRequest(KdcRequest),
    KdcReply(KdcReply),
}

impl Packet {
    /// Decode a datagram received on the PASER port.
    pub fn decode(bytes: &[u8]) -> MeshResult<Self> {
        let mut r = Reader::new(bytes);
        let tag = r.u8()?;
        let packet = match tag {
            KDC_REQUEST_TAG => Packet::KdcRequest(KdcRequest::read_fields(&mut r)?),
            KDC_REPLY_TAG => Packet::KdcReply(KdcReply::read_fields(&mut r)?),
            other => {
                let kind = MessageType::try_from(other)?;
                Packet::Control(PaserMessage::decode_kind(kind, &mut r)?)
            }
        };
        r.finish()?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paser_core::AddressRange;

    fn hop(last: u8) -> HopRecord {
        HopRecord::new(Ipv4Addr::new(10, 0, 0, last), vec![])
    }

    fn proof() -> AuthProof {
        AuthProof {
            secret: [7u8; SECRET_LEN],
            auth_path: vec![[1u8; 32], [2u8; 32]],
        }
    }

    fn sample_block() -> KdcBlock {
        KdcBlock {
            gtk: vec![9; 48],
            nonce: 77,
            crl: vec![3; 12],
            cert_kdc: vec![4; 20],
            sign: vec![5; 64],
            key_nr: 2,
            sign_key: vec![6; 64],
        }
    }

    fn sample_rreq() -> UbRreq {
        UbRreq {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dest: Ipv4Addr::new(10, 0, 0, 9),
            seq: 12,
            key_nr: 1,
            seq_forw: 40,
            gw_flag: true,
            route: vec![
                HopRecord::new(
                    Ipv4Addr::new(10, 0, 0, 1),
                    vec![AddressRange::new(
                        Ipv4Addr::new(192, 168, 1, 0),
                        Ipv4Addr::new(255, 255, 255, 0),
                    )],
                ),
                hop(2),
            ],
            metric: 1,
            nonce: 0xdead_beef,
            cert: vec![1, 2, 3],
            cert_forw: vec![4, 5],
            root: [8u8; 32],
            iv: 3,
            geo_querying: GeoPosition::new(1.0, 2.0),
            geo_forwarding: GeoPosition::new(3.0, 4.0),
            timestamp: 1_700_000_000_000,
            sign: vec![0xaa; 64],
        }
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(MessageType::TuRrep as u8, 3);
        assert_eq!(MessageType::BReset as u8, 8);
        assert!(matches!(
            MessageType::try_from(9),
            Err(MeshError::UnknownMessageType(9))
        ));
    }

    #[test]
    fn test_ub_rreq_decodes_to_same_message() {
        let msg = PaserMessage::UbRreq(sample_rreq());
        let bytes = msg.encode();
        assert_eq!(bytes[0], 0);
        assert_eq!(PaserMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_signable_is_encoding_without_signature() {
        let rreq = sample_rreq();
        let signable = rreq.signable();
        let encoded = rreq.encode();
        assert!(encoded.starts_with(&signable));
        assert_eq!(encoded.len(), signable.len() + 4 + rreq.sign.len());
    }

    #[test]
    fn test_signable_excludes_keyed_hash() {
        let ack = TuRrepAck {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dest: Ipv4Addr::new(10, 0, 0, 2),
            seq: 5,
            key_nr: 1,
            proof: proof(),
            hash: [0x55; 32],
        };
        let encoded = ack.encode();
        assert_eq!(&encoded[..encoded.len() - 32], ack.signable().as_slice());
        assert_eq!(&encoded[encoded.len() - 32..], &[0x55; 32]);
    }

    #[test]
    fn test_changing_a_field_changes_signable() {
        let rreq = sample_rreq();
        let mut tampered = rreq.clone();
        tampered.metric += 1;
        assert_ne!(rreq.signable(), tampered.signable());
    }

    #[test]
    fn test_reply_with_and_without_kdc_block() {
        let mut rrep = TuRrep {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dest: Ipv4Addr::new(10, 0, 0, 3),
            seq: 8,
            key_nr: 2,
            gw_flag: true,
            route: vec![hop(3)],
            metric_querying: 2,
            metric_dest: 0,
            kdc: Some(sample_block()),
            geo_dest: GeoPosition::default(),
            geo_forwarding: GeoPosition::default(),
            proof: proof(),
            hash: [1; 32],
        };
        let with_block = PaserMessage::TuRrep(rrep.clone());
        assert_eq!(PaserMessage::decode(&with_block.encode()).unwrap(), with_block);

        rrep.kdc = None;
        let without = PaserMessage::TuRrep(rrep);
        assert!(without.encode().len() < with_block.encode().len());
        assert_eq!(PaserMessage::decode(&without.encode()).unwrap(), without);
    }

    #[test]
    fn test_reset_signable_matches_block_key_signature_input() {
        let block = sample_block();
        let reset = BReset {
            src: Ipv4Addr::new(10, 0, 0, 4),
            key_nr: block.key_nr,
            cert: block.cert_kdc.clone(),
            sign: block.sign_key.clone(),
        };
        assert_eq!(reset.signable(), reset_signable(block.key_nr, &block.cert_kdc));
        assert_eq!(PaserMessage::decode(&reset.encode()).unwrap(), PaserMessage::BReset(reset));
    }

    #[test]
    fn test_trailing_and_truncated_input_rejected() {
        let mut bytes = PaserMessage::UbRreq(sample_rreq()).encode();
        bytes.push(0);
        assert!(matches!(
            PaserMessage::decode(&bytes),
            Err(MeshError::TrailingBytes(1))
        ));

        bytes.truncate(bytes.len() - 10);
        assert!(matches!(
            PaserMessage::decode(&bytes),
            Err(MeshError::Truncated { .. })
        ));
    }

    #[test]
    fn test_packet_dispatches_on_tag() {
        let request = KdcRequest {
            src: Ipv4Addr::new(10, 0, 0, 1),
            gw_addr: Ipv4Addr::new(10, 0, 0, 2),
            next_hop: Ipv4Addr::new(10, 0, 0, 1),
            cert: vec![1; 10],
            nonce: 3,
        };
        assert_eq!(
            Packet::decode(&request.encode()).unwrap(),
            Packet::KdcRequest(request.clone())
        );

        let reply = KdcReply {
            src: request.src,
            gw_addr: request.gw_addr,
            next_hop: request.next_hop,
            block: sample_block(),
        };
        assert_eq!(Packet::decode(&reply.encode()).unwrap(), Packet::KdcReply(reply));

        let hello = BHello {
            src: Ipv4Addr::new(10, 0, 0, 5),
            seq: 1,
            neighbors: vec![hop(5), hop(6)],
            geo: GeoPosition::default(),
            proof: proof(),
            hash: [0; 32],
        };
        assert!(matches!(
            Packet::decode(&hello.encode()).unwrap(),
            Packet::Control(PaserMessage::BHello(_))
        ));
        assert!(matches!(Packet::decode(&[0x42]), Err(MeshError::UnknownMessageType(0x42))));
        assert!(matches!(Packet::decode(&[]), Err(MeshError::Truncated { .. })));
    }
}
