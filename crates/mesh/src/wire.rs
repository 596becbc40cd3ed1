//! Binary encoding primitives for PASER control messages.
//!
//! All integers are little-endian, addresses are 4 raw bytes and positions
//! two `f64`s. Variable-length fields (byte strings and lists) carry a `u32`
//! length prefix. List lengths are bounded by the remaining input before
//! anything is allocated.

use crate::error::{MeshError, MeshResult};
use paser_core::{AddressRange, GeoPosition, HopRecord, UnreachableBlock};
use paser_crypto::Hash;
use std::net::Ipv4Addr;

/// Append-only encoder.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_addr(&mut self, addr: Ipv4Addr) {
        self.buf.extend_from_slice(&addr.octets());
    }

    pub fn put_hash(&mut self, hash: &Hash) {
        self.buf.extend_from_slice(hash);
    }

    /// Length-prefixed byte string.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_geo(&mut self, pos: &GeoPosition) {
        self.put_f64(pos.lat);
        self.put_f64(pos.lon);
    }

    pub fn put_ranges(&mut self, ranges: &[AddressRange]) {
        self.put_len(ranges.len());
        for range in ranges {
            self.put_addr(range.addr);
            self.put_addr(range.mask);
        }
    }

    pub fn put_hops(&mut self, hops: &[HopRecord]) {
        self.put_len(hops.len());
        for hop in hops {
            self.put_addr(hop.addr);
            self.put_ranges(&hop.ranges);
        }
    }

    pub fn put_unreachable(&mut self, blocks: &[UnreachableBlock]) {
        self.put_len(blocks.len());
        for block in blocks {
            self.put_addr(block.addr);
            self.put_u32(block.seq);
        }
    }

    pub fn put_hashes(&mut self, hashes: &[Hash]) {
        self.put_len(hashes.len());
        for hash in hashes {
            self.put_hash(hash);
        }
    }

    fn put_len(&mut self, len: usize) {
        // Field sizes are bounded by datagram sizes, far below u32::MAX.
        self.put_u32(len as u32);
    }
}

/// Zero-copy reader over a received datagram.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail unless the whole input was consumed.
    pub fn finish(&self) -> MeshResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(MeshError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, len: usize) -> MeshResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(MeshError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> MeshResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> MeshResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> MeshResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(MeshError::InvalidField(format!("flag byte {other}"))),
        }
    }

    pub fn u32(&mut self) -> MeshResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn u64(&mut self) -> MeshResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn f64(&mut self) -> MeshResult<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn addr(&mut self) -> MeshResult<Ipv4Addr> {
        Ok(Ipv4Addr::from(self.take_array::<4>()?))
    }

    pub fn hash(&mut self) -> MeshResult<Hash> {
        self.take_array()
    }

    /// Length-prefixed byte string.
    pub fn bytes(&mut self) -> MeshResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn geo(&mut self) -> MeshResult<GeoPosition> {
        let lat = self.f64()?;
        let lon = self.f64()?;
        Ok(GeoPosition::new(lat, lon))
    }

    pub fn ranges(&mut self) -> MeshResult<Vec<AddressRange>> {
        let count = self.list_len(8)?;
        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = self.addr()?;
            let mask = self.addr()?;
            ranges.push(AddressRange::new(addr, mask));
        }
        Ok(ranges)
    }

    pub fn hops(&mut self) -> MeshResult<Vec<HopRecord>> {
        let count = self.list_len(8)?;
        let mut hops = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = self.addr()?;
            let ranges = self.ranges()?;
            hops.push(HopRecord::new(addr, ranges));
        }
        Ok(hops)
    }

    pub fn unreachable(&mut self) -> MeshResult<Vec<UnreachableBlock>> {
        let count = self.list_len(8)?;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = self.addr()?;
            let seq = self.u32()?;
            blocks.push(UnreachableBlock { addr, seq });
        }
        Ok(blocks)
    }

    pub fn hashes(&mut self) -> MeshResult<Vec<Hash>> {
        let count = self.list_len(32)?;
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            hashes.push(self.hash()?);
        }
        Ok(hashes)
    }

    /// Read a list length and reject counts the remaining input cannot hold.
    fn list_len(&mut self, min_element_size: usize) -> MeshResult<usize> {
        let count = self.u32()? as usize;
        let needed = count.saturating_mul(min_element_size);
        if needed > self.remaining() {
            return Err(MeshError::Truncated {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }
}
