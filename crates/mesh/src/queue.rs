//! Datagrams waiting for route discovery.

use crate::network::Datagram;
use paser_core::AddressRange;
use std::net::Ipv4Addr;

#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: Vec<Datagram>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, datagram: Datagram) {
        self.entries.push(datagram);
    }

    /// Remove and return every datagram for `dest`, oldest first.
    pub fn take_for(&mut self, dest: Ipv4Addr) -> Vec<Datagram> {
        self.take_where(|d| d.dest == dest)
    }

    /// Remove and return every datagram whose destination is inside `range`.
    pub fn take_in_range(&mut self, range: &AddressRange) -> Vec<Datagram> {
        self.take_where(|d| range.contains(d.dest))
    }

    fn take_where(&mut self, pred: impl Fn(&Datagram) -> bool) -> Vec<Datagram> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|d| pred(d));
        self.entries = kept;
        taken
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(dest: Ipv4Addr, tag: u8) -> Datagram {
        Datagram::new(Ipv4Addr::new(10, 0, 0, 1), dest, vec![tag])
    }

    #[test]
    fn test_take_for_preserves_order() {
        let mut queue = MessageQueue::new();
        let a = Ipv4Addr::new(10, 0, 0, 5);
        let b = Ipv4Addr::new(10, 0, 0, 6);
        queue.push(datagram(a, 1));
        queue.push(datagram(b, 2));
        queue.push(datagram(a, 3));

        let taken = queue.take_for(a);
        assert_eq!(taken.iter().map(|d| d.payload[0]).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_take_in_range() {
        let mut queue = MessageQueue::new();
        queue.push(datagram(Ipv4Addr::new(192, 168, 3, 4), 1));
        queue.push(datagram(Ipv4Addr::new(192, 168, 4, 4), 2));
        let range = AddressRange::new(
            Ipv4Addr::new(192, 168, 3, 0),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        assert_eq!(queue.take_in_range(&range).len(), 1);
        assert_eq!(queue.len(), 1);
    }
}
