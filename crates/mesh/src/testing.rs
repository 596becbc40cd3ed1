//! Recording fakes shared by the unit tests.

use crate::network::{Clock, Datagram, ForwardingTable, KernelRoute, Transport};
use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::rc::Rc;

pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

#[derive(Debug, Default)]
pub struct KernelLog {
    pub installed: Vec<KernelRoute>,
    pub withdrawn: Vec<KernelRoute>,
    pub flushes: usize,
}

/// Forwarding table that records every call.
#[derive(Debug, Default, Clone)]
pub struct RecordingKernel(pub Rc<RefCell<KernelLog>>);

impl RecordingKernel {
    pub fn installed_to(&self, dest: Ipv4Addr) -> Vec<KernelRoute> {
        self.0
            .borrow()
            .installed
            .iter()
            .filter(|r| r.dest == dest)
            .copied()
            .collect()
    }

    /// Routes installed and not withdrawn since, in install order.
    pub fn live(&self) -> Vec<KernelRoute> {
        let log = self.0.borrow();
        let mut live = log.installed.clone();
        for route in &log.withdrawn {
            if let Some(pos) = live.iter().position(|r| r == route) {
                live.remove(pos);
            }
        }
        live
    }

    pub fn live_to(&self, dest: Ipv4Addr) -> Vec<KernelRoute> {
        self.live().into_iter().filter(|r| r.dest == dest).collect()
    }

    pub fn withdrawn_to(&self, dest: Ipv4Addr) -> Vec<KernelRoute> {
        self.0
            .borrow()
            .withdrawn
            .iter()
            .filter(|r| r.dest == dest)
            .copied()
            .collect()
    }
}

impl ForwardingTable for RecordingKernel {
    fn install_route(&mut self, route: KernelRoute) {
        self.0.borrow_mut().installed.push(route);
    }

    fn withdraw_route(&mut self, route: KernelRoute) {
        self.0.borrow_mut().withdrawn.push(route);
    }

    fn flush(&mut self) {
        self.0.borrow_mut().flushes += 1;
    }
}

#[derive(Debug, Default)]
pub struct TransportLog {
    pub control: Vec<(Ipv4Addr, u32, Vec<u8>)>,
    pub kdc: Vec<(Ipv4Addr, Vec<u8>)>,
    pub delivered: Vec<Datagram>,
    pub unreachable: Vec<Datagram>,
}

/// Transport that records every outbound frame.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport(pub Rc<RefCell<TransportLog>>);

impl RecordingTransport {
    /// Take and clear all recorded control frames.
    pub fn drain_control(&self) -> Vec<(Ipv4Addr, u32, Vec<u8>)> {
        std::mem::take(&mut self.0.borrow_mut().control)
    }
}

impl Transport for RecordingTransport {
    fn send_control(&mut self, dest: Ipv4Addr, ifindex: u32, bytes: Vec<u8>) {
        self.0.borrow_mut().control.push((dest, ifindex, bytes));
    }

    fn send_to_kdc(&mut self, kdc: Ipv4Addr, bytes: Vec<u8>) {
        self.0.borrow_mut().kdc.push((kdc, bytes));
    }

    fn deliver(&mut self, datagram: Datagram) {
        self.0.borrow_mut().delivered.push(datagram);
    }

    fn report_unreachable(&mut self, datagram: Datagram) {
        self.0.borrow_mut().unreachable.push(datagram);
    }
}

/// Manually advanced clock.
#[derive(Debug, Default, Clone)]
pub struct ManualClock(pub Rc<Cell<u64>>);

impl ManualClock {
    pub fn at(ms: u64) -> Self {
        Self(Rc::new(Cell::new(ms)))
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}
