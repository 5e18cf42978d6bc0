//! Originator and neighbor bookkeeping.
//!
//! The table owns every [`OriginatorRecord`] by address. Each record owns
//! the [`NeighborRecord`]s through which its messages arrived. Everything
//! else refers to neighbors by [`NeighborKey`] and looks them up again
//! before use, so purging a record never leaves a dangling reference.

use super::{bitwindow::BitWindow, ring_average::RingAverage};
use crate::messages::HnaEntry;
use crate::ports::Address;
use indexmap::IndexMap;
use std::time::Duration;

/// Identifies a neighbor inside the record that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NeighborKey {
    pub address: Address,
    pub interface: usize,
}

impl NeighborKey {
    pub fn new(address: Address, interface: usize) -> Self {
        Self { address, interface }
    }
}

/// A kernel-level route towards an originator: where to send and how good it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo {
    pub next_hop: Address,
    pub interface: usize,
    pub tq: u8,
}

impl RouteInfo {
    /// Same forwarding decision, regardless of quality.
    pub fn same_path(&self, other: &RouteInfo) -> bool {
        self.next_hop == other.next_hop && self.interface == other.interface
    }
}

#[derive(Debug, Clone)]
pub struct NeighborRecord {
    pub address: Address,
    pub interface: usize,
    /// Originator record of the neighbor itself.
    pub link_originator: Address,
    pub tq: RingAverage,
    pub tq_avg: u8,
    pub real_bits: BitWindow,
    pub real_packet_count: u8,
    pub last_ttl: u8,
    pub hop_count: u8,
    pub last_valid: Duration,
}

impl NeighborRecord {
    fn new(key: NeighborKey, windows: Windows, now: Duration) -> Self {
        Self {
            address: key.address,
            interface: key.interface,
            link_originator: key.address,
            tq: RingAverage::new(windows.global),
            tq_avg: 0,
            real_bits: BitWindow::new(windows.local),
            real_packet_count: 0,
            last_ttl: 0,
            hop_count: 0,
            last_valid: now,
        }
    }

    pub fn key(&self) -> NeighborKey {
        NeighborKey::new(self.address, self.interface)
    }

    pub fn push_tq(&mut self, tq: u8) {
        self.tq.push(tq);
        self.tq_avg = self.tq.average();
    }

    pub(crate) fn observe_seqno(&mut self, seq_diff: i32, mark: bool) {
        self.real_bits.observe(seq_diff, mark);
        self.real_packet_count = self.real_bits.popcount() as u8;
    }
}

#[derive(Debug, Clone)]
pub struct OriginatorRecord {
    pub address: Address,
    pub router: Option<NeighborKey>,
    pub selected_interface: Option<usize>,
    pub neighbors: Vec<NeighborRecord>,
    /// Per interface: which of our own recent messages this node echoed back.
    pub own_bcast: Vec<BitWindow>,
    pub own_bcast_sum: Vec<u8>,
    pub tq_own: u8,
    pub tq_asym_penalty: u8,
    pub last_valid: Duration,
    pub last_ttl: u8,
    pub last_real_seqno: u16,
    pub total_received: u32,
    pub gateway_flags: u8,
    pub gateway_port: u16,
    pub announced: Vec<HnaEntry>,
    pub hop_count: u8,
}

impl OriginatorRecord {
    fn new(address: Address, interfaces: usize, windows: Windows, now: Duration) -> Self {
        Self {
            address,
            router: None,
            selected_interface: None,
            neighbors: Vec::new(),
            own_bcast: vec![BitWindow::new(windows.local); interfaces],
            own_bcast_sum: vec![0; interfaces],
            tq_own: 0,
            tq_asym_penalty: 0,
            last_valid: now,
            last_ttl: 0,
            last_real_seqno: 0,
            total_received: 0,
            gateway_flags: 0,
            gateway_port: 0,
            announced: Vec::new(),
            hop_count: 0,
        }
    }

    pub fn neighbor(&self, key: NeighborKey) -> Option<&NeighborRecord> {
        self.neighbors.iter().find(|n| n.key() == key)
    }

    pub fn neighbor_mut(&mut self, key: NeighborKey) -> Option<&mut NeighborRecord> {
        self.neighbors.iter_mut().find(|n| n.key() == key)
    }

    pub fn router_record(&self) -> Option<&NeighborRecord> {
        self.router.and_then(|key| self.neighbor(key))
    }

    /// Quality of the selected router, 0 without one.
    pub fn router_tq(&self) -> u8 {
        self.router_record().map_or(0, |n| n.tq_avg)
    }

    pub fn route_info(&self) -> Option<RouteInfo> {
        self.router_record().map(|n| RouteInfo {
            next_hop: n.address,
            interface: n.interface,
            tq: n.tq_avg,
        })
    }

    pub fn echo_sum(&self, interface: usize) -> u8 {
        self.own_bcast_sum.get(interface).copied().unwrap_or(0)
    }

    pub(crate) fn neighbor_or_insert(
        &mut self,
        key: NeighborKey,
        windows: Windows,
        now: Duration,
    ) -> &mut NeighborRecord {
        let position = match self.neighbors.iter().position(|n| n.key() == key) {
            Some(position) => position,
            None => {
                tracing::trace!(originator = %self.address, neighbor = %key.address, interface = key.interface, "new neighbor");
                self.neighbors.push(NeighborRecord::new(key, windows, now));
                self.neighbors.len() - 1
            }
        };
        &mut self.neighbors[position]
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Windows {
    pub local: usize,
    pub global: usize,
}

#[derive(Debug)]
pub struct OriginatorTable {
    records: IndexMap<Address, OriginatorRecord>,
    interfaces: usize,
    windows: Windows,
}

impl OriginatorTable {
    pub fn new(interfaces: usize, local_window: usize, global_window: usize) -> Self {
        Self {
            records: IndexMap::new(),
            interfaces,
            windows: Windows {
                local: local_window,
                global: global_window,
            },
        }
    }

    pub fn get_or_create(&mut self, address: Address, now: Duration) -> &mut OriginatorRecord {
        let (interfaces, windows) = (self.interfaces, self.windows);
        self.records.entry(address).or_insert_with(|| {
            tracing::debug!(originator = %address, "creating new originator");
            OriginatorRecord::new(address, interfaces, windows, now)
        })
    }

    pub fn get(&self, address: Address) -> Option<&OriginatorRecord> {
        self.records.get(&address)
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut OriginatorRecord> {
        self.records.get_mut(&address)
    }

    pub fn remove(&mut self, address: Address) -> Option<OriginatorRecord> {
        self.records.shift_remove(&address)
    }

    pub fn route_info(&self, address: Address) -> Option<RouteInfo> {
        self.get(address).and_then(OriginatorRecord::route_info)
    }

    pub fn echo_sum(&self, address: Address, interface: usize) -> u8 {
        self.get(address).map_or(0, |r| r.echo_sum(interface))
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.records.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OriginatorRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn windows(&self) -> Windows {
        self.windows
    }

    /// Slide every originator's echo window on `interface` by one: we are
    /// about to send a new own message there.
    pub fn advance_own_broadcast(&mut self, interface: usize) {
        for record in self.records.values_mut() {
            let (Some(window), Some(sum)) = (
                record.own_bcast.get_mut(interface),
                record.own_bcast_sum.get_mut(interface),
            ) else {
                continue;
            };
            window.observe(1, false);
            *sum = window.popcount() as u8;
        }
    }

    /// `neighbor` rebroadcast our latest own message on `interface`.
    pub fn record_own_echo(&mut self, neighbor: Address, interface: usize, now: Duration) {
        let record = self.get_or_create(neighbor, now);
        let (Some(window), Some(sum)) = (
            record.own_bcast.get_mut(interface),
            record.own_bcast_sum.get_mut(interface),
        ) else {
            tracing::warn!(%neighbor, interface, "echo on unknown interface");
            return;
        };
        window.mark_seen(0);
        *sum = window.popcount() as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut table = OriginatorTable::new(2, 64, 10);
        table.get_or_create(addr(1), Duration::from_secs(1)).total_received = 3;
        let record = table.get_or_create(addr(1), Duration::from_secs(5));
        assert_eq!(record.total_received, 3);
        assert_eq!(record.last_valid, Duration::from_secs(1));
        assert_eq!(record.own_bcast.len(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn neighbor_or_insert_keeps_one_per_key() {
        let mut table = OriginatorTable::new(2, 64, 10);
        let windows = table.windows();
        let record = table.get_or_create(addr(1), Duration::ZERO);
        record
            .neighbor_or_insert(NeighborKey::new(addr(2), 0), windows, Duration::ZERO)
            .push_tq(100);
        record
            .neighbor_or_insert(NeighborKey::new(addr(2), 0), windows, Duration::ZERO)
            .push_tq(200);
        record.neighbor_or_insert(NeighborKey::new(addr(2), 1), windows, Duration::ZERO);
        assert_eq!(record.neighbors.len(), 2);
        let neighbor = record.neighbor(NeighborKey::new(addr(2), 0)).expect("present");
        assert_eq!(neighbor.tq_avg, 150);
    }

    #[test]
    fn router_lookup_is_validated() {
        let mut table = OriginatorTable::new(1, 64, 10);
        let record = table.get_or_create(addr(1), Duration::ZERO);
        record.router = Some(NeighborKey::new(addr(9), 0));
        assert!(record.router_record().is_none());
        assert_eq!(record.router_tq(), 0);
        assert!(table.route_info(addr(1)).is_none());
    }

    #[test]
    fn own_echo_window_slides() {
        let mut table = OriginatorTable::new(1, 4, 10);
        table.record_own_echo(addr(1), 0, Duration::ZERO);
        assert_eq!(table.echo_sum(addr(1), 0), 1);
        for _ in 0..3 {
            table.advance_own_broadcast(0);
        }
        assert_eq!(table.echo_sum(addr(1), 0), 1);
        table.advance_own_broadcast(0);
        assert_eq!(table.echo_sum(addr(1), 0), 0);
    }

    #[test]
    fn echo_on_unknown_interface_is_ignored() {
        let mut table = OriginatorTable::new(1, 64, 10);
        table.record_own_echo(addr(1), 5, Duration::ZERO);
        assert_eq!(table.echo_sum(addr(1), 5), 0);
    }
}
