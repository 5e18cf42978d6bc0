// Per-engine counters. Every engine owns its own set so simulated nodes
// never share state.

use crate::error::DropReason;
use crate::ports::{Address, RouteTable};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub datagrams_received: u64,
    /// Originator messages pulled out of received datagrams.
    pub packets_processed: u64,
    pub packets_forwarded: u64,
    pub drops: BTreeMap<DropReason, u64>,
    pub datagrams_sent: u64,
    pub routes_installed: u64,
    pub routes_withdrawn: u64,
    pub gateway_elections: u64,
}

impl Statistics {
    pub fn record_drop(&mut self, reason: DropReason) {
        *self.drops.entry(reason).or_default() += 1;
    }

    pub fn drops_for(&self, reason: DropReason) -> u64 {
        self.drops.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_drops(&self) -> u64 {
        self.drops.values().sum()
    }
}

/// Route table adapter that counts what passes through it.
pub(crate) struct Counted<'a, R> {
    inner: &'a mut R,
    statistics: &'a mut Statistics,
}

impl<'a, R: RouteTable> Counted<'a, R> {
    pub(crate) fn new(inner: &'a mut R, statistics: &'a mut Statistics) -> Self {
        Self { inner, statistics }
    }
}

impl<R: RouteTable> RouteTable for Counted<'_, R> {
    fn install_route(&mut self, destination: Address, prefix_len: u8, next_hop: Address, interface: usize) {
        self.statistics.routes_installed += 1;
        self.inner
            .install_route(destination, prefix_len, next_hop, interface);
    }

    fn withdraw_route(&mut self, destination: Address, prefix_len: u8, next_hop: Address, interface: usize) {
        self.statistics.routes_withdrawn += 1;
        self.inner
            .withdraw_route(destination, prefix_len, next_hop, interface);
    }

    fn current_next_hop(&self, destination: Address) -> Option<Address> {
        self.inner.current_next_hop(destination)
    }
}
