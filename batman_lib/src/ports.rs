//! Capabilities the engine needs from its host: time and timers, datagram
//! transport and the routing table it programs.

use std::{net::Ipv4Addr, time::Duration};

/// Node identifier used on the wire and in routes.
pub type Address = Ipv4Addr;

/// A local network attachment point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Stable position in the port's interface list. Index 0 is the primary
    /// interface.
    pub index: usize,
    pub name: String,
    pub address: Address,
    pub broadcast: Address,
    pub active: bool,
    /// Rebroadcasting out of the interface a message came in on costs an
    /// extra hop penalty on wireless media.
    pub wireless: bool,
}

impl Interface {
    pub fn new(index: usize, name: impl Into<String>, address: Address, broadcast: Address) -> Self {
        Self {
            index,
            name: name.into(),
            address,
            broadcast,
            active: true,
            wireless: true,
        }
    }
}

/// Timer tokens the engine hands to the clock and gets back when they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Earliest queued bundle is due. The queue always holds our next own
    /// message, so this is also what keeps own messages flowing.
    OwnPacket,
    /// Periodic housekeeping: purge, gateway election, local HNA tasks.
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

pub trait Clock {
    /// Time elapsed since the engine's epoch.
    fn now(&self) -> Duration;

    /// Fire `timer` no earlier than `at`.
    fn schedule_at(&mut self, at: Duration, timer: Timer) -> TimerHandle;

    fn cancel(&mut self, handle: TimerHandle);
}

pub trait NetworkPort {
    fn interfaces(&self) -> Vec<Interface>;

    /// Fire and forget.
    fn send(&mut self, interface: &Interface, destination: Address, bytes: Vec<u8>);
}

pub trait RouteTable {
    /// Installing a route to a destination and prefix that already has one
    /// replaces it.
    fn install_route(&mut self, destination: Address, prefix_len: u8, next_hop: Address, interface: usize);

    fn withdraw_route(&mut self, destination: Address, prefix_len: u8, next_hop: Address, interface: usize);

    /// Next hop of the installed host route for `destination`, if any.
    fn current_next_hop(&self, destination: Address) -> Option<Address>;
}
