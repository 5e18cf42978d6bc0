//! Test helpers for engine testing
//!
//! In-memory collaborators that record every call, plus factories for
//! parameters and originator messages with sensible test defaults.

use crate::args::BatmanParameters;
use crate::builder::BatmanBuilder;
use crate::control::Batman;
use crate::messages::Ogm;
use crate::ports::{Address, Clock, Interface, NetworkPort, RouteTable, Timer, TimerHandle};
use crate::settings::Settings;
use std::{collections::HashMap, net::Ipv4Addr, time::Duration};

/// Clock whose time only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Duration,
    next_handle: u64,
    pending: Vec<(TimerHandle, Duration, Timer)>,
}

impl ManualClock {
    pub fn new(now: Duration) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    pub fn set_now(&mut self, now: Duration) {
        self.now = now;
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Timers still armed, in the order they were scheduled.
    pub fn pending(&self) -> &[(TimerHandle, Duration, Timer)] {
        &self.pending
    }

    pub fn is_armed(&self, timer: Timer) -> bool {
        self.pending.iter().any(|(_, _, t)| *t == timer)
    }

    /// Earliest armed timer, if any.
    pub fn next_due(&self) -> Option<Duration> {
        self.pending.iter().map(|(_, at, _)| *at).min()
    }

    /// Remove and return the earliest timer due at or before `until`.
    pub fn pop_due(&mut self, until: Duration) -> Option<(Duration, Timer)> {
        let (position, _) = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, (_, at, _))| *at <= until)
            .min_by_key(|(i, (_, at, _))| (*at, *i))?;
        let (_, at, timer) = self.pending.remove(position);
        Some((at, timer))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule_at(&mut self, at: Duration, timer: Timer) -> TimerHandle {
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        self.pending.push((handle, at, timer));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.retain(|(h, _, _)| *h != handle);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub interface: usize,
    pub destination: Address,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RecordingPort {
    pub interfaces: Vec<Interface>,
    pub sent: Vec<SentDatagram>,
}

impl RecordingPort {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self {
            interfaces,
            sent: Vec::new(),
        }
    }

    /// One wireless interface `eth0` with address `10.0.0.<last>`.
    pub fn single(last: u8) -> Self {
        Self::new(vec![mk_interface(0, last)])
    }

    pub fn take_sent(&mut self) -> Vec<SentDatagram> {
        std::mem::take(&mut self.sent)
    }
}

impl NetworkPort for RecordingPort {
    fn interfaces(&self) -> Vec<Interface> {
        self.interfaces.clone()
    }

    fn send(&mut self, interface: &Interface, destination: Address, bytes: Vec<u8>) {
        self.sent.push(SentDatagram {
            interface: interface.index,
            destination,
            bytes,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteCall {
    Install {
        destination: Address,
        prefix_len: u8,
        next_hop: Address,
        interface: usize,
    },
    Withdraw {
        destination: Address,
        prefix_len: u8,
        next_hop: Address,
        interface: usize,
    },
}

impl RouteCall {
    pub fn destination(&self) -> (Address, u8) {
        match *self {
            RouteCall::Install {
                destination,
                prefix_len,
                ..
            }
            | RouteCall::Withdraw {
                destination,
                prefix_len,
                ..
            } => (destination, prefix_len),
        }
    }
}

/// Routing table that keeps what is installed and a log of every call.
#[derive(Debug, Default)]
pub struct RecordingRouteTable {
    pub installed: HashMap<(Address, u8), (Address, usize)>,
    pub calls: Vec<RouteCall>,
}

impl RecordingRouteTable {
    pub fn next_hop(&self, destination: Address, prefix_len: u8) -> Option<Address> {
        self.installed
            .get(&(destination, prefix_len))
            .map(|(next_hop, _)| *next_hop)
    }

    pub fn calls_for(&self, destination: Address, prefix_len: u8) -> Vec<RouteCall> {
        self.calls
            .iter()
            .filter(|c| c.destination() == (destination, prefix_len))
            .copied()
            .collect()
    }

    pub fn default_route(&self) -> Option<Address> {
        self.next_hop(Ipv4Addr::UNSPECIFIED, 0)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl RouteTable for RecordingRouteTable {
    fn install_route(&mut self, destination: Address, prefix_len: u8, next_hop: Address, interface: usize) {
        self.installed
            .insert((destination, prefix_len), (next_hop, interface));
        self.calls.push(RouteCall::Install {
            destination,
            prefix_len,
            next_hop,
            interface,
        });
    }

    fn withdraw_route(&mut self, destination: Address, prefix_len: u8, next_hop: Address, interface: usize) {
        self.installed.remove(&(destination, prefix_len));
        self.calls.push(RouteCall::Withdraw {
            destination,
            prefix_len,
            next_hop,
            interface,
        });
    }

    fn current_next_hop(&self, destination: Address) -> Option<Address> {
        self.next_hop(destination, 32)
    }
}

pub fn addr(last: u8) -> Address {
    Ipv4Addr::new(10, 0, 0, last)
}

pub fn mk_interface(index: usize, last: u8) -> Interface {
    Interface::new(
        index,
        format!("eth{index}"),
        Ipv4Addr::new(10, index as u8, 0, last),
        Ipv4Addr::new(10, index as u8, 255, 255),
    )
}

/// Parameters for fast, deterministic tests:
/// - no jitter, no aggregation
/// - 1 s originator interval and tick, 10 s purge timeout
pub fn mk_test_params() -> BatmanParameters {
    BatmanParameters {
        originator_interval: 1000,
        purge_timeout: 10_000,
        debug_interval: 1000,
        aggregation: false,
        jitter: 0,
        ..Default::default()
    }
}

pub fn mk_test_settings() -> Settings {
    Settings::try_from(&mk_test_params()).expect("test parameters are valid")
}

/// An originator message as a direct neighbor would send it.
pub fn mk_ogm(originator: Address, seqno: u16, tq: u8, ttl: u8) -> Ogm {
    let mut ogm = Ogm::new(originator, seqno, ttl);
    ogm.tq = tq;
    ogm
}

pub type TestBatman = Batman<ManualClock, RecordingPort, RecordingRouteTable>;

/// Engine with one interface whose address is `10.0.0.<last>`.
pub fn mk_test_batman(params: BatmanParameters, last: u8) -> TestBatman {
    BatmanBuilder::from_params(params)
        .build(
            ManualClock::new(Duration::ZERO),
            RecordingPort::single(last),
            RecordingRouteTable::default(),
        )
        .expect("test parameters are valid")
}

/// Fire every timer due up to `until`, in time order, then leave the clock
/// at `until`.
pub fn run_until(batman: &mut TestBatman, until: Duration) {
    while let Some((at, timer)) = batman.clock_mut().pop_due(until) {
        let now = batman.clock().now().max(at);
        batman.clock_mut().set_now(now);
        batman.handle_timer(timer);
    }
    let now = batman.clock().now().max(until);
    batman.clock_mut().set_now(now);
}

/// Engines wired together over lossless zero-latency links.
///
/// Node `i` has the single address `10.0.0.<i + 1>`. Datagrams are handed
/// to every linked node the moment they are sent.
pub struct Mesh {
    pub nodes: Vec<TestBatman>,
    links: Vec<(usize, usize)>,
    now: Duration,
}

impl Mesh {
    pub fn new(params: BatmanParameters, count: usize) -> Self {
        Self::with_params(vec![params; count])
    }

    pub fn with_params(params: Vec<BatmanParameters>) -> Self {
        let nodes = params
            .into_iter()
            .enumerate()
            .map(|(i, params)| mk_test_batman(params, i as u8 + 1))
            .collect();
        Self {
            nodes,
            links: Vec::new(),
            now: Duration::ZERO,
        }
    }

    /// Address of node `i`.
    pub fn address(&self, i: usize) -> Address {
        self.nodes[i].address()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Connect `a` and `b` in both directions.
    pub fn link(&mut self, a: usize, b: usize) {
        for pair in [(a, b), (b, a)] {
            if !self.links.contains(&pair) {
                self.links.push(pair);
            }
        }
    }

    pub fn unlink(&mut self, a: usize, b: usize) {
        self.links.retain(|&pair| pair != (a, b) && pair != (b, a));
    }

    /// Connect node `i` to `i + 1` for every node.
    pub fn line(mut self) -> Self {
        for i in 1..self.nodes.len() {
            self.link(i - 1, i);
        }
        self
    }

    /// Fire timers across all nodes in time order until `until`,
    /// delivering every datagram sent on the way.
    pub fn run_until(&mut self, until: Duration) {
        loop {
            let next = self
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, node)| node.clock().next_due().map(|at| (at, i)))
                .filter(|(at, _)| *at <= until)
                .min();
            let Some((at, i)) = next else {
                break;
            };
            self.now = self.now.max(at);
            let node = &mut self.nodes[i];
            node.clock_mut().set_now(self.now);
            if let Some((_, timer)) = node.clock_mut().pop_due(self.now) {
                node.handle_timer(timer);
            }
            self.deliver(i);
        }
        self.now = self.now.max(until);
        for node in &mut self.nodes {
            node.clock_mut().set_now(self.now);
        }
    }

    fn deliver(&mut self, from: usize) {
        let source = self.address(from);
        let sent = self.nodes[from].port_mut().take_sent();
        let targets: Vec<usize> = self
            .links
            .iter()
            .filter(|(a, _)| *a == from)
            .map(|(_, b)| *b)
            .collect();
        for datagram in sent {
            for &to in &targets {
                let node = &mut self.nodes[to];
                node.clock_mut().set_now(self.now);
                node.receive(source, 0, &datagram.bytes);
            }
        }
    }
}
