//! Virtual time and the host collaborators each simulated engine runs on.

use batman_lib::{Address, Clock, Interface, NetworkPort, RouteTable, Timer, TimerHandle};
use std::{
    cell::RefCell,
    cmp::{Ordering, Reverse},
    collections::{BTreeMap, BinaryHeap, HashSet},
    rc::Rc,
    time::Duration,
};

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Timer { handle: TimerHandle, timer: Timer },
    /// Datagram arriving over link `link` of node `from`.
    Deliver {
        from: NodeId,
        link: usize,
        bytes: Vec<u8>,
    },
}

#[derive(Debug)]
pub struct Event {
    pub at: Duration,
    seq: u64,
    pub node: NodeId,
    pub kind: EventKind,
}

// Events at the same instant run in insertion order.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

/// Pending events of the whole simulation, ordered by (time, insertion).
#[derive(Debug, Default)]
pub struct Scheduler {
    now: Duration,
    next_seq: u64,
    heap: BinaryHeap<Reverse<Event>>,
    pending: HashSet<TimerHandle>,
    cancelled: HashSet<TimerHandle>,
}

pub type SharedScheduler = Rc<RefCell<Scheduler>>;

impl Scheduler {
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn push(&mut self, at: Duration, node: NodeId, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Event {
            at: at.max(self.now),
            seq,
            node,
            kind,
        }));
    }

    pub fn schedule_timer(&mut self, at: Duration, node: NodeId, timer: Timer) -> TimerHandle {
        let handle = TimerHandle(self.next_seq);
        self.push(at, node, EventKind::Timer { handle, timer });
        self.pending.insert(handle);
        handle
    }

    /// Cancelling a timer that already fired or was already cancelled is a
    /// no-op.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if self.pending.remove(&handle) {
            self.cancelled.insert(handle);
        }
    }

    /// Next live event due no later than `until`, advancing the clock to it.
    pub fn pop(&mut self, until: Duration) -> Option<Event> {
        loop {
            if self.heap.peek()?.0.at > until {
                return None;
            }
            let Reverse(event) = self.heap.pop()?;
            if let EventKind::Timer { handle, .. } = &event.kind {
                if self.cancelled.remove(handle) {
                    continue;
                }
                self.pending.remove(handle);
            }
            self.now = self.now.max(event.at);
            return Some(event);
        }
    }

    pub fn advance_to(&mut self, at: Duration) {
        self.now = self.now.max(at);
    }
}

/// One node's view of the shared virtual clock.
#[derive(Debug, Clone)]
pub struct SimClock {
    node: NodeId,
    scheduler: SharedScheduler,
}

impl SimClock {
    pub fn new(node: NodeId, scheduler: SharedScheduler) -> Self {
        Self { node, scheduler }
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.scheduler.borrow().now()
    }

    fn schedule_at(&mut self, at: Duration, timer: Timer) -> TimerHandle {
        self.scheduler
            .borrow_mut()
            .schedule_timer(at, self.node, timer)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.scheduler.borrow_mut().cancel(handle);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub interface: usize,
    pub destination: Address,
    pub broadcast: bool,
    pub bytes: Vec<u8>,
}

/// Collects what the engine sends until the simulator puts it on the links.
#[derive(Debug, Default)]
pub struct SimPort {
    interfaces: Vec<Interface>,
    outbox: Vec<Outgoing>,
}

impl SimPort {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self {
            interfaces,
            outbox: Vec::new(),
        }
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }
}

impl NetworkPort for SimPort {
    fn interfaces(&self) -> Vec<Interface> {
        self.interfaces.clone()
    }

    fn send(&mut self, interface: &Interface, destination: Address, bytes: Vec<u8>) {
        self.outbox.push(Outgoing {
            interface: interface.index,
            destination,
            broadcast: destination == interface.broadcast || destination.is_broadcast(),
            bytes,
        });
    }
}

/// In-memory routing table keyed by destination and prefix length.
#[derive(Debug, Default)]
pub struct SimRouteTable {
    routes: BTreeMap<(Address, u8), (Address, usize)>,
}

impl SimRouteTable {
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn next_hop(&self, destination: Address, prefix_len: u8) -> Option<Address> {
        self.routes
            .get(&(destination, prefix_len))
            .map(|(next_hop, _)| *next_hop)
    }
}

impl RouteTable for SimRouteTable {
    fn install_route(&mut self, destination: Address, prefix_len: u8, next_hop: Address, interface: usize) {
        tracing::trace!(%destination, prefix_len, %next_hop, interface, "install route");
        self.routes
            .insert((destination, prefix_len), (next_hop, interface));
    }

    fn withdraw_route(&mut self, destination: Address, prefix_len: u8, next_hop: Address, interface: usize) {
        let key = (destination, prefix_len);
        if self.routes.get(&key) == Some(&(next_hop, interface)) {
            tracing::trace!(%destination, prefix_len, %next_hop, interface, "withdraw route");
            self.routes.remove(&key);
        } else {
            tracing::warn!(%destination, prefix_len, %next_hop, "withdrawing a route that is not installed");
        }
    }

    fn current_next_hop(&self, destination: Address) -> Option<Address> {
        self.next_hop(destination, 32)
    }
}
