//! The routing engine.
//!
//! [`Batman`] ties the pieces together for one node: it decodes incoming
//! datagrams, runs every originator message through the acceptance checks,
//! feeds accepted ones to [`routing::Routing`] and the [`forward_queue`], and
//! sends whatever the queue hands back when the clock says it is due.
//!
//! Everything runs synchronously inside [`Batman::receive`] and
//! [`Batman::handle_timer`]; the host only has to deliver datagrams and fire
//! timers in time order.

pub mod bidirect;
pub mod bitwindow;
pub mod forward_queue;
pub mod gateway;
pub mod hna;
pub mod originator;
pub mod ring_average;
pub mod routing;

use crate::error::{ConfigError, ConfigResult, DropReason};
use crate::messages::{encode_batch, Datagram, HnaEntry, Ogm, Packet};
use crate::metrics::{Counted, Statistics};
use crate::ports::{Address, Clock, Interface, NetworkPort, RouteTable, Timer, TimerHandle};
use crate::settings::Settings;
use forward_queue::{Forward, ForwardQueue, RouterSnapshot};
use gateway::DEFAULT_GATEWAY_PORT;
use hna::HnaTask;
use rand::{rngs::StdRng, Rng, SeedableRng};
use routing::{OgmReceipt, Routing};
use std::{net::Ipv4Addr, ops::ControlFlow, time::Duration};


/// Own messages on secondary interfaces only reach direct neighbors.
const SECONDARY_TTL: u8 = 2;

#[derive(Debug, Clone)]
struct InterfaceState {
    interface: Interface,
    /// Sequence number of the next own message.
    seqno: u16,
}

/// Route towards one originator, as shown in routing dumps.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OriginatorSummary {
    pub address: Address,
    pub next_hop: Option<Address>,
    pub interface: Option<usize>,
    pub tq: u8,
    pub hops: u8,
    pub last_seen: Duration,
}

/// Outcome of one originator message: keep going, skip it, or give up on
/// the rest of the datagram.
type Outcome = ControlFlow<DropReason, Option<DropReason>>;

pub struct Batman<C, N, R> {
    settings: Settings,
    clock: C,
    port: N,
    routes: R,
    routing: Routing,
    queue: ForwardQueue,
    interfaces: Vec<InterfaceState>,
    rng: StdRng,
    own_timer: Option<(Duration, TimerHandle)>,
    tick_timer: Option<TimerHandle>,
    statistics: Statistics,
    running: bool,
}

impl<C: Clock, N: NetworkPort, R: RouteTable> Batman<C, N, R> {
    pub fn new(settings: Settings, clock: C, port: N, routes: R) -> ConfigResult<Self> {
        let interfaces = port.interfaces();
        if interfaces.is_empty() {
            return Err(ConfigError::NoInterfaces);
        }
        let now = clock.now();

        let mut batman = Self {
            routing: Routing::new(&settings, interfaces.len(), now),
            queue: ForwardQueue::new(
                settings.aggregation,
                settings.max_aggregation_window,
                settings.hop_penalty,
            ),
            interfaces: interfaces
                .into_iter()
                .map(|interface| InterfaceState { interface, seqno: 1 })
                .collect(),
            rng: StdRng::seed_from_u64(settings.seed),
            own_timer: None,
            tick_timer: None,
            statistics: Statistics::default(),
            running: true,
            settings,
            clock,
            port,
            routes,
        };

        batman.routing.hna_mut().execute_local_tasks();
        for index in 0..batman.interfaces.len() {
            batman.schedule_own(index, now);
        }
        batman.arm_own_timer();
        batman.arm_tick(now);

        tracing::info!(
            interfaces = batman.interfaces.len(),
            primary = %batman.interfaces[0].interface.address,
            routing_class = batman.settings.routing_class,
            gateway_class = %batman.settings.gateway_class,
            "batman engine started"
        );
        Ok(batman)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn port(&self) -> &N {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut N {
        &mut self.port
    }

    pub fn routes(&self) -> &R {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut R {
        &mut self.routes
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn queue(&self) -> &ForwardQueue {
        &self.queue
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Primary address, the one other nodes know us by.
    pub fn address(&self) -> Address {
        self.interfaces[0].interface.address
    }

    pub fn originators(&self) -> impl Iterator<Item = OriginatorSummary> + '_ {
        self.routing.table().iter().map(|record| {
            let router = record.router_record();
            OriginatorSummary {
                address: record.address,
                next_hop: router.map(|n| n.address),
                interface: router.map(|n| n.interface),
                tq: record.router_tq(),
                hops: record.hop_count,
                last_seen: record.last_valid,
            }
        })
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn handle_timer(&mut self, timer: Timer) {
        if !self.running {
            return;
        }
        let now = self.clock.now();
        match timer {
            Timer::OwnPacket => {
                self.own_timer = None;
                self.send_due(now);
            }
            Timer::Tick => {
                self.tick_timer = None;
                self.tick(now);
            }
        }
    }

    /// Process a datagram `source` sent us on `interface`.
    pub fn receive(&mut self, source: Address, interface: usize, bytes: &[u8]) {
        if !self.running {
            return;
        }
        if self.interface_state(interface).is_none() {
            tracing::debug!(%source, interface, "datagram on unknown interface");
            return;
        }
        let now = self.clock.now();
        self.statistics.datagrams_received += 1;

        let datagram = Datagram::from(bytes);
        for packet in datagram.packets {
            self.statistics.packets_processed += 1;
            let verdict = match packet {
                Packet::Incompatible { version } => {
                    tracing::debug!(%source, version, "incompatible protocol version");
                    ControlFlow::Break(DropReason::IncompatibleVersion)
                }
                Packet::Originator(ogm) => self.process(ogm, source, interface, now),
            };
            match verdict {
                ControlFlow::Break(reason) => {
                    self.statistics.record_drop(reason);
                    break;
                }
                ControlFlow::Continue(Some(reason)) => self.statistics.record_drop(reason),
                ControlFlow::Continue(None) => {}
            }
        }
        if let Some(error) = datagram.error {
            tracing::debug!(%source, %error, "malformed originator message");
            self.statistics.record_drop(DropReason::Malformed);
        }

        self.arm_own_timer();
    }

    /// Stop timers, drop everything queued and remove every route this
    /// engine installed.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some((_, handle)) = self.own_timer.take() {
            self.clock.cancel(handle);
        }
        if let Some(handle) = self.tick_timer.take() {
            self.clock.cancel(handle);
        }
        self.queue.clear();

        let mut routes = Counted::new(&mut self.routes, &mut self.statistics);
        self.routing.withdraw_all(&mut routes);
        tracing::info!(address = %self.interfaces[0].interface.address, "batman engine stopped");
    }

    /// Start announcing `network` with the next tick.
    pub fn announce_network(&mut self, network: HnaEntry) {
        self.routing.hna_mut().queue(HnaTask::Announce(network));
    }

    /// Stop announcing `network` with the next tick.
    pub fn withdraw_network(&mut self, network: HnaEntry) {
        self.routing.hna_mut().queue(HnaTask::Withdraw(network));
    }

    /// Traffic through `gateway` failed; avoid it for a while.
    pub fn report_gateway_failure(&mut self, gateway: Address) {
        let now = self.clock.now();
        let before = self.routing.gateways().current();
        let mut routes = Counted::new(&mut self.routes, &mut self.statistics);
        self.routing.report_gateway_failure(&mut routes, gateway, now);
        self.note_gateway(before);
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    fn interface_state(&self, index: usize) -> Option<&InterfaceState> {
        self.interfaces.iter().find(|s| s.interface.index == index)
    }

    fn is_my_address(&self, address: Address) -> bool {
        self.interfaces
            .iter()
            .any(|s| s.interface.address == address)
    }

    fn is_broadcast(&self, address: Address) -> bool {
        address == Ipv4Addr::BROADCAST
            || self
                .interfaces
                .iter()
                .any(|s| s.interface.broadcast == address)
    }

    fn process(&mut self, mut ogm: Ogm, sender: Address, interface: usize, now: Duration) -> Outcome {
        tracing::trace!(
            %sender,
            originator = %ogm.originator,
            seqno = ogm.seqno,
            tq = ogm.tq,
            ttl = ogm.ttl,
            direct_link = ogm.is_direct_link(),
            "received originator message"
        );

        if self.is_my_address(sender) {
            return ControlFlow::Break(DropReason::OwnAddress);
        }
        if self.is_broadcast(sender) {
            return ControlFlow::Break(DropReason::BroadcastSender);
        }
        if self.is_my_address(ogm.originator) {
            self.count_echo(&ogm, sender, interface, now);
            return ControlFlow::Continue(Some(DropReason::OwnEcho));
        }
        if ogm.ttl == 0 {
            return ControlFlow::Continue(Some(DropReason::TtlExceeded));
        }
        if ogm.tq == 0 {
            self.routing.count_real_packets(&ogm, sender, interface, now);
            return ControlFlow::Continue(Some(DropReason::ZeroQuality));
        }
        if self.is_my_address(ogm.prev_sender) {
            return ControlFlow::Continue(Some(DropReason::PrevSenderIsSelf));
        }

        let is_duplicate = self
            .routing
            .count_real_packets(&ogm, sender, interface, now);
        let originator = ogm.originator;
        let table = self.routing.table_mut();
        table.get_or_create(originator, now);
        let link_has_route = table.get_or_create(sender, now).router.is_some();
        if originator != sender && !link_has_route {
            tracing::debug!(%sender, %originator, "sender is not a known neighbor");
            return ControlFlow::Continue(Some(DropReason::UnknownNeighbor));
        }

        let (last_real_seqno, last_ttl) = match table.get_mut(originator) {
            Some(record) => {
                record.total_received += 1;
                (record.last_real_seqno, record.last_ttl)
            }
            None => return ControlFlow::Continue(None),
        };

        let link = self
            .routing
            .evaluate_bidirectional(originator, sender, ogm.tq, interface, now);
        ogm.tq = link.tq;

        let best_copy = last_real_seqno == ogm.seqno && last_ttl.saturating_sub(3) <= ogm.ttl;
        if link.bidirectional && (!is_duplicate || best_copy) {
            let before = self.routing.gateways().current();
            let receipt = OgmReceipt {
                ogm: &ogm,
                sender,
                interface,
                is_duplicate,
            };
            let mut routes = Counted::new(&mut self.routes, &mut self.statistics);
            self.routing.update_from_packet(&mut routes, &receipt, now);
            self.note_gateway(before);
        }

        if originator == sender {
            self.forward(ogm, sender, true, interface, now);
            return ControlFlow::Continue(None);
        }
        if !link.bidirectional {
            tracing::trace!(%sender, %originator, tq = link.tq, "link not bidirectional");
            return ControlFlow::Continue(Some(DropReason::NotBidirectional));
        }
        if is_duplicate {
            return ControlFlow::Continue(Some(DropReason::Duplicate));
        }
        self.forward(ogm, sender, false, interface, now);
        ControlFlow::Continue(None)
    }

    /// A direct neighbor rebroadcast the own message we sent on this
    /// interface most recently.
    fn count_echo(&mut self, ogm: &Ogm, sender: Address, interface: usize, now: Duration) {
        let Some(state) = self.interface_state(interface) else {
            return;
        };
        if ogm.is_direct_link()
            && ogm.originator == state.interface.address
            && ogm.seqno == state.seqno.wrapping_sub(2)
        {
            tracing::trace!(neighbor = %sender, interface, seqno = ogm.seqno, "own message echoed");
            self.routing
                .table_mut()
                .record_own_echo(sender, interface, now);
        }
    }

    fn router_snapshot(&self, originator: Address) -> Option<RouterSnapshot> {
        let router = self.routing.table().get(originator)?.router_record()?;
        Some(RouterSnapshot {
            address: router.address,
            tq_avg: router.tq_avg,
            last_ttl: router.last_ttl,
            hop_count: router.hop_count,
        })
    }

    fn forward(&mut self, ogm: Ogm, sender: Address, direct_link: bool, interface: usize, now: Duration) {
        let router = self.router_snapshot(ogm.originator);
        let jitter = self.random_delay(self.settings.jitter / 2);
        let forward = Forward {
            ogm,
            sender,
            direct_link,
            interface,
            router,
        };
        if self.queue.schedule_forward(forward, now, jitter) {
            self.statistics.packets_forwarded += 1;
        }
    }

    // ========================================================================
    // Send path
    // ========================================================================

    fn random_delay(&mut self, max: Duration) -> Duration {
        let max = max.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.gen_range(0..=max))
    }

    /// Queue the next own message of the interface at position `index`.
    fn schedule_own(&mut self, index: usize, now: Duration) {
        let jitter = self.random_delay(self.settings.jitter);
        let send_time = now + self.settings.originator_interval + jitter;
        let local = self.routing.hna().local().to_vec();
        let gateway_class = self.settings.gateway_class;
        let ttl = self.settings.ttl;

        let Some(state) = self.interfaces.get_mut(index) else {
            return;
        };
        let primary = state.interface.index == 0;
        let mut ogm = Ogm::new(
            state.interface.address,
            state.seqno,
            if primary { ttl } else { SECONDARY_TTL },
        );
        ogm.gateway_port = DEFAULT_GATEWAY_PORT;
        if primary {
            ogm.gateway_flags = gateway_class.0;
            ogm.hna = local;
        }
        state.seqno = state.seqno.wrapping_add(1);
        let interface = state.interface.index;

        self.queue.schedule_own(ogm, interface, send_time);
        self.routing.table_mut().advance_own_broadcast(interface);
    }

    fn send_due(&mut self, now: Duration) {
        let interfaces: Vec<Interface> = self
            .interfaces
            .iter()
            .map(|s| s.interface.clone())
            .collect();
        let drained = self.queue.drain(now, &interfaces);

        for transmission in drained.transmissions {
            let Some(interface) = interfaces
                .iter()
                .find(|i| i.index == transmission.interface)
            else {
                continue;
            };
            tracing::trace!(
                interface = %interface.name,
                destination = %transmission.destination,
                payloads = transmission.payloads.len(),
                "sending datagram"
            );
            let bytes = encode_batch(&transmission.payloads);
            self.port.send(interface, transmission.destination, bytes);
            self.statistics.datagrams_sent += 1;
        }

        for interface in drained.own_interfaces {
            if let Some(position) = self
                .interfaces
                .iter()
                .position(|s| s.interface.index == interface)
            {
                self.schedule_own(position, now);
            }
        }
        self.arm_own_timer();
    }

    /// Point the own-packet timer at the earliest queued bundle.
    fn arm_own_timer(&mut self) {
        let next = self.queue.next_send_time();
        if self.own_timer.map(|(at, _)| at) == next {
            return;
        }
        if let Some((_, handle)) = self.own_timer.take() {
            self.clock.cancel(handle);
        }
        if let Some(at) = next {
            let handle = self.clock.schedule_at(at, Timer::OwnPacket);
            self.own_timer = Some((at, handle));
        }
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    fn arm_tick(&mut self, now: Duration) {
        let at = now + self.settings.tick_interval;
        self.tick_timer = Some(self.clock.schedule_at(at, Timer::Tick));
    }

    fn tick(&mut self, now: Duration) {
        self.refresh_interfaces();

        let before = self.routing.gateways().current();
        let mut routes = Counted::new(&mut self.routes, &mut self.statistics);
        self.routing.purge(&mut routes, now);
        if self.routing.gateways().current().is_none() {
            self.routing.elect_gateway(&mut routes, now);
        }
        self.note_gateway(before);

        self.routing.hna_mut().execute_local_tasks();
        self.arm_tick(now);
    }

    fn refresh_interfaces(&mut self) {
        for interface in self.port.interfaces() {
            let Some(state) = self
                .interfaces
                .iter_mut()
                .find(|s| s.interface.index == interface.index)
            else {
                tracing::debug!(interface = %interface.name, "ignoring interface added after start");
                continue;
            };
            if state.interface.active != interface.active {
                tracing::info!(interface = %interface.name, active = interface.active, "interface state changed");
            }
            state.interface = interface;
        }
    }

    fn note_gateway(&mut self, before: Option<Address>) {
        let after = self.routing.gateways().current();
        if after != before && after.is_some() {
            self.statistics.gateway_elections += 1;
        }
    }
}
