//! Outgoing message queue.
//!
//! Bundles are kept sorted by send time. A forwarded message either joins a
//! bundle that leaves a little earlier (aggregation) or gets a bundle of its
//! own. Draining hands back what each interface has to transmit.

use crate::messages::{Ogm, TQ_MAX_VALUE};
use crate::ports::{Address, Interface};
use std::time::Duration;

/// Aggregated datagrams never grow beyond this many bytes.
pub const MAX_AGGREGATION_BYTES: usize = 512;
/// One direct-link bit per payload.
pub const MAX_AGGREGATION_PACKETS: usize = u32::BITS as usize;

/// What we know about the best router towards a message's originator at the
/// time we forward it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSnapshot {
    pub address: Address,
    pub tq_avg: u8,
    pub last_ttl: u8,
    pub hop_count: u8,
}

/// A received message to rebroadcast.
#[derive(Debug, Clone)]
pub struct Forward {
    pub ogm: Ogm,
    pub sender: Address,
    pub direct_link: bool,
    pub interface: usize,
    pub router: Option<RouterSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub send_time: Duration,
    /// Interface the first payload came in on, or the one an own message
    /// belongs to.
    pub interface: usize,
    pub own: bool,
    /// Bit `n` set when payload `n` is a direct-link rebroadcast.
    pub direct_link_flags: u32,
    pub payloads: Vec<Ogm>,
}

impl Bundle {
    pub fn wire_len(&self) -> usize {
        self.payloads.iter().map(Ogm::wire_len).sum()
    }

    /// Whether a forward with the given properties may ride along.
    fn accepts(&self, direct_link: bool, incoming_ttl: u8, interface: usize) -> bool {
        let Some(base) = self.payloads.first() else {
            return false;
        };
        let flooded = !direct_link
            && !base.is_direct_link()
            && base.ttl != 1
            && (!self.own || self.interface == 0);
        let same_link = direct_link && incoming_ttl == 2 && self.interface == interface;
        flooded || same_link
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub interface: usize,
    pub destination: Address,
    pub send_time: Duration,
    pub payloads: Vec<Ogm>,
}

#[derive(Debug, Default)]
pub struct Drained {
    pub transmissions: Vec<Transmission>,
    /// Interfaces whose own message just went out and needs a successor.
    pub own_interfaces: Vec<usize>,
}

fn penalize(tq: u8, penalty: u8) -> u8 {
    let max = u32::from(TQ_MAX_VALUE);
    (u32::from(tq) * (max - u32::from(penalty)) / max) as u8
}

#[derive(Debug)]
pub struct ForwardQueue {
    bundles: Vec<Bundle>,
    aggregation: bool,
    max_aggregation_window: Duration,
    hop_penalty: u8,
}

impl ForwardQueue {
    pub fn new(aggregation: bool, max_aggregation_window: Duration, hop_penalty: u8) -> Self {
        Self {
            bundles: Vec::new(),
            aggregation,
            max_aggregation_window,
            hop_penalty,
        }
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bundle> {
        self.bundles.iter()
    }

    pub fn next_send_time(&self) -> Option<Duration> {
        self.bundles.first().map(|b| b.send_time)
    }

    pub fn clear(&mut self) {
        self.bundles.clear();
    }

    fn insert(&mut self, bundle: Bundle) {
        let position = self
            .bundles
            .partition_point(|b| b.send_time <= bundle.send_time);
        self.bundles.insert(position, bundle);
    }

    pub fn schedule_own(&mut self, ogm: Ogm, interface: usize, send_time: Duration) {
        tracing::trace!(interface, seqno = ogm.seqno, ?send_time, "scheduling own message");
        self.insert(Bundle {
            send_time,
            interface,
            own: true,
            direct_link_flags: 0,
            payloads: vec![ogm],
        });
    }

    /// Queue a rebroadcast. Returns false when the message has no hops left.
    pub fn schedule_forward(&mut self, forward: Forward, now: Duration, jitter: Duration) -> bool {
        let Forward {
            mut ogm,
            sender,
            direct_link,
            interface,
            router,
        } = forward;
        if ogm.ttl <= 1 {
            tracing::trace!(originator = %ogm.originator, "ttl exceeded, not forwarding");
            return false;
        }

        let window = if self.aggregation {
            self.max_aggregation_window
        } else {
            Duration::ZERO
        };
        let send_time = now + window + jitter;
        let incoming_ttl = ogm.ttl;

        ogm.ttl -= 1;
        ogm.hops = ogm.hops.saturating_add(1);
        ogm.prev_sender = sender;
        // Rebroadcast what our best router reported so the best path spreads.
        if let Some(router) = router.filter(|r| r.tq_avg != 0) {
            if router.address != sender {
                ogm.tq = router.tq_avg;
                ogm.ttl = router.last_ttl.saturating_sub(1);
                ogm.hops = router.hop_count.saturating_add(1);
            }
        }
        ogm.tq = penalize(ogm.tq, self.hop_penalty);
        ogm.set_direct_link(direct_link);

        let size = ogm.wire_len();
        let candidate = self.aggregation.then(|| {
            self.bundles.iter().position(|b| {
                b.send_time > now
                    && b.send_time < send_time
                    && b.payloads.len() < MAX_AGGREGATION_PACKETS
                    && b.wire_len() + size <= MAX_AGGREGATION_BYTES
                    && b.accepts(direct_link, incoming_ttl, interface)
            })
        });

        match candidate.flatten() {
            Some(position) => {
                let bundle = &mut self.bundles[position];
                if direct_link {
                    bundle.direct_link_flags |= 1 << bundle.payloads.len();
                }
                tracing::trace!(originator = %ogm.originator, payloads = bundle.payloads.len() + 1, "aggregating forward");
                bundle.payloads.push(ogm);
            }
            None => {
                self.insert(Bundle {
                    send_time,
                    interface,
                    own: false,
                    direct_link_flags: u32::from(direct_link),
                    payloads: vec![ogm],
                });
            }
        }
        true
    }

    /// Pop every bundle due at `now`, in send time order.
    pub fn drain(&mut self, now: Duration, interfaces: &[Interface]) -> Drained {
        let mut drained = Drained::default();
        let due = self.bundles.partition_point(|b| b.send_time <= now);

        for bundle in self.bundles.drain(..due) {
            let Some(incoming) = interfaces.iter().find(|i| i.index == bundle.interface) else {
                tracing::warn!(interface = bundle.interface, "cannot send bundle, interface unknown");
                continue;
            };
            if bundle.own {
                drained.own_interfaces.push(bundle.interface);
            }
            let Some(base) = bundle.payloads.first() else {
                continue;
            };

            // Direct-link replies and own messages of secondary interfaces
            // stay on their interface.
            if (base.is_direct_link() && base.ttl == 1) || (bundle.own && bundle.interface > 0) {
                if incoming.active {
                    drained.transmissions.push(Transmission {
                        interface: incoming.index,
                        destination: incoming.broadcast,
                        send_time: bundle.send_time,
                        payloads: bundle.payloads,
                    });
                }
                continue;
            }

            for interface in interfaces.iter().filter(|i| i.active) {
                let on_incoming = interface.index == bundle.interface;
                let payloads = bundle
                    .payloads
                    .iter()
                    .enumerate()
                    .map(|(n, ogm)| {
                        let mut ogm = ogm.clone();
                        ogm.set_direct_link(on_incoming && bundle.direct_link_flags & (1 << n) != 0);
                        if interface.wireless && on_incoming && !bundle.own {
                            ogm.tq = penalize(ogm.tq, self.hop_penalty.saturating_mul(2));
                        }
                        ogm
                    })
                    .collect();
                drained.transmissions.push(Transmission {
                    interface: interface.index,
                    destination: interface.broadcast,
                    send_time: bundle.send_time,
                    payloads,
                });
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn iface(index: usize) -> Interface {
        Interface::new(
            index,
            format!("eth{index}"),
            Ipv4Addr::new(10, index as u8, 0, 1),
            Ipv4Addr::new(10, index as u8, 255, 255),
        )
    }

    fn forward(originator: u8, ttl: u8, direct_link: bool) -> Forward {
        let mut ogm = Ogm::new(addr(originator), 1, ttl);
        ogm.tq = 200;
        Forward {
            ogm,
            sender: addr(originator),
            direct_link,
            interface: 0,
            router: None,
        }
    }

    #[test]
    fn forwards_close_together_share_a_bundle() {
        let mut queue = ForwardQueue::new(true, Duration::from_millis(50), 10);
        assert!(queue.schedule_forward(forward(1, 10, false), Duration::ZERO, Duration::ZERO));
        assert!(queue.schedule_forward(forward(2, 10, false), Duration::from_millis(10), Duration::ZERO));

        assert_eq!(queue.len(), 1);
        let bundle = queue.iter().next().expect("bundle");
        assert_eq!(bundle.payloads.len(), 2);
        assert_eq!(bundle.send_time, Duration::from_millis(50));

        let drained = queue.drain(Duration::from_millis(50), &[iface(0)]);
        assert_eq!(drained.transmissions.len(), 1);
        assert_eq!(drained.transmissions[0].payloads.len(), 2);
    }

    #[test]
    fn no_aggregation_when_disabled() {
        let mut queue = ForwardQueue::new(false, Duration::from_millis(50), 10);
        queue.schedule_forward(forward(1, 10, false), Duration::ZERO, Duration::ZERO);
        queue.schedule_forward(forward(2, 10, false), Duration::from_millis(10), Duration::ZERO);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn direct_link_forward_does_not_join_flooded_bundle() {
        let mut queue = ForwardQueue::new(true, Duration::from_millis(50), 10);
        queue.schedule_forward(forward(1, 10, false), Duration::ZERO, Duration::ZERO);
        queue.schedule_forward(forward(2, 10, true), Duration::from_millis(10), Duration::ZERO);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn direct_link_reply_on_same_interface_aggregates() {
        let mut queue = ForwardQueue::new(true, Duration::from_millis(50), 10);
        queue.schedule_forward(forward(1, 2, true), Duration::ZERO, Duration::ZERO);
        queue.schedule_forward(forward(2, 2, true), Duration::from_millis(10), Duration::ZERO);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().map(|b| b.direct_link_flags), Some(0b11));
    }

    #[test]
    fn byte_cap_limits_aggregation() {
        let mut queue = ForwardQueue::new(true, Duration::from_millis(50), 10);
        let mut big = forward(1, 10, false);
        big.ogm.hna = vec![crate::messages::HnaEntry::new(Ipv4Addr::new(10, 9, 0, 0), 16); 97];
        queue.schedule_forward(big, Duration::ZERO, Duration::ZERO);
        queue.schedule_forward(forward(2, 10, false), Duration::from_millis(10), Duration::ZERO);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn last_hop_is_not_forwarded() {
        let mut queue = ForwardQueue::new(true, Duration::from_millis(50), 10);
        assert!(!queue.schedule_forward(forward(1, 1, false), Duration::ZERO, Duration::ZERO));
        assert!(queue.is_empty());
    }

    #[test]
    fn forward_rewrites_header_and_applies_hop_penalty() {
        let mut queue = ForwardQueue::new(false, Duration::ZERO, 10);
        queue.schedule_forward(forward(1, 10, false), Duration::ZERO, Duration::ZERO);
        let ogm = &queue.iter().next().expect("bundle").payloads[0];
        assert_eq!(ogm.ttl, 9);
        assert_eq!(ogm.hops, 1);
        assert_eq!(ogm.prev_sender, addr(1));
        assert_eq!(ogm.tq, (200u32 * 245 / 255) as u8);
    }

    #[test]
    fn better_router_values_replace_received_ones() {
        let mut queue = ForwardQueue::new(false, Duration::ZERO, 0);
        let mut fwd = forward(9, 10, false);
        fwd.sender = addr(2);
        fwd.router = Some(RouterSnapshot {
            address: addr(3),
            tq_avg: 240,
            last_ttl: 20,
            hop_count: 4,
        });
        queue.schedule_forward(fwd, Duration::ZERO, Duration::ZERO);

        let ogm = &queue.iter().next().expect("bundle").payloads[0];
        assert_eq!(ogm.tq, 240);
        assert_eq!(ogm.ttl, 19);
        assert_eq!(ogm.hops, 5);
    }

    #[test]
    fn drain_sets_direct_link_only_on_incoming_interface() {
        let mut queue = ForwardQueue::new(false, Duration::ZERO, 10);
        queue.schedule_forward(forward(1, 10, true), Duration::ZERO, Duration::ZERO);
        let mut wired = iface(1);
        wired.wireless = false;

        let drained = queue.drain(Duration::ZERO, &[iface(0), wired]);
        assert_eq!(drained.transmissions.len(), 2);
        let on_incoming = &drained.transmissions[0].payloads[0];
        let elsewhere = &drained.transmissions[1].payloads[0];
        assert!(on_incoming.is_direct_link());
        assert!(!elsewhere.is_direct_link());
        assert!(on_incoming.tq < elsewhere.tq);
    }

    #[test]
    fn own_message_of_secondary_interface_stays_there() {
        let mut queue = ForwardQueue::new(false, Duration::ZERO, 10);
        queue.schedule_own(Ogm::new(Ipv4Addr::new(10, 1, 0, 1), 1, 2), 1, Duration::from_secs(1));

        let drained = queue.drain(Duration::from_secs(1), &[iface(0), iface(1)]);
        assert_eq!(drained.own_interfaces, vec![1]);
        assert_eq!(drained.transmissions.len(), 1);
        assert_eq!(drained.transmissions[0].interface, 1);
    }

    #[test]
    fn nothing_leaves_before_its_time() {
        let mut queue = ForwardQueue::new(false, Duration::ZERO, 10);
        queue.schedule_own(Ogm::new(addr(1), 1, 50), 0, Duration::from_secs(1));
        assert!(queue.drain(Duration::from_millis(999), &[iface(0)]).transmissions.is_empty());
        assert_eq!(queue.next_send_time(), Some(Duration::from_secs(1)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Own(u64),
        Forward(u64, bool),
        Drain(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..500).prop_map(Op::Own),
            ((0u64..500), any::<bool>()).prop_map(|(t, d)| Op::Forward(t, d)),
            (0u64..100).prop_map(Op::Drain),
        ]
    }

    proptest! {
        #[test]
        fn drain_respects_send_time_order(ops in proptest::collection::vec(op(), 1..60)) {
            let mut queue = ForwardQueue::new(true, Duration::from_millis(50), 10);
            let interfaces = [iface(0)];
            let mut now = Duration::ZERO;
            let mut last_sent = Duration::ZERO;

            for op in ops {
                match op {
                    Op::Own(offset) => {
                        queue.schedule_own(Ogm::new(addr(1), 1, 50), 0, now + Duration::from_millis(offset));
                    }
                    Op::Forward(jitter, direct) => {
                        queue.schedule_forward(forward(7, 10, direct), now, Duration::from_millis(jitter));
                    }
                    Op::Drain(step) => {
                        now += Duration::from_millis(step);
                        for sent in queue.drain(now, &interfaces).transmissions {
                            prop_assert!(sent.send_time <= now);
                            prop_assert!(sent.send_time >= last_sent);
                            last_sent = sent.send_time;
                        }
                    }
                }
                let times: Vec<_> = queue.iter().map(|b| b.send_time).collect();
                prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}
