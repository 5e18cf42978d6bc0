//! Route selection.
//!
//! Owns the originator table together with everything that reacts to its
//! changes: announced networks, gateway election and link symmetry. Every
//! operation takes the routing table it programs and the current time, so
//! nothing here keeps a handle to the outside world.
//!
//! ## Test Organization
//!
//! Tests live in `routing/`:
//! - `update_tests.rs`: neighbor ranking, duplicate handling and route programming
//! - `purge_tests.rs`: timeouts of neighbors, originators and gateways

use super::{
    bidirect::{BidirectionalityEstimator, Verdict},
    gateway::GatewaySelector,
    hna::HnaReconciler,
    originator::{NeighborKey, OriginatorTable},
};
use crate::messages::{HnaEntry, Ogm};
use crate::ports::{Address, RouteTable};
use crate::settings::Settings;
use std::time::Duration;


#[cfg(test)]
#[path = "routing/purge_tests.rs"]
mod purge_tests;

// ============================================================================
// Type Definitions
// ============================================================================

/// An accepted originator message, with its quality already adjusted for
/// the link it arrived on.
#[derive(Debug, Clone, Copy)]
pub struct OgmReceipt<'a> {
    pub ogm: &'a Ogm,
    pub sender: Address,
    pub interface: usize,
    pub is_duplicate: bool,
}

/// What happened to the host route of an originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    Added { next_hop: Address },
    Removed,
    Changed { from: Address, to: Address },
    Unchanged,
}

/// Pairwise ranking of candidate routers: better quality wins, then more of
/// our own messages echoed on the incoming interface, and the installed
/// router keeps its place on a tie.
fn outranks(tq: u8, echo: u8, is_router: bool, max_tq: u8, max_echo: u8) -> bool {
    tq > max_tq || (tq == max_tq && echo > max_echo) || (is_router && tq == max_tq)
}

#[derive(Debug)]
pub struct Routing {
    table: OriginatorTable,
    hna: HnaReconciler,
    gateways: GatewaySelector,
    bidirect: BidirectionalityEstimator,
    purge_timeout: Duration,
}

impl Routing {
    // ========================================================================
    // Construction and accessors
    // ========================================================================

    pub fn new(settings: &Settings, interfaces: usize, started_at: Duration) -> Self {
        Self {
            table: OriginatorTable::new(
                interfaces,
                usize::from(settings.local_window),
                usize::from(settings.global_window),
            ),
            hna: HnaReconciler::new(&settings.announced_networks),
            gateways: GatewaySelector::new(
                settings.routing_class,
                settings.preferred_gateway,
                usize::from(settings.local_window),
                settings.originator_interval,
                started_at,
            ),
            bidirect: BidirectionalityEstimator::new(
                settings.minimum_send,
                settings.minimum_receive,
                settings.bidirect_limit,
                settings.local_window,
            ),
            purge_timeout: settings.purge_timeout,
        }
    }

    pub fn table(&self) -> &OriginatorTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut OriginatorTable {
        &mut self.table
    }

    pub fn hna(&self) -> &HnaReconciler {
        &self.hna
    }

    pub fn hna_mut(&mut self) -> &mut HnaReconciler {
        &mut self.hna
    }

    pub fn gateways(&self) -> &GatewaySelector {
        &self.gateways
    }

    // ========================================================================
    // Message accounting
    // ========================================================================

    /// Slide every known link of the originator to `ogm.seqno`, marking it
    /// on the link it came in on. Returns whether the sequence number was
    /// already seen on any link.
    pub fn count_real_packets(
        &mut self,
        ogm: &Ogm,
        sender: Address,
        interface: usize,
        now: Duration,
    ) -> bool {
        let record = self.table.get_or_create(ogm.originator, now);
        let last_seqno = record.last_real_seqno;
        let seq_diff = i32::from(ogm.seqno.wrapping_sub(last_seqno) as i16);
        let key = NeighborKey::new(sender, interface);

        let mut is_duplicate = false;
        for neighbor in &mut record.neighbors {
            is_duplicate |= neighbor.real_bits.test_seen(last_seqno, ogm.seqno);
            let mark = neighbor.key() == key;
            neighbor.observe_seqno(seq_diff, mark);
        }
        if !is_duplicate {
            tracing::trace!(originator = %ogm.originator, old = last_seqno, new = ogm.seqno, "updating last seqno");
            record.last_real_seqno = ogm.seqno;
        }
        is_duplicate
    }

    pub fn evaluate_bidirectional(
        &mut self,
        originator: Address,
        link_originator: Address,
        packet_tq: u8,
        interface: usize,
        now: Duration,
    ) -> Verdict {
        self.bidirect
            .evaluate(&mut self.table, originator, link_originator, packet_tq, interface, now)
    }

    // ========================================================================
    // Route selection
    // ========================================================================

    /// Rank the originator's neighbors after an accepted message and
    /// reprogram routes, announced networks and gateways accordingly.
    pub fn update_from_packet<R: RouteTable>(
        &mut self,
        routes: &mut R,
        receipt: &OgmReceipt<'_>,
        now: Duration,
    ) -> RouteChange {
        let ogm = receipt.ogm;
        let originator = ogm.originator;
        let key = NeighborKey::new(receipt.sender, receipt.interface);
        let windows = self.table.windows();

        self.table.get_or_create(originator, now);
        let echoes: Vec<u8> = self
            .table
            .get(originator)
            .map(|record| {
                record
                    .neighbors
                    .iter()
                    .map(|n| self.table.echo_sum(n.link_originator, receipt.interface))
                    .collect()
            })
            .unwrap_or_default();
        let sender_echo = self.table.echo_sum(receipt.sender, receipt.interface);

        let Some(record) = self.table.get_mut(originator) else {
            return RouteChange::Unchanged;
        };
        let router = record.router;
        let (mut best, mut max_tq, mut max_echo) = (None, 0u8, 0u8);

        for (neighbor, echo) in record.neighbors.iter_mut().zip(echoes) {
            if neighbor.key() == key {
                continue;
            }
            if !receipt.is_duplicate {
                neighbor.push_tq(0);
            }
            let is_router = router == Some(neighbor.key());
            if outranks(neighbor.tq_avg, echo, is_router, max_tq, max_echo) {
                best = Some(neighbor.key());
                max_tq = neighbor.tq_avg;
                max_echo = echo;
            }
        }

        if !receipt.is_duplicate {
            record.last_ttl = ogm.ttl;
        }
        let neighbor = record.neighbor_or_insert(key, windows, now);
        neighbor.last_valid = now;
        neighbor.push_tq(ogm.tq);
        if !receipt.is_duplicate {
            neighbor.hop_count = ogm.hops;
            neighbor.last_ttl = ogm.ttl;
        }
        if outranks(neighbor.tq_avg, sender_echo, router == Some(key), max_tq, max_echo) {
            best = Some(key);
        }

        let change = self.update_routes(routes, originator, best, &ogm.hna, now);

        let Some(record) = self.table.get_mut(originator) else {
            return change;
        };
        let flags_changed = record.gateway_flags != ogm.gateway_flags;
        record.gateway_flags = ogm.gateway_flags;
        record.gateway_port = ogm.gateway_port;
        if flags_changed {
            self.gateways.on_gateway_flags_changed(
                &self.table,
                routes,
                originator,
                ogm.gateway_flags,
                ogm.gateway_port,
                now,
            );
        }

        self.hna.check_tq_ordering(&self.table, routes, originator);
        if ogm.gateway_flags != 0 {
            self.gateways.consider_switch(&self.table, routes, originator, now);
        }
        change
    }

    /// Move the originator's host route to `best` and let announced networks
    /// and the gateway follow.
    pub fn update_routes<R: RouteTable>(
        &mut self,
        routes: &mut R,
        originator: Address,
        best: Option<NeighborKey>,
        announced: &[HnaEntry],
        now: Duration,
    ) -> RouteChange {
        let Some(record) = self.table.get_mut(originator) else {
            return RouteChange::Unchanged;
        };
        let old = record.router;

        let change = match (old, best) {
            (old, new) if old == new => {
                self.hna
                    .on_route_unchanged(&mut self.table, routes, originator, announced);
                RouteChange::Unchanged
            }
            (None, Some(new)) => {
                tracing::debug!(%originator, via = %new.address, interface = new.interface, "adding new route");
                routes.install_route(originator, 32, new.address, new.interface);
                record.router = Some(new);
                record.selected_interface = Some(new.interface);
                record.hop_count = record.router_record().map_or(1, |n| n.hop_count.saturating_add(1));
                self.hna
                    .on_route_added(&mut self.table, routes, originator, announced);
                RouteChange::Added {
                    next_hop: new.address,
                }
            }
            (Some(old), None) => {
                tracing::debug!(%originator, via = %old.address, "deleting previous route");
                self.hna.on_route_removed(&mut self.table, routes, originator);
                routes.withdraw_route(originator, 32, old.address, old.interface);
                if let Some(record) = self.table.get_mut(originator) {
                    record.router = None;
                }
                self.gateways
                    .refresh_route(&self.table, routes, originator, now);
                RouteChange::Removed
            }
            (Some(old), Some(new)) => {
                tracing::debug!(%originator, from = %old.address, to = %new.address, "route changed");
                routes.install_route(originator, 32, new.address, new.interface);
                record.router = Some(new);
                record.selected_interface = Some(new.interface);
                record.hop_count = record.router_record().map_or(1, |n| n.hop_count.saturating_add(1));
                self.hna
                    .on_route_changed(&mut self.table, routes, originator, announced);
                self.gateways
                    .refresh_route(&self.table, routes, originator, now);
                RouteChange::Changed {
                    from: old.address,
                    to: new.address,
                }
            }
            (None, None) => RouteChange::Unchanged,
        };

        self.check_installed_route(routes, originator);
        change
    }

    /// Make the installed host route agree with the selected router.
    fn check_installed_route<R: RouteTable>(&self, routes: &mut R, originator: Address) {
        let Some(record) = self.table.get(originator) else {
            return;
        };
        let installed = routes.current_next_hop(originator);
        match (record.router, installed) {
            (Some(router), Some(next_hop)) if router.address == next_hop => {}
            (Some(router), installed) => {
                tracing::warn!(%originator, expected = %router.address, ?installed, "installed route diverged, reinstalling");
                routes.install_route(originator, 32, router.address, router.interface);
            }
            (None, Some(next_hop)) => {
                let interface = record.selected_interface.unwrap_or(0);
                tracing::warn!(%originator, %next_hop, "stale route installed, withdrawing");
                routes.withdraw_route(originator, 32, next_hop, interface);
            }
            (None, None) => {}
        }
    }

    // ========================================================================
    // Gateways
    // ========================================================================

    pub fn elect_gateway<R: RouteTable>(&mut self, routes: &mut R, now: Duration) {
        self.gateways.re_elect(&self.table, routes, now);
    }

    pub fn report_gateway_failure<R: RouteTable>(
        &mut self,
        routes: &mut R,
        gateway: Address,
        now: Duration,
    ) {
        self.gateways
            .report_failure(&self.table, routes, gateway, now);
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    /// Drop originators silent for twice the purge timeout and neighbors
    /// silent for the purge timeout, reselecting routers where needed.
    pub fn purge<R: RouteTable>(&mut self, routes: &mut R, now: Duration) {
        let purge_timeout = self.purge_timeout;
        let mut gateway_purged = false;

        for address in self.table.addresses() {
            let Some(record) = self.table.get_mut(address) else {
                continue;
            };

            if now > record.last_valid + 2 * purge_timeout {
                tracing::debug!(originator = %address, "originator timeout");
                record.neighbors.clear();
                gateway_purged |= self.gateways.mark_deleted(address, now);
                self.update_routes(routes, address, None, &[], now);
                self.table.remove(address);
                continue;
            }

            let router = record.router;
            let before = record.neighbors.len();
            record.neighbors.retain(|n| {
                let stale = now > n.last_valid + purge_timeout;
                if stale {
                    tracing::debug!(originator = %address, neighbor = %n.address, "neighbor timeout");
                }
                !stale
            });
            if record.neighbors.len() == before {
                continue;
            }

            let router_tq = router
                .and_then(|key| record.neighbor(key))
                .map(|n| n.tq_avg);
            let mut best: Option<(NeighborKey, u8)> = None;
            for neighbor in &record.neighbors {
                if best.map_or(true, |(_, tq)| neighbor.tq_avg > tq) {
                    best = Some((neighbor.key(), neighbor.tq_avg));
                }
            }

            let reselect = match (best, router_tq) {
                (None, _) | (_, None) => true,
                (Some((_, best_tq)), Some(router_tq)) => best_tq > router_tq,
            };
            if reselect {
                let announced = record.announced.clone();
                self.update_routes(routes, address, best.map(|(key, _)| key), &announced, now);
            }
        }

        self.gateways.purge(routes, now, purge_timeout);
        if gateway_purged {
            self.gateways.re_elect(&self.table, routes, now);
        }
    }

    /// Withdraw every route this node installed and forget all state.
    pub fn withdraw_all<R: RouteTable>(&mut self, routes: &mut R) {
        self.gateways.deselect(routes);
        self.hna.clear(routes);
        for record in self.table.iter() {
            if let Some(router) = record.router {
                routes.withdraw_route(record.address, 32, router.address, router.interface);
            }
        }
        self.table.clear();
    }
}
