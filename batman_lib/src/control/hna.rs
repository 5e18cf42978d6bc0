//! Host network announcements.
//!
//! Keeps one winner per announced network across all originators that
//! announce it, and makes sure the routing table carries exactly the route
//! through the winner's router. Also holds the networks this node announces
//! itself.

use super::originator::{OriginatorTable, RouteInfo};
use crate::messages::HnaEntry;
use crate::ports::{Address, RouteTable};
use indexmap::IndexMap;
use itertools::Itertools;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announcement {
    pub winner: Option<Address>,
    pub announcers: Vec<Address>,
    /// What is in the routing table for this network right now.
    pub installed: Option<RouteInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HnaTask {
    Announce(HnaEntry),
    Withdraw(HnaEntry),
}

#[derive(Debug, Default)]
pub struct HnaReconciler {
    global: IndexMap<HnaEntry, Announcement>,
    local: Vec<HnaEntry>,
    tasks: Vec<HnaTask>,
}

impl HnaReconciler {
    pub fn new(local: &[HnaEntry]) -> Self {
        let mut reconciler = Self::default();
        for entry in local {
            reconciler.queue(HnaTask::Announce(*entry));
        }
        reconciler
    }

    pub fn winner(&self, entry: &HnaEntry) -> Option<Address> {
        self.global.get(entry).and_then(|a| a.winner)
    }

    pub fn announcement(&self, entry: &HnaEntry) -> Option<&Announcement> {
        self.global.get(entry)
    }

    pub fn announcements(&self) -> impl Iterator<Item = (&HnaEntry, &Announcement)> {
        self.global.iter()
    }

    /// Networks this node announces in its own messages.
    pub fn local(&self) -> &[HnaEntry] {
        &self.local
    }

    pub fn queue(&mut self, task: HnaTask) {
        self.tasks.push(task);
    }

    /// Apply queued local announce/withdraw tasks. Returns whether the local
    /// set changed.
    pub fn execute_local_tasks(&mut self) -> bool {
        let mut changed = false;
        for task in std::mem::take(&mut self.tasks) {
            match task {
                HnaTask::Announce(entry) if self.local.contains(&entry) => {
                    tracing::warn!(network = %entry, "network is already announced");
                }
                HnaTask::Announce(entry) => {
                    tracing::debug!(network = %entry, "announcing network");
                    self.local.push(entry);
                    changed = true;
                }
                HnaTask::Withdraw(entry) => match self.local.iter().position(|e| *e == entry) {
                    Some(position) => {
                        tracing::debug!(network = %entry, "withdrawing network");
                        self.local.remove(position);
                        changed = true;
                    }
                    None => tracing::warn!(network = %entry, "cannot withdraw a network that is not announced"),
                },
            }
        }
        changed
    }

    /// `originator` just gained a route: register its announcements.
    pub fn on_route_added<R: RouteTable>(
        &mut self,
        table: &mut OriginatorTable,
        routes: &mut R,
        originator: Address,
        announced: &[HnaEntry],
    ) {
        let Some(record) = table.get_mut(originator) else {
            return;
        };
        record.announced = announced.to_vec();
        if !announced.is_empty() {
            tracing::debug!(%originator, networks = %announced.iter().join(", "), "adding announced networks");
        }
        for entry in announced {
            self.add_announcer(table, routes, *entry, originator);
        }
    }

    /// `originator` lost its route: drop every announcement it made.
    pub fn on_route_removed<R: RouteTable>(
        &mut self,
        table: &mut OriginatorTable,
        routes: &mut R,
        originator: Address,
    ) {
        let Some(record) = table.get_mut(originator) else {
            return;
        };
        let announced = std::mem::take(&mut record.announced);
        for entry in announced {
            self.remove_announcer(table, routes, entry, originator);
        }
    }

    /// `originator` switched routers: reprogram the networks it wins, then
    /// reconcile its announced set.
    pub fn on_route_changed<R: RouteTable>(
        &mut self,
        table: &mut OriginatorTable,
        routes: &mut R,
        originator: Address,
        announced: &[HnaEntry],
    ) {
        let route = table.route_info(originator);
        let previously = table
            .get(originator)
            .map(|r| r.announced.clone())
            .unwrap_or_default();
        for entry in previously {
            let Some(announcement) = self.global.get_mut(&entry) else {
                continue;
            };
            if announcement.winner == Some(originator) {
                program(routes, &entry, announcement, route);
            }
        }
        self.update_announced_set(table, routes, originator, announced);
    }

    pub fn on_route_unchanged<R: RouteTable>(
        &mut self,
        table: &mut OriginatorTable,
        routes: &mut R,
        originator: Address,
        announced: &[HnaEntry],
    ) {
        self.update_announced_set(table, routes, originator, announced);
    }

    /// Replace `originator`'s announced set. Networks in both sets keep
    /// their routes untouched.
    pub fn update_announced_set<R: RouteTable>(
        &mut self,
        table: &mut OriginatorTable,
        routes: &mut R,
        originator: Address,
        announced: &[HnaEntry],
    ) {
        let Some(record) = table.get_mut(originator) else {
            return;
        };
        if record.announced == announced {
            return;
        }
        let previously = std::mem::replace(&mut record.announced, announced.to_vec());

        for entry in announced.iter().filter(|e| !previously.contains(e)) {
            self.add_announcer(table, routes, *entry, originator);
        }
        for entry in previously.iter().filter(|e| !announced.contains(e)) {
            self.remove_announcer(table, routes, *entry, originator);
        }
    }

    /// Promote the best announcer of every network `originator` announces
    /// whenever the current winner is beaten. Ties keep the current winner.
    pub fn check_tq_ordering<R: RouteTable>(
        &mut self,
        table: &OriginatorTable,
        routes: &mut R,
        originator: Address,
    ) {
        let Some(record) = table.get(originator) else {
            return;
        };
        for entry in &record.announced {
            let Some(announcement) = self.global.get_mut(entry) else {
                continue;
            };
            let best = best_announcer(table, &announcement.announcers, announcement.winner);
            let best_address = best.map(|(address, _)| address);
            if best_address == announcement.winner {
                continue;
            }
            tracing::debug!(network = %entry, from = ?announcement.winner, to = ?best_address, "better announcer");
            announcement.winner = best_address;
            program(routes, entry, announcement, best.map(|(_, route)| route));
        }
    }

    /// Withdraw every installed network route and forget all announcements.
    pub fn clear<R: RouteTable>(&mut self, routes: &mut R) {
        for (entry, announcement) in self.global.iter_mut() {
            program(routes, entry, announcement, None);
        }
        self.global.clear();
    }

    fn add_announcer<R: RouteTable>(
        &mut self,
        table: &OriginatorTable,
        routes: &mut R,
        entry: HnaEntry,
        originator: Address,
    ) {
        if !entry.is_valid() {
            tracing::trace!(network = %entry, %originator, "ignoring invalid announcement");
            return;
        }
        let announcement = self.global.entry(entry).or_default();
        if !announcement.announcers.contains(&originator) {
            announcement.announcers.push(originator);
        }
        if announcement.winner == Some(originator) {
            return;
        }
        let Some(route) = table.route_info(originator) else {
            return;
        };
        let current_tq = announcement
            .winner
            .and_then(|w| table.route_info(w))
            .map(|r| r.tq);
        if current_tq.is_some_and(|tq| route.tq <= tq) {
            return;
        }

        tracing::debug!(network = %entry, %originator, via = %route.next_hop, "network announced");
        announcement.winner = Some(originator);
        program(routes, &entry, announcement, Some(route));
    }

    fn remove_announcer<R: RouteTable>(
        &mut self,
        table: &OriginatorTable,
        routes: &mut R,
        entry: HnaEntry,
        originator: Address,
    ) {
        let Some(announcement) = self.global.get_mut(&entry) else {
            return;
        };
        announcement.announcers.retain(|a| *a != originator);

        if announcement.winner == Some(originator) {
            let best = best_announcer(table, &announcement.announcers, None);
            announcement.winner = best.map(|(address, _)| address);
            tracing::debug!(network = %entry, from = %originator, to = ?announcement.winner, "announcer gone");
            program(routes, &entry, announcement, best.map(|(_, route)| route));
        }

        if announcement.announcers.is_empty() {
            if let Some(announcement) = self.global.shift_remove(&entry) {
                debug_assert!(announcement.installed.is_none());
            }
        }
    }
}

/// Announcer with the best routed quality. `incumbent` wins ties.
fn best_announcer(
    table: &OriginatorTable,
    announcers: &[Address],
    incumbent: Option<Address>,
) -> Option<(Address, RouteInfo)> {
    let mut best = incumbent.and_then(|a| table.route_info(a).map(|route| (a, route)));
    for address in announcers {
        let Some(route) = table.route_info(*address) else {
            continue;
        };
        if best.map_or(true, |(_, b)| route.tq > b.tq) {
            best = Some((*address, route));
        }
    }
    best
}

/// Point the routing table entry for `entry` at `target`, withdrawing the
/// old route first. Nothing happens when the path stays the same.
fn program<R: RouteTable>(
    routes: &mut R,
    entry: &HnaEntry,
    announcement: &mut Announcement,
    target: Option<RouteInfo>,
) {
    match (announcement.installed, target) {
        (Some(installed), Some(target)) if installed.same_path(&target) => {
            announcement.installed = Some(target);
            return;
        }
        (None, None) => return,
        _ => {}
    }
    if let Some(installed) = announcement.installed.take() {
        routes.withdraw_route(entry.network(), entry.prefix_len, installed.next_hop, installed.interface);
    }
    if let Some(target) = target {
        routes.install_route(entry.network(), entry.prefix_len, target.next_hop, target.interface);
        announcement.installed = Some(target);
    }
}

#[cfg(test)]
#[path = "hna_tests.rs"]
mod hna_tests;
