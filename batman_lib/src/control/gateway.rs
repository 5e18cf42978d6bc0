//! Gateway (default route) election.
//!
//! Originators advertising a non-zero gateway class become candidates. A
//! node with a non-zero routing class elects one of them and points its
//! default route at the candidate's current router.

use super::originator::{OriginatorTable, RouteInfo};
use crate::error::ConfigError;
use crate::ports::{Address, RouteTable};
use std::{fmt, net::Ipv4Addr, str::FromStr, time::Duration};

/// A gateway that failed is not elected again for this long, unless it is
/// the only candidate.
pub const GATEWAY_FAILURE_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_GATEWAY_PORT: u16 = 4306;

const DEFAULT_ROUTE: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Advertised bandwidth packed into one byte as `sdddduuu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct GatewayClass(pub u8);

impl GatewayClass {
    pub fn is_gateway(&self) -> bool {
        self.0 != 0
    }

    /// Download and upload speed in kbit/s.
    pub fn speeds(&self) -> (u32, u32) {
        let class = u32::from(self.0);
        let sbit = (class & 0x80) >> 7;
        let dpart = (class & 0x78) >> 3;
        let upart = class & 0x07;
        let down = 32 * (sbit + 2) * (1 << dpart);
        let up = ((upart + 1) * down) / 8;
        (down, up)
    }

    /// Closest class for the given speeds in kbit/s, download first.
    pub fn from_speeds(down: u32, up: u32) -> Self {
        let mut class = 0u8;
        let mut best_down = 0u32;
        let mut min_diff = u32::MAX;
        for sbit in 0..2u32 {
            for part in 0..16u32 {
                let candidate = 32 * (sbit + 2) * (1 << part);
                let diff = candidate.abs_diff(down);
                if diff < min_diff {
                    min_diff = diff;
                    class = ((sbit << 7) + (part << 3)) as u8;
                    best_down = candidate;
                }
            }
        }

        let mut min_diff = u32::MAX;
        for part in 0..8u32 {
            let candidate = ((part + 1) * best_down) / 8;
            let diff = candidate.abs_diff(up);
            if diff < min_diff {
                min_diff = diff;
                class = (class & 0xF8) | part as u8;
            }
        }
        Self(class)
    }
}

impl fmt::Display for GatewayClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (down, up) = self.speeds();
        let unit = |kbit: u32| {
            if kbit >= 2048 {
                format!("{}MBit", kbit / 1024)
            } else {
                format!("{kbit}KBit")
            }
        };
        write!(f, "{} -> {}/{}", self.0, unit(down), unit(up))
    }
}

fn parse_speed(text: &str) -> Option<u32> {
    let lower = text.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(d) = lower.strip_suffix("mbit") {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix("kbit") {
        (d, 1)
    } else {
        (lower.as_str(), 1)
    };
    digits.trim().parse::<u32>().ok()?.checked_mul(multiplier)
}

impl FromStr for GatewayClass {
    type Err = ConfigError;

    /// Either a raw class byte (`"33"`) or speeds in kbit/s with optional
    /// `kbit`/`mbit` units (`"5mbit/1024kbit"`, `"2000"`). Without an upload
    /// speed a fifth of the download speed is assumed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidGatewayClass(s.to_string());
        let trimmed = s.trim();
        if let Ok(raw) = trimmed.parse::<u8>() {
            return Ok(Self(raw));
        }

        let (down, up) = match trimmed.split_once('/') {
            Some((down, up)) => (parse_speed(down), Some(parse_speed(up).ok_or_else(invalid)?)),
            None => (parse_speed(trimmed), None),
        };
        let down = down.filter(|d| *d > 0).ok_or_else(invalid)?;
        Ok(Self::from_speeds(down, up.unwrap_or(down / 5)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCandidate {
    pub originator: Address,
    pub gateway_port: u16,
    pub last_failure: Option<Duration>,
    pub deleted_at: Option<Duration>,
}

impl GatewayCandidate {
    fn failed_recently(&self, now: Duration) -> bool {
        self.last_failure
            .is_some_and(|failure| now < failure + GATEWAY_FAILURE_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    NoGateway,
    HasGateway { originator: Address, route: RouteInfo },
}

#[derive(Debug)]
pub struct GatewaySelector {
    candidates: Vec<GatewayCandidate>,
    state: GatewayState,
    routing_class: u8,
    preferred: Option<Address>,
    local_window: u64,
    /// Classes below 4 wait until one full window of own messages has gone out.
    settled_at: Duration,
}

impl GatewaySelector {
    pub fn new(
        routing_class: u8,
        preferred: Option<Address>,
        local_window: usize,
        originator_interval: Duration,
        started_at: Duration,
    ) -> Self {
        Self {
            candidates: Vec::new(),
            state: GatewayState::NoGateway,
            routing_class,
            preferred,
            local_window: local_window.max(1) as u64,
            settled_at: started_at + originator_interval * local_window as u32,
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn current(&self) -> Option<Address> {
        match self.state {
            GatewayState::HasGateway { originator, .. } => Some(originator),
            GatewayState::NoGateway => None,
        }
    }

    pub fn candidates(&self) -> &[GatewayCandidate] {
        &self.candidates
    }

    pub fn candidate(&self, originator: Address) -> Option<&GatewayCandidate> {
        self.candidates.iter().find(|c| c.originator == originator)
    }

    /// Candidates not waiting out their deletion grace period.
    pub fn active_candidates(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.deleted_at.is_none())
            .count()
    }

    pub fn on_gateway_flags_changed<R: RouteTable>(
        &mut self,
        table: &OriginatorTable,
        routes: &mut R,
        originator: Address,
        flags: u8,
        port: u16,
        now: Duration,
    ) {
        if let Some(candidate) = self.candidates.iter_mut().find(|c| c.originator == originator) {
            if flags != 0 {
                candidate.deleted_at = None;
                candidate.gateway_port = port;
                tracing::debug!(gateway = %originator, class = %GatewayClass(flags), "gateway class changed");
                return;
            }

            tracing::info!(gateway = %originator, "gateway removed from list");
            candidate.deleted_at = Some(now);
            if self.current() == Some(originator) {
                self.deselect(routes);
                self.re_elect(table, routes, now);
            }
            return;
        }

        if flags != 0 {
            tracing::info!(gateway = %originator, class = %GatewayClass(flags), "found new gateway");
            self.candidates.push(GatewayCandidate {
                originator,
                gateway_port: port,
                last_failure: None,
                deleted_at: None,
            });
        }
    }

    pub fn re_elect<R: RouteTable>(&mut self, table: &OriginatorTable, routes: &mut R, now: Duration) {
        if self.routing_class == 0 {
            return;
        }
        if self.routing_class < 4 && now < self.settled_at {
            return;
        }
        if self.candidates.is_empty() {
            if self.current().is_some() {
                tracing::info!("removing default route, no gateways left");
                self.deselect(routes);
            }
            return;
        }

        let several = self.candidates.len() > 1;
        let mut best: Option<(Address, RouteInfo)> = None;
        let mut max_factor = 0u64;
        let mut max_tq = 0u8;

        for candidate in &self.candidates {
            if candidate.deleted_at.is_some() || (several && candidate.failed_recently(now)) {
                continue;
            }
            let Some(record) = table.get(candidate.originator) else {
                continue;
            };
            let Some(route) = record.route_info() else {
                continue;
            };

            if self.routing_class == 1 {
                let (down, _) = GatewayClass(record.gateway_flags).speeds();
                let quality = u64::from(route.tq) * 100 / self.local_window;
                let factor = quality * quality * u64::from(down / 64);
                if factor > max_factor || (factor == max_factor && route.tq > max_tq) {
                    best = Some((candidate.originator, route));
                }
                max_factor = max_factor.max(factor);
            } else if route.tq > max_tq {
                best = Some((candidate.originator, route));
            }
            max_tq = max_tq.max(route.tq);

            if self.preferred == Some(candidate.originator) {
                best = Some((candidate.originator, route));
                break;
            }
        }

        let chosen = best.map(|(originator, _)| originator);
        if chosen == self.current() {
            return;
        }

        self.deselect(routes);
        if let Some((originator, route)) = best {
            tracing::info!(gateway = %originator, tq = route.tq, via = %route.next_hop, "adding default route");
            self.install(routes, originator, route);
        }
    }

    /// Late switching for routing classes 3 and up: called whenever a
    /// gateway's message was accepted.
    pub fn consider_switch<R: RouteTable>(
        &mut self,
        table: &OriginatorTable,
        routes: &mut R,
        originator: Address,
        now: Duration,
    ) {
        if self.routing_class <= 2 {
            return;
        }
        let GatewayState::HasGateway { originator: current, .. } = self.state else {
            return;
        };
        if current == originator {
            return;
        }

        let preferred = self.preferred == Some(originator);
        let candidate_tq = table.get(originator).map_or(0, |r| r.router_tq());
        let current_tq = table.get(current).map_or(0, |r| r.router_tq());
        let better = (self.preferred.is_none() && candidate_tq > current_tq) || preferred;
        if !better {
            return;
        }
        let margin_met = preferred
            || self.routing_class == 3
            || candidate_tq.saturating_sub(current_tq) >= self.routing_class;
        if !margin_met {
            return;
        }
        let Some(candidate) = self.candidate(originator) else {
            return;
        };
        if candidate.failed_recently(now) {
            return;
        }

        tracing::info!(from = %current, to = %originator, current_tq, candidate_tq, "switching gateway");
        self.deselect(routes);
        self.re_elect(table, routes, now);
    }

    /// The gateway's router changed: move the default route along with it.
    pub fn refresh_route<R: RouteTable>(
        &mut self,
        table: &OriginatorTable,
        routes: &mut R,
        originator: Address,
        now: Duration,
    ) {
        let GatewayState::HasGateway { originator: current, route } = self.state else {
            return;
        };
        if current != originator {
            return;
        }
        match table.route_info(originator) {
            Some(new_route) if new_route.same_path(&route) => {
                self.state = GatewayState::HasGateway {
                    originator,
                    route: new_route,
                };
            }
            Some(new_route) => {
                self.deselect(routes);
                self.install(routes, originator, new_route);
            }
            None => {
                self.deselect(routes);
                self.re_elect(table, routes, now);
            }
        }
    }

    pub fn report_failure<R: RouteTable>(
        &mut self,
        table: &OriginatorTable,
        routes: &mut R,
        originator: Address,
        now: Duration,
    ) {
        let Some(candidate) = self.candidates.iter_mut().find(|c| c.originator == originator) else {
            tracing::warn!(gateway = %originator, "failure reported for unknown gateway");
            return;
        };
        candidate.last_failure = Some(now);
        if self.current() == Some(originator) {
            self.deselect(routes);
            self.re_elect(table, routes, now);
        }
    }

    /// The originator behind a candidate timed out. Returns whether an
    /// active candidate was affected.
    pub fn mark_deleted(&mut self, originator: Address, now: Duration) -> bool {
        match self.candidates.iter_mut().find(|c| c.originator == originator) {
            Some(candidate) if candidate.deleted_at.is_none() => {
                candidate.deleted_at = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn purge<R: RouteTable>(&mut self, routes: &mut R, now: Duration, purge_timeout: Duration) {
        self.candidates.retain(|c| match c.deleted_at {
            Some(deleted) if now > deleted + 2 * purge_timeout => {
                tracing::debug!(gateway = %c.originator, "gateway timeout");
                false
            }
            _ => true,
        });

        if let Some(current) = self.current() {
            if self.candidate(current).is_none() {
                self.deselect(routes);
            }
        }
    }

    /// Withdraw the default route, if any.
    pub fn deselect<R: RouteTable>(&mut self, routes: &mut R) {
        if let GatewayState::HasGateway { originator, route } = self.state {
            tracing::debug!(gateway = %originator, via = %route.next_hop, "removing default route");
            routes.withdraw_route(DEFAULT_ROUTE, 0, route.next_hop, route.interface);
            self.state = GatewayState::NoGateway;
        }
    }

    fn install<R: RouteTable>(&mut self, routes: &mut R, originator: Address, route: RouteInfo) {
        routes.install_route(DEFAULT_ROUTE, 0, route.next_hop, route.interface);
        self.state = GatewayState::HasGateway { originator, route };
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod gateway_tests;
