//! Gateway Election Tests
//!
//! Class encoding, election by routing class, failure back-off, late
//! switching and grace-period purging.

use super::*;
use crate::control::originator::NeighborKey;
use crate::test_helpers::{addr, RecordingRouteTable, RouteCall};

const SETTLED: Duration = Duration::from_secs(100);

fn selector(routing_class: u8) -> GatewaySelector {
    GatewaySelector::new(routing_class, None, 64, Duration::from_secs(1), Duration::ZERO)
}

/// Originator `last` reachable directly with the given quality and class.
fn add_gateway(table: &mut OriginatorTable, last: u8, tq: u8, flags: u8) {
    let windows = table.windows();
    let record = table.get_or_create(addr(last), Duration::ZERO);
    record.gateway_flags = flags;
    let key = NeighborKey::new(addr(last), 0);
    record.neighbor_or_insert(key, windows, Duration::ZERO).push_tq(tq);
    record.router = Some(key);
}

fn announce(
    selector: &mut GatewaySelector,
    table: &OriginatorTable,
    routes: &mut RecordingRouteTable,
    last: u8,
    flags: u8,
    now: Duration,
) {
    selector.on_gateway_flags_changed(table, routes, addr(last), flags, DEFAULT_GATEWAY_PORT, now);
}

#[test]
fn class_speeds_decode() {
    assert_eq!(GatewayClass(0).speeds(), (64, 8));
    assert_eq!(GatewayClass(128).speeds(), (96, 12));
    assert_eq!(GatewayClass(0x78 | 0x07).speeds(), (64 * 32768, 64 * 32768));
}

#[test]
fn class_speeds_round_trip_every_class() {
    for class in 0..=u8::MAX {
        let (down, up) = GatewayClass(class).speeds();
        assert_eq!(GatewayClass::from_speeds(down, up), GatewayClass(class));
    }
}

#[test]
fn parse_gateway_class() {
    assert_eq!("33".parse::<GatewayClass>().expect("raw"), GatewayClass(33));
    assert_eq!("0".parse::<GatewayClass>().expect("raw"), GatewayClass(0));

    let class: GatewayClass = "5mbit/1mbit".parse().expect("speeds");
    assert_eq!(class.speeds(), (4096, 1024));

    let class: GatewayClass = "2000".parse().expect("kbit");
    assert_eq!(class.speeds().0, 2048);

    assert!("fast".parse::<GatewayClass>().is_err());
    assert!("5mbit/slow".parse::<GatewayClass>().is_err());
}

#[test]
fn best_tq_candidate_is_elected() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(2);
    add_gateway(&mut table, 1, 200, 128);
    add_gateway(&mut table, 2, 150, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    announce(&mut selector, &table, &mut routes, 2, 128, Duration::ZERO);
    assert_eq!(selector.active_candidates(), 2);

    selector.re_elect(&table, &mut routes, SETTLED);
    assert_eq!(selector.current(), Some(addr(1)));
    assert_eq!(routes.default_route(), Some(addr(1)));
}

#[test]
fn no_election_before_window_settles() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(2);
    add_gateway(&mut table, 1, 200, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);

    selector.re_elect(&table, &mut routes, Duration::from_secs(10));
    assert_eq!(selector.current(), None);
    assert!(routes.calls.is_empty());
}

#[test]
fn routing_class_zero_never_elects() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(0);
    add_gateway(&mut table, 1, 200, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    selector.re_elect(&table, &mut routes, SETTLED);
    assert_eq!(selector.state(), GatewayState::NoGateway);
}

#[test]
fn flags_dropping_to_zero_falls_back_to_next_candidate() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(2);
    add_gateway(&mut table, 1, 200, 128);
    add_gateway(&mut table, 2, 150, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    announce(&mut selector, &table, &mut routes, 2, 128, Duration::ZERO);
    selector.re_elect(&table, &mut routes, SETTLED);

    announce(&mut selector, &table, &mut routes, 1, 0, SETTLED);
    assert_eq!(selector.current(), Some(addr(2)));
    assert_eq!(routes.default_route(), Some(addr(2)));
    assert_eq!(selector.active_candidates(), 1);
}

#[test]
fn last_gateway_leaving_withdraws_default_route() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(2);
    add_gateway(&mut table, 1, 200, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    selector.re_elect(&table, &mut routes, SETTLED);
    routes.clear_calls();

    announce(&mut selector, &table, &mut routes, 1, 0, SETTLED);
    assert_eq!(selector.state(), GatewayState::NoGateway);
    assert_eq!(routes.default_route(), None);
    assert!(matches!(routes.calls.as_slice(), [RouteCall::Withdraw { .. }]));
}

#[test]
fn fast_class_weighs_bandwidth() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(1);
    add_gateway(&mut table, 1, 200, 0x01);
    add_gateway(&mut table, 2, 180, 0x78);
    announce(&mut selector, &table, &mut routes, 1, 0x01, Duration::ZERO);
    announce(&mut selector, &table, &mut routes, 2, 0x78, Duration::ZERO);

    selector.re_elect(&table, &mut routes, SETTLED);
    assert_eq!(selector.current(), Some(addr(2)));
}

#[test]
fn preferred_gateway_always_wins() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector =
        GatewaySelector::new(2, Some(addr(2)), 64, Duration::from_secs(1), Duration::ZERO);
    add_gateway(&mut table, 1, 250, 128);
    add_gateway(&mut table, 2, 20, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    announce(&mut selector, &table, &mut routes, 2, 128, Duration::ZERO);

    selector.re_elect(&table, &mut routes, SETTLED);
    assert_eq!(selector.current(), Some(addr(2)));
}

#[test]
fn failed_gateway_is_skipped_during_back_off() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(2);
    add_gateway(&mut table, 1, 200, 128);
    add_gateway(&mut table, 2, 150, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    announce(&mut selector, &table, &mut routes, 2, 128, Duration::ZERO);
    selector.re_elect(&table, &mut routes, SETTLED);

    selector.report_failure(&table, &mut routes, addr(1), SETTLED);
    assert_eq!(selector.current(), Some(addr(2)));

    selector.re_elect(&table, &mut routes, SETTLED + Duration::from_secs(10));
    assert_eq!(selector.current(), Some(addr(2)));

    selector.re_elect(&table, &mut routes, SETTLED + GATEWAY_FAILURE_BACKOFF);
    assert_eq!(selector.current(), Some(addr(1)));
}

#[test]
fn only_candidate_ignores_back_off() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(2);
    add_gateway(&mut table, 1, 200, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    selector.re_elect(&table, &mut routes, SETTLED);

    selector.report_failure(&table, &mut routes, addr(1), SETTLED);
    assert_eq!(selector.current(), Some(addr(1)));
}

#[test]
fn late_switch_needs_margin() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(20);
    add_gateway(&mut table, 1, 150, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    selector.re_elect(&table, &mut routes, SETTLED);
    assert_eq!(selector.current(), Some(addr(1)));

    add_gateway(&mut table, 2, 160, 128);
    announce(&mut selector, &table, &mut routes, 2, 128, SETTLED);
    selector.consider_switch(&table, &mut routes, addr(2), SETTLED);
    assert_eq!(selector.current(), Some(addr(1)));

    add_gateway(&mut table, 3, 180, 128);
    announce(&mut selector, &table, &mut routes, 3, 128, SETTLED);
    selector.consider_switch(&table, &mut routes, addr(3), SETTLED);
    assert_eq!(selector.current(), Some(addr(3)));
}

#[test]
fn class_three_switches_on_any_improvement() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(3);
    add_gateway(&mut table, 1, 150, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    selector.re_elect(&table, &mut routes, SETTLED);

    add_gateway(&mut table, 2, 151, 128);
    announce(&mut selector, &table, &mut routes, 2, 128, SETTLED);
    selector.consider_switch(&table, &mut routes, addr(2), SETTLED);
    assert_eq!(selector.current(), Some(addr(2)));
}

#[test]
fn deleted_candidates_purged_after_grace() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(2);
    add_gateway(&mut table, 1, 200, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    assert!(selector.mark_deleted(addr(1), Duration::from_secs(5)));
    assert!(!selector.mark_deleted(addr(1), Duration::from_secs(6)));

    let purge = Duration::from_secs(10);
    selector.purge(&mut routes, Duration::from_secs(25), purge);
    assert_eq!(selector.candidates().len(), 1);
    selector.purge(&mut routes, Duration::from_secs(26), purge);
    assert!(selector.candidates().is_empty());
}

#[test]
fn default_route_follows_gateway_router() {
    let mut table = OriginatorTable::new(1, 64, 10);
    let mut routes = RecordingRouteTable::default();
    let mut selector = selector(2);
    add_gateway(&mut table, 1, 200, 128);
    announce(&mut selector, &table, &mut routes, 1, 128, Duration::ZERO);
    selector.re_elect(&table, &mut routes, SETTLED);

    let windows = table.windows();
    let record = table.get_mut(addr(1)).expect("gateway record");
    let via = NeighborKey::new(addr(7), 0);
    record.neighbor_or_insert(via, windows, SETTLED).push_tq(220);
    record.router = Some(via);

    selector.refresh_route(&table, &mut routes, addr(1), SETTLED);
    assert_eq!(routes.default_route(), Some(addr(7)));
    assert_eq!(selector.current(), Some(addr(1)));
}
