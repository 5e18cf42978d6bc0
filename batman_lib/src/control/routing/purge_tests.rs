//! Purge Tests
//!
//! Timeouts of individual neighbors, whole originators and the gateway
//! candidates they leave behind.

use super::super::routing::{OgmReceipt, Routing};
use crate::control::originator::NeighborKey;
use crate::messages::{HnaEntry, Ogm};
use crate::ports::Address;
use crate::settings::Settings;
use crate::test_helpers::{addr, mk_ogm, mk_test_params, mk_test_settings, RecordingRouteTable};
use std::{net::Ipv4Addr, time::Duration};

const PURGE: Duration = Duration::from_secs(10);

fn deliver(routing: &mut Routing, routes: &mut RecordingRouteTable, ogm: &Ogm, sender: Address, now: Duration) {
    let is_duplicate = routing.count_real_packets(ogm, sender, 0, now);
    let receipt = OgmReceipt {
        ogm,
        sender,
        interface: 0,
        is_duplicate,
    };
    routing.update_from_packet(routes, &receipt, now);
}

#[test]
fn stale_router_is_replaced_by_remaining_neighbor() {
    let mut routing = Routing::new(&mk_test_settings(), 1, Duration::ZERO);
    let mut routes = RecordingRouteTable::default();
    let (origin, a, b) = (addr(9), addr(1), addr(2));

    deliver(&mut routing, &mut routes, &mk_ogm(origin, 1, 200, 10), a, Duration::ZERO);
    deliver(&mut routing, &mut routes, &mk_ogm(origin, 1, 100, 10), b, Duration::from_secs(8));
    assert_eq!(routes.next_hop(origin, 32), Some(a));

    routing.purge(&mut routes, Duration::from_secs(11));

    let record = routing.table().get(origin).expect("originator still fresh");
    assert_eq!(record.neighbors.len(), 1);
    assert_eq!(record.router, Some(NeighborKey::new(b, 0)));
    assert_eq!(routes.next_hop(origin, 32), Some(b));
}

#[test]
fn fresh_neighbors_survive_purge() {
    let mut routing = Routing::new(&mk_test_settings(), 1, Duration::ZERO);
    let mut routes = RecordingRouteTable::default();
    deliver(&mut routing, &mut routes, &mk_ogm(addr(9), 1, 200, 10), addr(1), Duration::ZERO);
    routes.clear_calls();

    routing.purge(&mut routes, PURGE);
    assert_eq!(routing.table().len(), 1);
    assert!(routes.calls.is_empty());
}

#[test]
fn silent_originator_is_removed_with_its_routes() {
    let mut routing = Routing::new(&mk_test_settings(), 1, Duration::ZERO);
    let mut routes = RecordingRouteTable::default();
    let network = HnaEntry::new(Ipv4Addr::new(172, 16, 0, 0), 16);
    let mut ogm = mk_ogm(addr(9), 1, 200, 10);
    ogm.hna = vec![network];
    deliver(&mut routing, &mut routes, &ogm, addr(1), Duration::ZERO);
    assert_eq!(routes.installed.len(), 2);

    routing.purge(&mut routes, 2 * PURGE + Duration::from_millis(1));

    assert!(routing.table().is_empty());
    assert!(routes.installed.is_empty());
    assert_eq!(routing.hna().winner(&network), None);
}

#[test]
fn purged_gateway_leaves_candidate_list_after_grace() {
    let params = crate::args::BatmanParameters {
        routing_class: 2,
        ..mk_test_params()
    };
    let settings = Settings::try_from(&params).expect("valid");
    let mut routing = Routing::new(&settings, 1, Duration::ZERO);
    let mut routes = RecordingRouteTable::default();
    let mut ogm = mk_ogm(addr(9), 1, 200, 10);
    ogm.gateway_flags = 128;
    deliver(&mut routing, &mut routes, &ogm, addr(1), Duration::ZERO);
    assert_eq!(routing.gateways().active_candidates(), 1);

    let gone = 2 * PURGE + Duration::from_millis(1);
    routing.purge(&mut routes, gone);
    assert_eq!(routing.gateways().active_candidates(), 0);
    assert_eq!(routing.gateways().candidates().len(), 1);

    routing.purge(&mut routes, gone + 2 * PURGE + Duration::from_millis(1));
    assert!(routing.gateways().candidates().is_empty());
}

#[test]
fn purged_gateway_drops_default_route() {
    let params = crate::args::BatmanParameters {
        routing_class: 2,
        ..mk_test_params()
    };
    let settings = Settings::try_from(&params).expect("valid");
    let mut routing = Routing::new(&settings, 1, Duration::ZERO);
    let mut routes = RecordingRouteTable::default();

    let settled = Duration::from_secs(64);
    let mut ogm = mk_ogm(addr(9), 1, 200, 10);
    ogm.gateway_flags = 128;
    deliver(&mut routing, &mut routes, &ogm, addr(1), settled);
    routing.elect_gateway(&mut routes, settled);
    assert_eq!(routes.default_route(), Some(addr(1)));

    routing.purge(&mut routes, settled + 2 * PURGE + Duration::from_millis(1));
    assert_eq!(routes.default_route(), None);
    assert_eq!(routing.gateways().current(), None);
}

#[test]
fn withdraw_all_clears_routes() {
    let mut routing = Routing::new(&mk_test_settings(), 1, Duration::ZERO);
    let mut routes = RecordingRouteTable::default();
    deliver(&mut routing, &mut routes, &mk_ogm(addr(9), 1, 200, 10), addr(1), Duration::ZERO);
    deliver(&mut routing, &mut routes, &mk_ogm(addr(1), 1, 200, 10), addr(1), Duration::ZERO);

    routing.withdraw_all(&mut routes);
    assert!(routes.installed.is_empty());
    assert!(routing.table().is_empty());
}
