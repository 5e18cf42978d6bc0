//! Several engines exchanging real datagrams over the in-memory mesh.

use batman_lib::test_helpers::{mk_test_params, Mesh};
use batman_lib::BatmanParameters;
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Fast converging parameters: short sequence window, 10 s purge timeout.
fn params() -> BatmanParameters {
    BatmanParameters {
        local_window_size: 16,
        ..mk_test_params()
    }
}

#[test]
fn line_converges_to_multihop_routes() {
    batman_lib::init_test_tracing();
    let mut mesh = Mesh::new(params(), 3).line();
    let (a, b, c) = (mesh.address(0), mesh.address(1), mesh.address(2));

    mesh.run_until(secs(30));

    assert_eq!(mesh.nodes[0].routes().next_hop(b, 32), Some(b));
    assert_eq!(mesh.nodes[0].routes().next_hop(c, 32), Some(b));
    assert_eq!(mesh.nodes[2].routes().next_hop(a, 32), Some(b));
    assert_eq!(mesh.nodes[1].routes().next_hop(a, 32), Some(a));
    assert_eq!(mesh.nodes[1].routes().next_hop(c, 32), Some(c));

    let far = mesh.nodes[0]
        .originators()
        .find(|s| s.address == c)
        .expect("c is known to a");
    assert_eq!(far.next_hop, Some(b));
    assert_eq!(far.hops, 2);
}

#[test]
fn announced_network_reaches_the_far_end() {
    batman_lib::init_test_tracing();
    let mut far_end = params();
    far_end.announced_networks = vec!["192.168.7.0/24".into()];
    let mut mesh = Mesh::with_params(vec![params(), params(), far_end]).line();
    let b = mesh.address(1);

    mesh.run_until(secs(30));

    let network = "192.168.7.0".parse().expect("address");
    assert_eq!(mesh.nodes[0].routes().next_hop(network, 24), Some(b));
}

#[test]
fn isolated_node_purges_everything() {
    batman_lib::init_test_tracing();
    let client = BatmanParameters {
        routing_class: 2,
        ..params()
    };
    let gateway = BatmanParameters {
        gateway_class: "5mbit".into(),
        ..params()
    };
    let mut mesh = Mesh::with_params(vec![client, params(), gateway]).line();
    let (b, c) = (mesh.address(1), mesh.address(2));

    mesh.run_until(secs(30));
    let node = &mesh.nodes[0];
    assert_eq!(node.routing().gateways().current(), Some(c));
    assert_eq!(node.routes().default_route(), Some(b));
    assert!(node.statistics().gateway_elections >= 1);

    mesh.unlink(0, 1);
    // twice the purge timeout plus one tick
    mesh.run_until(secs(30 + 22));
    let node = &mesh.nodes[0];
    assert!(node.routing().table().is_empty());
    assert!(node.routes().installed.is_empty());
    assert_eq!(node.routing().gateways().current(), None);
    assert_eq!(node.routing().gateways().active_candidates(), 0);

    mesh.run_until(secs(30 + 44));
    assert!(mesh.nodes[0].routing().gateways().candidates().is_empty());

    // the rest of the line still knows each other
    assert_eq!(mesh.nodes[2].routes().next_hop(b, 32), Some(b));
}
