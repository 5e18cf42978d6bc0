use anyhow::{Context, Result};
use batman_lib::{Batman, BatmanArgs, BatmanBuilder, BatmanParameters, Interface};
use config::Value;
use std::{collections::HashMap, net::Ipv4Addr};

use crate::sim_ports::{NodeId, SharedScheduler, SimClock, SimPort, SimRouteTable};

pub type SimBatman = Batman<SimClock, SimPort, SimRouteTable>;

pub struct SimNode {
    pub name: String,
    pub address: Ipv4Addr,
    pub batman: SimBatman,
}

/// Create a node with a single interface `eth0` from its `nodes` table entry.
///
/// The entry needs an `ip`; `broadcast` (default 255.255.255.255) and
/// `wireless` (default true) describe the interface. Every other key is a
/// routing parameter with the usual defaults. Nodes that leave `seed` unset
/// still get distinct jitter because their id is mixed in.
pub fn create_node_from_settings(
    id: NodeId,
    name: &str,
    settings: &HashMap<String, Value>,
    scheduler: SharedScheduler,
) -> Result<SimNode> {
    let address: Ipv4Addr = settings
        .get("ip")
        .with_context(|| format!("node {name} has no ip"))?
        .clone()
        .into_string()?
        .parse()?;
    let broadcast: Ipv4Addr = match settings.get("broadcast") {
        Some(val) => val.clone().into_string()?.parse()?,
        None => Ipv4Addr::BROADCAST,
    };
    let wireless = match settings.get("wireless") {
        Some(val) => val.clone().into_bool()?,
        None => true,
    };
    let batman_params: BatmanParameters = Value::from(settings.clone())
        .try_deserialize()
        .with_context(|| format!("invalid parameters for node {name}"))?;
    let seed = batman_params.seed.wrapping_add(id as u64);

    let mut interface = Interface::new(0, "eth0", address, broadcast);
    interface.wireless = wireless;

    tracing::info!(node = name, %address, %broadcast, "creating node");
    let batman = BatmanBuilder::from_args(BatmanArgs {
        name: name.to_string(),
        batman_params,
    })
    .with_seed(seed)
    .build(
        SimClock::new(id, scheduler),
        SimPort::new(vec![interface]),
        SimRouteTable::default(),
    )?;

    Ok(SimNode {
        name: name.to_string(),
        address,
        batman,
    })
}
