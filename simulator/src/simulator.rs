use anyhow::{bail, Result};
use batman_lib::Address;
use common::{
    channel_parameters::ChannelParameters,
    stats::{AtomicStats, Stats},
};
use itertools::Itertools;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{collections::HashMap, time::Duration};

use crate::node_factory::{create_node_from_settings, SimNode};
use crate::sim_ports::{EventKind, NodeId, SharedScheduler};
use crate::topology::TopologyConfig;

/// Directed link from one node to a node that hears it.
pub struct Channel {
    pub to: NodeId,
    pub parameters: ChannelParameters,
    stats: AtomicStats,
}

impl Channel {
    fn new(to: NodeId, parameters: ChannelParameters) -> Self {
        Self {
            to,
            parameters,
            stats: AtomicStats::new(),
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }
}

pub struct Simulator {
    nodes: Vec<SimNode>,
    /// Outgoing channels per node.
    channels: Vec<Vec<Channel>>,
    scheduler: SharedScheduler,
    rng: StdRng,
}

impl Simulator {
    /// Nodes are numbered in name order so a run only depends on the
    /// configuration and the seed.
    pub fn new(topology: &TopologyConfig, seed: u64) -> Result<Self> {
        let scheduler = SharedScheduler::default();
        let nodes = topology
            .nodes
            .iter()
            .sorted_by(|a, b| a.0.cmp(b.0))
            .enumerate()
            .map(|(id, (name, settings))| {
                create_node_from_settings(id, name, settings, scheduler.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        let ids: HashMap<&str, NodeId> = nodes
            .iter()
            .enumerate()
            .map(|(id, node)| (node.name.as_str(), id))
            .collect();
        let mut channels: Vec<Vec<Channel>> = nodes.iter().map(|_| Vec::new()).collect();
        for (from, connections) in topology.connections.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            let Some(&from_id) = ids.get(from.as_str()) else {
                bail!("topology refers to unknown node {from}");
            };
            for (to, parameters) in connections.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
                let Some(&to_id) = ids.get(to.as_str()) else {
                    bail!("topology refers to unknown node {to}");
                };
                tracing::info!(%from, %to, ?parameters, "created channel");
                channels[from_id].push(Channel::new(to_id, *parameters));
            }
        }

        Ok(Self {
            nodes,
            channels,
            scheduler,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [SimNode] {
        &mut self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&SimNode> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn now(&self) -> Duration {
        self.scheduler.borrow().now()
    }

    /// Run every event due up to `until` of simulated time.
    pub fn run(&mut self, until: Duration) {
        loop {
            let Some(event) = self.scheduler.borrow_mut().pop(until) else {
                break;
            };
            let node = event.node;
            match event.kind {
                EventKind::Timer { timer, .. } => self.nodes[node].batman.handle_timer(timer),
                EventKind::Deliver { from, link, bytes } => {
                    self.channels[from][link].stats.record_delivery(bytes.len());
                    let source = self.nodes[from].address;
                    self.nodes[node].batman.receive(source, 0, &bytes);
                }
            }
            self.transmit(node);
        }
        self.scheduler.borrow_mut().advance_to(until);
    }

    /// Put everything `from` sent on the channels that reach its receivers.
    fn transmit(&mut self, from: NodeId) {
        let outgoing = self.nodes[from].batman.port_mut().take_outbox();
        let mut scheduler = self.scheduler.borrow_mut();
        let now = scheduler.now();
        for datagram in outgoing {
            for (link, channel) in self.channels[from].iter().enumerate() {
                let receiver: Address = self.nodes[channel.to].address;
                if !datagram.broadcast && datagram.destination != receiver {
                    continue;
                }
                channel.stats.record_transmit(datagram.bytes.len());
                if self.rng.gen::<f64>() < channel.parameters.loss() {
                    channel.stats.record_loss();
                    tracing::trace!(from, to = channel.to, "datagram lost");
                    continue;
                }
                let jitter = if channel.parameters.jitter.is_zero() {
                    Duration::ZERO
                } else {
                    self.rng.gen_range(Duration::ZERO..=channel.parameters.jitter)
                };
                scheduler.push(
                    now + channel.parameters.latency + jitter,
                    channel.to,
                    EventKind::Deliver {
                        from,
                        link,
                        bytes: datagram.bytes.clone(),
                    },
                );
            }
        }
    }

    /// Log every node's routing view and the traffic on each channel.
    pub fn report(&self) -> Result<()> {
        for node in &self.nodes {
            let batman = &node.batman;
            tracing::info!(
                node = %node.name,
                address = %node.address,
                gateway = ?batman.routing().gateways().current(),
                routes = batman.routes().len(),
                statistics = %serde_json::to_string(batman.statistics())?,
                "node"
            );
            for summary in batman.originators() {
                tracing::info!(
                    node = %node.name,
                    originator = %summary.address,
                    next_hop = ?summary.next_hop,
                    tq = summary.tq,
                    hops = summary.hops,
                    last_seen = ?summary.last_seen,
                    "originator"
                );
            }
        }
        for (from, channels) in self.channels.iter().enumerate() {
            for channel in channels {
                let stats = channel.stats();
                tracing::info!(
                    from = %self.nodes[from].name,
                    to = %self.nodes[channel.to].name,
                    transmitted = stats.transmitted_datagrams,
                    bytes = stats.transmitted_bytes,
                    delivered = stats.delivered_datagrams,
                    lost = stats.lost_datagrams,
                    "channel"
                );
            }
        }
        Ok(())
    }

    /// Traffic counters of the channel `from` -> `to`, by node name.
    pub fn channel_stats(&self, from: &str, to: &str) -> Option<Stats> {
        let from = self.nodes.iter().position(|node| node.name == from)?;
        self.channels[from]
            .iter()
            .find(|channel| self.nodes[channel.to].name == to)
            .map(Channel::stats)
    }
}

#[cfg(test)]
#[path = "simulator_tests.rs"]
mod simulator_tests;
