//! Topology configuration parsing for the simulator.
//!
//! The configuration file has two tables. `nodes` maps a node name to its
//! address and routing parameters; `topology` maps a sending node to the
//! nodes that hear it, each with the channel parameters (latency, jitter,
//! packet loss) of that directed link.

use anyhow::Result;
use common::channel_parameters::ChannelParameters;
use config::{Config, Value};
use std::collections::HashMap;

/// Parsed topology configuration containing node definitions and connections.
pub struct TopologyConfig {
    /// Node definitions: node_name -> config parameters
    pub nodes: HashMap<String, HashMap<String, Value>>,
    /// Topology connections: from_node -> to_node -> channel parameters
    pub connections: HashMap<String, HashMap<String, ChannelParameters>>,
}

impl TopologyConfig {
    /// Parse topology from a YAML or TOML configuration file.
    pub fn from_file(config_file: &str) -> Result<Self> {
        Self::from_config(&Self::load_config(config_file)?)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let nodes = Self::parse_nodes(config)?;
        let connections = Self::parse_topology_connections(config)?;

        Ok(Self { nodes, connections })
    }

    fn load_config(config_file: &str) -> Result<Config> {
        Config::builder()
            .add_source(config::File::with_name(config_file))
            .build()
            .map_err(Into::into)
    }

    /// Entries of the "nodes" table that are tables themselves:
    /// node_name -> { ip: "10.0.0.1", routing_class: 2, ... }
    fn parse_nodes(config: &Config) -> Result<HashMap<String, HashMap<String, Value>>> {
        let nodes = config
            .get_table("nodes")?
            .iter()
            .filter_map(|(key, val)| {
                val.clone()
                    .into_table()
                    .ok()
                    .map(|table| (key.clone(), table))
            })
            .collect();
        Ok(nodes)
    }

    /// from_node -> to_node -> { latency: 10, jitter: 5, loss: 0.01 }
    fn parse_topology_connections(
        config: &Config,
    ) -> Result<HashMap<String, HashMap<String, ChannelParameters>>> {
        let topology = config
            .get_table("topology")?
            .iter()
            .filter_map(|(key, val)| {
                val.clone().into_table().ok().map(|v| {
                    (
                        key.clone(),
                        v.iter()
                            .map(|(onode, param)| {
                                let param = param.clone().into_table().unwrap_or_default();
                                let param = ChannelParameters::from(param);
                                (onode.clone(), param)
                            })
                            .collect(),
                    )
                })
            })
            .collect();
        Ok(topology)
    }
}
