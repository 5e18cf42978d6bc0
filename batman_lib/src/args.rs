use clap::Parser;
use serde::Deserialize;
use std::{net::Ipv4Addr, time::Duration};

#[derive(clap::Args, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatmanParameters {
    /// Interval between own originator messages (ms)
    #[arg(long, default_value_t = 1000)]
    pub originator_interval: u64,

    /// Inactivity after which neighbors are dropped; originators go after twice this (ms)
    #[arg(long, default_value_t = 200_000)]
    pub purge_timeout: u64,

    /// Housekeeping period (ms)
    #[arg(long, default_value_t = 1000)]
    pub debug_interval: u64,

    /// Gateway client mode: 0 off, 1 fast connection, 2 stable connection, 3+ late switch margin
    #[arg(long, default_value_t = 0)]
    pub routing_class: u8,

    /// Advertised gateway bandwidth, raw class or <down>[kbit|mbit][/<up>[kbit|mbit]]
    #[arg(long, default_value = "0")]
    pub gateway_class: String,

    /// Gateway that always wins the election when present
    #[arg(long)]
    pub preferred_gateway: Option<Ipv4Addr>,

    /// Merge messages scheduled close together into one datagram
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub aggregation: bool,

    /// How long a forwarded message may wait for others to join it (ms)
    #[arg(long, default_value_t = 100)]
    pub max_aggregation_window: u64,

    /// Random delay added to own messages, half of it to forwards (ms)
    #[arg(long, default_value_t = 100)]
    pub jitter: u64,

    /// Transmission quality subtracted per hop, out of 255
    #[arg(long, default_value_t = 10)]
    pub hop_penalty: u8,

    /// Echoes of own messages needed before a link counts
    #[arg(long, default_value_t = 1)]
    pub minimum_send: u8,

    /// Messages from a neighbor needed before a link counts
    #[arg(long, default_value_t = 1)]
    pub minimum_receive: u8,

    /// Lowest adjusted transmission quality accepted as bidirectional
    #[arg(long, default_value_t = 1)]
    pub bidirect_limit: u8,

    /// Sequence numbers tracked per link
    #[arg(long, default_value_t = 64)]
    pub local_window_size: u8,

    /// Transmission quality samples averaged per neighbor
    #[arg(long, default_value_t = 10)]
    pub global_window_size: u8,

    /// Time to live of own messages on the primary interface
    #[arg(long, default_value_t = 50)]
    pub ttl: u8,

    /// Networks announced on behalf of this node, a.b.c.d/len
    #[arg(long = "announce", value_delimiter = ',')]
    pub announced_networks: Vec<String>,

    /// Seed for message jitter
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl Default for BatmanParameters {
    fn default() -> Self {
        Self {
            originator_interval: 1000,
            purge_timeout: 200_000,
            debug_interval: 1000,
            routing_class: 0,
            gateway_class: "0".to_string(),
            preferred_gateway: None,
            aggregation: true,
            max_aggregation_window: 100,
            jitter: 100,
            hop_penalty: 10,
            minimum_send: 1,
            minimum_receive: 1,
            bidirect_limit: 1,
            local_window_size: 64,
            global_window_size: 10,
            ttl: 50,
            announced_networks: Vec::new(),
            seed: 0,
        }
    }
}

impl BatmanParameters {
    pub fn originator_interval(&self) -> Duration {
        Duration::from_millis(self.originator_interval)
    }

    pub fn purge_timeout(&self) -> Duration {
        Duration::from_millis(self.purge_timeout)
    }

    pub fn debug_interval(&self) -> Duration {
        Duration::from_millis(self.debug_interval)
    }

    pub fn max_aggregation_window(&self) -> Duration {
        Duration::from_millis(self.max_aggregation_window)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct BatmanArgs {
    /// Node name used in logs
    #[arg(short, long, default_value = "batman")]
    pub name: String,

    /// Routing parameters
    #[command(flatten)]
    pub batman_params: BatmanParameters,
}
