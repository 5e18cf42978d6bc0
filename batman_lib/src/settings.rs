//! Validated engine settings.
//!
//! [`BatmanParameters`] is what the command line or a config file says;
//! [`Settings`] is what the engine runs with. Converting one into the other
//! is the only place configuration is checked.

use crate::args::BatmanParameters;
use crate::control::gateway::GatewayClass;
use crate::error::{ConfigError, ConfigResult};
use crate::messages::HnaEntry;
use crate::ports::Address;
use std::time::Duration;

/// Upper bound for the sequence number window.
pub const MAX_LOCAL_WINDOW: usize = 255;
/// Upper bound for the averaged transmission quality samples.
pub const MAX_GLOBAL_WINDOW: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub originator_interval: Duration,
    pub purge_timeout: Duration,
    pub tick_interval: Duration,
    pub routing_class: u8,
    pub gateway_class: GatewayClass,
    pub preferred_gateway: Option<Address>,
    pub aggregation: bool,
    pub max_aggregation_window: Duration,
    pub jitter: Duration,
    pub hop_penalty: u8,
    pub minimum_send: u8,
    pub minimum_receive: u8,
    pub bidirect_limit: u8,
    pub local_window: u8,
    pub global_window: u8,
    pub ttl: u8,
    pub announced_networks: Vec<HnaEntry>,
    pub seed: u64,
}

fn positive(name: &'static str, millis: u64) -> ConfigResult<Duration> {
    if millis == 0 {
        return Err(ConfigError::InvalidTimeout { name });
    }
    Ok(Duration::from_millis(millis))
}

fn window(name: &'static str, size: u8, max: usize) -> ConfigResult<u8> {
    if size == 0 {
        return Err(ConfigError::InvalidWindowSize { name, max });
    }
    Ok(size)
}

impl TryFrom<&BatmanParameters> for Settings {
    type Error = ConfigError;

    fn try_from(params: &BatmanParameters) -> Result<Self, Self::Error> {
        let gateway_class: GatewayClass = params.gateway_class.parse()?;
        if params.routing_class > 0 && gateway_class.is_gateway() {
            return Err(ConfigError::InvalidRoutingClass {
                routing_class: params.routing_class,
                gateway_class: gateway_class.0,
            });
        }
        if params.preferred_gateway.is_some() && params.routing_class == 0 {
            return Err(ConfigError::PreferredGatewayWithoutRouting);
        }

        let announced_networks = params
            .announced_networks
            .iter()
            .map(|n| n.parse::<HnaEntry>())
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            originator_interval: positive("originator_interval", params.originator_interval)?,
            purge_timeout: positive("purge_timeout", params.purge_timeout)?,
            tick_interval: positive("debug_interval", params.debug_interval)?,
            routing_class: params.routing_class,
            gateway_class,
            preferred_gateway: params.preferred_gateway,
            aggregation: params.aggregation,
            max_aggregation_window: params.max_aggregation_window(),
            jitter: params.jitter(),
            hop_penalty: params.hop_penalty,
            minimum_send: params.minimum_send,
            minimum_receive: params.minimum_receive,
            bidirect_limit: params.bidirect_limit,
            local_window: window("local_window_size", params.local_window_size, MAX_LOCAL_WINDOW)?,
            global_window: window("global_window_size", params.global_window_size, MAX_GLOBAL_WINDOW)?,
            ttl: params.ttl,
            announced_networks,
            seed: params.seed,
        })
    }
}
