use crate::args::{BatmanArgs, BatmanParameters};
use crate::control::Batman;
use crate::error::ConfigResult;
use crate::ports::{Address, Clock, NetworkPort, RouteTable};
use crate::settings::Settings;

/// Builder for constructing Batman engines with flexible configuration
///
/// # Examples
///
/// ```no_run
/// use batman_lib::builder::BatmanBuilder;
/// # use batman_lib::ports::{Clock, NetworkPort, RouteTable};
///
/// # fn example<C: Clock, N: NetworkPort, R: RouteTable>(clock: C, port: N, routes: R)
/// # -> Result<(), batman_lib::ConfigError> {
/// let _batman = BatmanBuilder::new("node-a")
///     .with_routing_class(2)
///     .with_announced_network("192.168.10.0/24")
///     .with_aggregation(false)
///     .build(clock, port, routes)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct BatmanBuilder {
    name: String,
    params: BatmanParameters,
}

impl Default for BatmanBuilder {
    fn default() -> Self {
        Self::new("batman")
    }
}

impl BatmanBuilder {
    /// Create a new BatmanBuilder with default parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BatmanParameters::default(),
        }
    }

    /// Create builder from existing BatmanArgs
    pub fn from_args(args: BatmanArgs) -> Self {
        Self {
            name: args.name,
            params: args.batman_params,
        }
    }

    /// Create builder from parameters alone (name stays the default)
    pub fn from_params(params: BatmanParameters) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Set the originator interval in milliseconds (default: 1000)
    pub fn with_originator_interval(mut self, millis: u64) -> Self {
        self.params.originator_interval = millis;
        self
    }

    /// Set the purge timeout in milliseconds (default: 200000)
    pub fn with_purge_timeout(mut self, millis: u64) -> Self {
        self.params.purge_timeout = millis;
        self
    }

    /// Set the housekeeping interval in milliseconds (default: 1000)
    pub fn with_debug_interval(mut self, millis: u64) -> Self {
        self.params.debug_interval = millis;
        self
    }

    /// Set the gateway client mode (default: 0, off)
    pub fn with_routing_class(mut self, class: u8) -> Self {
        self.params.routing_class = class;
        self
    }

    /// Advertise gateway bandwidth, e.g. "5mbit/1mbit" (default: "0")
    pub fn with_gateway_class(mut self, class: impl Into<String>) -> Self {
        self.params.gateway_class = class.into();
        self
    }

    pub fn with_preferred_gateway(mut self, gateway: Address) -> Self {
        self.params.preferred_gateway = Some(gateway);
        self
    }

    /// Enable or disable aggregation (default: true)
    pub fn with_aggregation(mut self, enabled: bool) -> Self {
        self.params.aggregation = enabled;
        self
    }

    pub fn with_max_aggregation_window(mut self, millis: u64) -> Self {
        self.params.max_aggregation_window = millis;
        self
    }

    /// Set the jitter in milliseconds (default: 100)
    pub fn with_jitter(mut self, millis: u64) -> Self {
        self.params.jitter = millis;
        self
    }

    pub fn with_hop_penalty(mut self, penalty: u8) -> Self {
        self.params.hop_penalty = penalty;
        self
    }

    pub fn with_minimum_send(mut self, count: u8) -> Self {
        self.params.minimum_send = count;
        self
    }

    pub fn with_minimum_receive(mut self, count: u8) -> Self {
        self.params.minimum_receive = count;
        self
    }

    pub fn with_bidirect_limit(mut self, limit: u8) -> Self {
        self.params.bidirect_limit = limit;
        self
    }

    /// Set the sequence number window (default: 64)
    pub fn with_local_window_size(mut self, size: u8) -> Self {
        self.params.local_window_size = size;
        self
    }

    /// Set the number of averaged quality samples (default: 10)
    pub fn with_global_window_size(mut self, size: u8) -> Self {
        self.params.global_window_size = size;
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.params.ttl = ttl;
        self
    }

    /// Announce a network, a.b.c.d/len; checked on build
    pub fn with_announced_network(mut self, network: impl Into<String>) -> Self {
        self.params.announced_networks.push(network.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.seed = seed;
        self
    }

    /// Build the engine
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a parameter fails validation
    /// - the network port reports no interfaces
    pub fn build<C: Clock, N: NetworkPort, R: RouteTable>(
        self,
        clock: C,
        port: N,
        routes: R,
    ) -> ConfigResult<Batman<C, N, R>> {
        let settings = Settings::try_from(&self.params)?;
        tracing::debug!(name = %self.name, ?settings, "building batman engine");
        Batman::new(settings, clock, port, routes)
    }

    /// Convert builder to BatmanArgs
    pub fn to_args(&self) -> BatmanArgs {
        BatmanArgs {
            name: self.name.clone(),
            batman_params: self.params.clone(),
        }
    }
}
