pub mod args;
pub use args::{BatmanArgs, BatmanParameters};

pub mod builder;
pub mod control;
pub mod error;
pub mod messages;
pub mod metrics;
pub mod ports;
pub mod settings;

pub use builder::BatmanBuilder;
pub use control::{Batman, OriginatorSummary};
pub use error::{ConfigError, ConfigResult, DropReason, PacketError};
pub use metrics::Statistics;
pub use ports::{Address, Clock, Interface, NetworkPort, RouteTable, Timer, TimerHandle};
pub use settings::Settings;

// Mocks for the host collaborators. Downstream crates enable the
// `test_helpers` feature to drive engines without a real network.
#[cfg(any(test, feature = "test_helpers"))]
pub mod test_helpers;

/// Initialize a tracing subscriber for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    use std::sync::Once;
    static START: Once = Once::new();
    START.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
