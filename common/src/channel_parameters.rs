use config::Value;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

/// Conditions of one simulated directed link.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChannelParameters {
    pub latency: Duration,
    /// Extra delay drawn uniformly from `0..=jitter` per datagram.
    pub jitter: Duration,
    /// Probability in `0.0..=1.0` that a datagram never arrives.
    pub loss: f64,
}

impl ChannelParameters {
    /// Loss outside `0.0..=1.0` is clamped.
    pub fn loss(&self) -> f64 {
        self.loss.clamp(0.0, 1.0)
    }
}

impl From<HashMap<String, Value>> for ChannelParameters {
    fn from(param: HashMap<String, Value>) -> Self {
        let millis = |key: &str| match param.get(key) {
            Some(val) => val.clone().into_uint().unwrap_or(0),
            None => 0,
        };
        let loss = match param.get("loss") {
            Some(val) => val.clone().into_float().unwrap_or(0.0),
            None => 0.0,
        };

        Self {
            latency: Duration::from_millis(millis("latency")),
            jitter: Duration::from_millis(millis("jitter")),
            loss,
        }
    }
}
