pub mod channel_parameters;
pub mod stats;
