use serde::Serialize;
use thiserror::Error;

/// Errors detected while validating engine parameters. All of them are fatal:
/// an engine is never built from a configuration that fails validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    InvalidTimeout { name: &'static str },

    #[error("routing class {routing_class} cannot be combined with gateway class {gateway_class}")]
    InvalidRoutingClass { routing_class: u8, gateway_class: u8 },

    #[error("a preferred gateway requires a non-zero routing class")]
    PreferredGatewayWithoutRouting,

    #[error("{name} must be between 1 and {max}")]
    InvalidWindowSize { name: &'static str, max: usize },

    #[error("invalid announced network '{0}', expected a.b.c.d/len with len in 1..=32")]
    InvalidAnnouncedNetwork(String),

    #[error("invalid gateway class '{0}'")]
    InvalidGatewayClass(String),

    #[error("the network port reported no interfaces")]
    NoInterfaces,
}

/// Errors produced by the originator message codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short: expected at least {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("HNA count {count} does not fit in the remaining {available} bytes")]
    MalformedHna { count: usize, available: usize },
}

/// Why an incoming originator message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DropReason {
    IncompatibleVersion,
    OwnAddress,
    BroadcastSender,
    TtlExceeded,
    Malformed,
    UnknownNeighbor,
    NotBidirectional,
    Duplicate,
    OwnEcho,
    ZeroQuality,
    PrevSenderIsSelf,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DropReason::IncompatibleVersion => "incompatible version",
            DropReason::OwnAddress => "sent by ourselves",
            DropReason::BroadcastSender => "broadcast sender address",
            DropReason::TtlExceeded => "ttl exceeded",
            DropReason::Malformed => "malformed",
            DropReason::UnknownNeighbor => "sender has no route",
            DropReason::NotBidirectional => "link not bidirectional",
            DropReason::Duplicate => "duplicate",
            DropReason::OwnEcho => "echo of own message",
            DropReason::ZeroQuality => "zero transmission quality",
            DropReason::PrevSenderIsSelf => "rebroadcast of our forward",
        };
        f.write_str(text)
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type PacketResult<T> = Result<T, PacketError>;
