use crate::error::{ConfigError, PacketError};
use serde::{Deserialize, Serialize};
use std::{fmt, net::Ipv4Addr, str::FromStr};

/// Bytes taken by one announced network on the wire.
pub const HNA_ENTRY_LEN: usize = 5;

/// A network announced by an originator (host network announcement).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HnaEntry {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

impl HnaEntry {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }

    /// Entries with a prefix length outside 1..=32 travel on the wire but are
    /// never turned into routes.
    pub fn is_valid(&self) -> bool {
        (1..=32).contains(&self.prefix_len)
    }

    /// The announced address with host bits cleared.
    pub fn network(&self) -> Ipv4Addr {
        if !self.is_valid() {
            return self.address;
        }
        let mask = u32::MAX << (32 - u32::from(self.prefix_len));
        Ipv4Addr::from(u32::from(self.address) & mask)
    }

    pub(crate) fn decode(value: &[u8]) -> Result<Self, PacketError> {
        let (Some(address), Some(prefix_len)) = (value.get(..4), value.get(4)) else {
            return Err(PacketError::Truncated {
                needed: HNA_ENTRY_LEN,
                available: value.len(),
            });
        };
        let address: [u8; 4] = address.try_into().map_err(|_| PacketError::Truncated {
            needed: HNA_ENTRY_LEN,
            available: value.len(),
        })?;
        Ok(Self::new(Ipv4Addr::from(address), *prefix_len))
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.address.octets());
        buf.push(self.prefix_len);
    }
}

impl fmt::Display for HnaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for HnaEntry {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAnnouncedNetwork(s.to_string());
        let (address, prefix_len) = s.trim().split_once('/').ok_or_else(invalid)?;
        let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
        let prefix_len: u8 = prefix_len.parse().map_err(|_| invalid())?;
        let entry = Self::new(address, prefix_len);
        if !entry.is_valid() {
            return Err(invalid());
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_announced_network() {
        let entry: HnaEntry = "10.0.0.0/24".parse().expect("valid entry");
        assert_eq!(entry.address, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(entry.prefix_len, 24);
        assert_eq!(entry.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn parse_rejects_bad_prefix_length() {
        assert!("10.0.0.0/0".parse::<HnaEntry>().is_err());
        assert!("10.0.0.0/33".parse::<HnaEntry>().is_err());
        assert!("10.0.0.0".parse::<HnaEntry>().is_err());
        assert!("ten/8".parse::<HnaEntry>().is_err());
    }

    #[test]
    fn network_clears_host_bits() {
        let entry = HnaEntry::new(Ipv4Addr::new(192, 168, 7, 77), 16);
        assert_eq!(entry.network(), Ipv4Addr::new(192, 168, 0, 0));
    }

    #[test]
    fn decode_needs_five_bytes() {
        assert!(HnaEntry::decode(&[10, 0, 0, 0]).is_err());
        let entry = HnaEntry::decode(&[10, 0, 0, 0, 8]).expect("decoded");
        assert_eq!(entry, HnaEntry::new(Ipv4Addr::new(10, 0, 0, 0), 8));
    }
}
