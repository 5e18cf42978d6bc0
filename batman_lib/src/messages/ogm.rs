use super::hna::{HnaEntry, HNA_ENTRY_LEN};
use crate::error::PacketError;
use std::net::Ipv4Addr;

/// Protocol version understood by this implementation.
pub const COMPAT_VERSION: u8 = 0;
/// Fixed part of an originator message, HNA entries follow it.
pub const OGM_HEADER_LEN: usize = 19;

pub const FLAG_UNIDIRECTIONAL: u8 = 0x80;
pub const FLAG_DIRECT_LINK: u8 = 0x40;

/// Highest transmission quality value.
pub const TQ_MAX_VALUE: u8 = u8::MAX;

/// Originator message: the single protocol packet flooded by every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ogm {
    pub version: u8,
    pub flags: u8,
    pub ttl: u8,
    pub gateway_flags: u8,
    pub seqno: u16,
    pub gateway_port: u16,
    pub originator: Ipv4Addr,
    pub prev_sender: Ipv4Addr,
    pub tq: u8,
    pub hops: u8,
    pub hna: Vec<HnaEntry>,
}

impl Ogm {
    pub fn new(originator: Ipv4Addr, seqno: u16, ttl: u8) -> Self {
        Self {
            version: COMPAT_VERSION,
            flags: 0,
            ttl,
            gateway_flags: 0,
            seqno,
            gateway_port: 0,
            originator,
            prev_sender: originator,
            tq: TQ_MAX_VALUE,
            hops: 0,
            hna: Vec::new(),
        }
    }

    pub fn is_direct_link(&self) -> bool {
        self.flags & FLAG_DIRECT_LINK != 0
    }

    pub fn set_direct_link(&mut self, direct: bool) {
        if direct {
            self.flags |= FLAG_DIRECT_LINK;
        } else {
            self.flags &= !FLAG_DIRECT_LINK;
        }
    }

    /// Encoded size in bytes, used for the aggregation byte cap.
    pub fn wire_len(&self) -> usize {
        OGM_HEADER_LEN + HNA_ENTRY_LEN * self.hna.len().min(u8::MAX as usize)
    }
}

fn addr_at(value: &[u8], at: usize) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = value.get(at..at + 4)?.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

fn u16_at(value: &[u8], at: usize) -> Option<u16> {
    let bytes: [u8; 2] = value.get(at..at + 2)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}

impl TryFrom<&[u8]> for Ogm {
    type Error = PacketError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let truncated = PacketError::Truncated {
            needed: OGM_HEADER_LEN,
            available: value.len(),
        };
        let Some(header) = value.get(..OGM_HEADER_LEN) else {
            return Err(truncated);
        };
        let (Some(seqno), Some(gateway_port), Some(originator), Some(prev_sender)) = (
            u16_at(header, 4),
            u16_at(header, 6),
            addr_at(header, 8),
            addr_at(header, 12),
        ) else {
            return Err(truncated);
        };

        let count = usize::from(header[18]);
        let body = &value[OGM_HEADER_LEN..];
        if body.len() < count * HNA_ENTRY_LEN {
            return Err(PacketError::MalformedHna {
                count,
                available: body.len(),
            });
        }
        let hna = body
            .chunks_exact(HNA_ENTRY_LEN)
            .take(count)
            .map(HnaEntry::decode)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version: header[0],
            flags: header[1],
            ttl: header[2],
            gateway_flags: header[3],
            seqno,
            gateway_port,
            originator,
            prev_sender,
            tq: header[16],
            hops: header[17],
            hna,
        })
    }
}

impl From<&Ogm> for Vec<u8> {
    fn from(value: &Ogm) -> Self {
        let mut buf = Vec::with_capacity(value.wire_len());
        value.encode_into(&mut buf);
        buf
    }
}

impl Ogm {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        let hna = &self.hna[..self.hna.len().min(u8::MAX as usize)];
        buf.extend_from_slice(&[self.version, self.flags, self.ttl, self.gateway_flags]);
        buf.extend_from_slice(&self.seqno.to_be_bytes());
        buf.extend_from_slice(&self.gateway_port.to_be_bytes());
        buf.extend_from_slice(&self.originator.octets());
        buf.extend_from_slice(&self.prev_sender.octets());
        buf.extend_from_slice(&[self.tq, self.hops, hna.len() as u8]);
        hna.iter().for_each(|entry| entry.encode_into(buf));
    }
}

/// Encode an aggregated datagram: messages back to back.
pub fn encode_batch(ogms: &[Ogm]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ogms.iter().map(Ogm::wire_len).sum());
    ogms.iter().for_each(|ogm| ogm.encode_into(&mut buf));
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ogm {
        let mut ogm = Ogm::new(Ipv4Addr::new(10, 0, 0, 1), 0x1234, 50);
        ogm.gateway_flags = 33;
        ogm.gateway_port = 4306;
        ogm.prev_sender = Ipv4Addr::new(10, 0, 0, 2);
        ogm.tq = 200;
        ogm.hops = 3;
        ogm.hna = vec![HnaEntry::new(Ipv4Addr::new(192, 168, 1, 0), 24)];
        ogm
    }

    #[test]
    fn encode_layout() {
        let bytes: Vec<u8> = (&sample()).into();
        assert_eq!(bytes.len(), OGM_HEADER_LEN + HNA_ENTRY_LEN);
        assert_eq!(bytes[0], COMPAT_VERSION);
        assert_eq!(bytes[2], 50);
        assert_eq!(bytes[3], 33);
        assert_eq!(&bytes[4..6], &[0x12, 0x34]);
        assert_eq!(&bytes[8..12], &[10, 0, 0, 1]);
        assert_eq!(bytes[16], 200);
        assert_eq!(bytes[18], 1);
        assert_eq!(&bytes[19..24], &[192, 168, 1, 0, 24]);
    }

    #[test]
    fn decode_reads_fields() {
        let bytes: Vec<u8> = (&sample()).into();
        let ogm = Ogm::try_from(bytes.as_slice()).expect("decoded");
        assert_eq!(ogm.originator, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ogm.prev_sender, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(ogm.seqno, 0x1234);
        assert_eq!(ogm.gateway_port, 4306);
        assert_eq!(ogm.hops, 3);
        assert_eq!(ogm.hna.len(), 1);
    }

    #[test]
    fn decode_truncated_header() {
        let err = Ogm::try_from(&[0u8; 10][..]).unwrap_err();
        assert_eq!(
            err,
            PacketError::Truncated {
                needed: OGM_HEADER_LEN,
                available: 10
            }
        );
    }

    #[test]
    fn decode_hna_count_past_end() {
        let mut bytes: Vec<u8> = (&sample()).into();
        bytes[18] = 3;
        let err = Ogm::try_from(bytes.as_slice()).unwrap_err();
        assert_eq!(
            err,
            PacketError::MalformedHna {
                count: 3,
                available: HNA_ENTRY_LEN
            }
        );
    }

    #[test]
    fn direct_link_flag_toggles() {
        let mut ogm = sample();
        assert!(!ogm.is_direct_link());
        ogm.set_direct_link(true);
        assert!(ogm.is_direct_link());
        ogm.set_direct_link(false);
        assert!(!ogm.is_direct_link());
    }
}
