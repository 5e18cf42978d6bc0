use super::ogm::{Ogm, COMPAT_VERSION};
use crate::error::PacketError;

/// One record pulled out of an aggregated datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Originator(Ogm),
    /// A record from a protocol version we do not speak. Its length is
    /// unknown, so nothing after it in the datagram can be read.
    Incompatible { version: u8 },
}

/// Result of decoding a whole datagram.
#[derive(Debug, Default)]
pub struct Datagram {
    pub packets: Vec<Packet>,
    /// Set when decoding stopped early on a malformed record. Records decoded
    /// before it are kept.
    pub error: Option<PacketError>,
}

impl From<&[u8]> for Datagram {
    fn from(data: &[u8]) -> Self {
        let mut datagram = Datagram::default();
        let mut offset = 0;
        while let Some(&version) = data.get(offset) {
            if version != COMPAT_VERSION {
                datagram.packets.push(Packet::Incompatible { version });
                break;
            }
            match Ogm::try_from(&data[offset..]) {
                Ok(ogm) => {
                    offset += ogm.wire_len();
                    datagram.packets.push(Packet::Originator(ogm));
                }
                Err(e) => {
                    datagram.error = Some(e);
                    break;
                }
            }
        }
        datagram
    }
}
