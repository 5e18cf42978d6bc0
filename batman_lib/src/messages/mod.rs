pub mod hna;
pub mod ogm;
pub mod packet;

pub use hna::HnaEntry;
pub use ogm::{encode_batch, Ogm, COMPAT_VERSION, TQ_MAX_VALUE};
pub use packet::{Datagram, Packet};
