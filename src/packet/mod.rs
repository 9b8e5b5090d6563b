//! Packets and the types describing where they came from

pub mod address;
pub mod packet;
pub mod pool;
pub mod writer;

pub use address::{address_to_str, ip_to_str, Address};
pub use packet::{Packet, PacketFlags, UdpMeta};
pub use pool::PacketPool;
pub use writer::{packet_queue, QueueWriter, Writer};
