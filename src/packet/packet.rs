//! Network packets
//!
//! A [`Packet`] is a shared, pooled record describing one received
//! datagram: which protocol layers it carries, the UDP endpoints it travelled
//! between, and a [`Slice`] of the buffer holding its payload. Packets are
//! filled in by the receiver while they are still unique and are read-only
//! once handed to a [`Writer`](crate::packet::Writer).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use crate::base::pool::{Pooled, Recycle};
use crate::base::Slice;
use crate::fatal;
use crate::packet::Address;

/// Set of protocol layers present in a packet
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PacketFlags(u32);

impl PacketFlags {
    /// Packet arrived over UDP and carries [`UdpMeta`]
    pub const UDP: Self = Self(1 << 0);
    /// Packet carries an RTP header
    pub const RTP: Self = Self(1 << 1);
    /// Packet carries an FEC header
    pub const FEC: Self = Self(1 << 2);
    /// Packet payload is audio
    pub const AUDIO: Self = Self(1 << 3);
    /// Packet payload is repair data
    pub const REPAIR: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PacketFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PacketFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PacketFlags, &str); 5] = [
            (PacketFlags::UDP, "UDP"),
            (PacketFlags::RTP, "RTP"),
            (PacketFlags::FEC, "FEC"),
            (PacketFlags::AUDIO, "AUDIO"),
            (PacketFlags::REPAIR, "REPAIR"),
        ];

        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{}", name));
            }
        }
        set.finish()
    }
}

/// UDP part of a packet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdpMeta {
    /// Sender address
    pub src_addr: Address,
    /// Local address the datagram was received on
    pub dst_addr: Address,
}

/// Pooled packet contents
#[derive(Debug, Default)]
pub struct PacketBody {
    flags: PacketFlags,
    udp: Option<UdpMeta>,
    data: Option<Slice>,
}

impl Recycle for PacketBody {
    fn recycle(&mut self) {
        // Releases the payload buffer as well.
        *self = Self::default();
    }
}

/// Reference-counted packet leased from a [`PacketPool`](crate::packet::PacketPool)
#[derive(Clone)]
pub struct Packet {
    inner: Arc<Pooled<PacketBody>>,
}

impl Packet {
    pub(crate) fn from_pooled(body: Pooled<PacketBody>) -> Self {
        Self {
            inner: Arc::new(body),
        }
    }

    pub fn flags(&self) -> PacketFlags {
        self.inner.flags
    }

    /// Mark protocol layers as present. Adding [`PacketFlags::UDP`] creates
    /// an empty UDP part.
    pub fn add_flags(&mut self, flags: PacketFlags) {
        let body = self.body_mut();
        body.flags |= flags;
        if flags.contains(PacketFlags::UDP) && body.udp.is_none() {
            body.udp = Some(UdpMeta::default());
        }
    }

    /// UDP part, present when the packet has [`PacketFlags::UDP`]
    pub fn udp(&self) -> Option<&UdpMeta> {
        self.inner.udp.as_ref()
    }

    pub fn udp_mut(&mut self) -> Option<&mut UdpMeta> {
        self.body_mut().udp.as_mut()
    }

    /// Payload slice
    pub fn data(&self) -> Option<&Slice> {
        self.inner.data.as_ref()
    }

    pub fn set_data(&mut self, data: Slice) {
        self.body_mut().data = Some(data);
    }

    /// Number of live handles to this packet
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn body_mut(&mut self) -> &mut PacketBody {
        match Arc::get_mut(&mut self.inner) {
            Some(body) => body,
            None => fatal!("packet: modifying shared packet"),
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("flags", &self.flags())
            .field("udp", &self.udp())
            .field("len", &self.data().map_or(0, |data| data.len()))
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BufferPool;
    use crate::packet::PacketPool;

    #[test]
    fn test_flags() {
        let flags = PacketFlags::UDP | PacketFlags::RTP;
        assert!(flags.contains(PacketFlags::UDP));
        assert!(flags.contains(PacketFlags::RTP));
        assert!(!flags.contains(PacketFlags::FEC));
        assert!(PacketFlags::empty().is_empty());
        assert_eq!(format!("{:?}", flags), "{UDP, RTP}");
    }

    #[test]
    fn test_udp_part_created_by_flag() {
        let pool = PacketPool::new(1);
        let mut packet = pool.allocate().unwrap();
        assert!(packet.udp().is_none());

        packet.add_flags(PacketFlags::UDP);
        let udp = packet.udp_mut().unwrap();
        assert!(udp.src_addr.set_ipv4("10.0.0.1", 4000));

        assert_eq!(packet.udp().unwrap().src_addr.port(), 4000);
        assert!(!packet.udp().unwrap().dst_addr.valid());
    }

    #[test]
    fn test_data_keeps_buffer_alive() {
        let buffers = BufferPool::new(16, 1);
        let packets = PacketPool::new(1);

        let buffer = buffers.allocate().unwrap();
        let mut packet = packets.allocate().unwrap();
        packet.set_data(Slice::new(buffer, 0, 10));

        assert!(buffers.allocate().is_none());
        assert_eq!(packet.data().unwrap().len(), 10);

        drop(packet);
        assert_eq!(buffers.stats().in_use, 0);
        assert_eq!(packets.stats().in_use, 0);
    }

    #[test]
    fn test_recycled_packet_is_clean() {
        let packets = PacketPool::new(1);

        let mut packet = packets.allocate().unwrap();
        packet.add_flags(PacketFlags::UDP | PacketFlags::AUDIO);
        drop(packet);

        let packet = packets.allocate().unwrap();
        assert!(packet.flags().is_empty());
        assert!(packet.udp().is_none());
        assert!(packet.data().is_none());
    }

    #[test]
    #[should_panic(expected = "modifying shared packet")]
    fn test_modify_shared_packet_is_fatal() {
        let packets = PacketPool::new(1);
        let mut packet = packets.allocate().unwrap();
        let _other = packet.clone();
        packet.add_flags(PacketFlags::UDP);
    }
}
