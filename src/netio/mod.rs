//! Network I/O: receiver ports and the loop that drives them

pub mod event_loop;
pub mod handle;
pub mod receiver_port;
pub mod system;

#[cfg(test)]
pub(crate) mod mock;

pub use event_loop::NetworkLoop;
pub use handle::{BindFlags, Datagram, Membership, RecvBuf, UdpHandle};
pub use receiver_port::{CloseHandler, PortId, PortState, PortStats, UdpReceiverPort};
pub use system::SystemHandle;
