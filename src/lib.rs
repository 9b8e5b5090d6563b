//! # roc-netio-rx
//!
//! Zero-copy UDP receive path for real-time audio streaming.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    NETWORK LOOP THREAD (netio::event_loop)              │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐     │
//! │  │ UdpReceiverPort  │   │ UdpReceiverPort  │   │ UdpReceiverPort  │     │
//! │  │ 0.0.0.0:10001    │   │ [::]:10002       │   │ 239.1.2.3:10003  │     │
//! │  └────────┬─────────┘   └────────┬─────────┘   └────────┬─────────┘     │
//! │           │ readable             │                      │               │
//! │           ▼                      ▼                      ▼               │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  1. BufferPool::allocate   (refs = 1)                           │    │
//! │  │  2. RecvBuf lent to the OS (refs = 2)                           │    │
//! │  │  3. try_recv → complete    (refs = 1, checked fatal otherwise)  │    │
//! │  │  4. PacketPool::allocate, UDP flag, src/dst, Slice(0, n)        │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! └────────────────────────────────┼────────────────────────────────────────┘
//!                                  │ Writer::write(packet)
//!                                  ▼
//!                  ┌───────────────────────────────┐
//!                  │  QueueWriter → consumer thread │
//!                  │  (payload freed on last drop)  │
//!                  └───────────────────────────────┘
//! ```

pub mod base;
pub mod config;
pub mod error;
pub mod logging;
pub mod netio;
pub mod packet;

pub use base::{Buffer, BufferPool, CrashHandler, Slice};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use netio::{NetworkLoop, UdpReceiverPort};
pub use packet::{Address, Packet, PacketPool, Writer};

/// Application-wide constants
pub mod constants {
    /// Default receive buffer capacity, enough for any Ethernet-sized datagram
    pub const DEFAULT_BUFFER_SIZE: usize = 2048;

    /// Default number of buffers in the buffer pool
    pub const DEFAULT_MAX_BUFFERS: usize = 1024;

    /// Default number of packets in the packet pool
    pub const DEFAULT_MAX_PACKETS: usize = 1024;

    /// Default number of datagrams read per readiness notification
    pub const DEFAULT_MAX_READS_PER_WAKEUP: usize = 32;
}
