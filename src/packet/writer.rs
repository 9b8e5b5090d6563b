//! Packet sinks
//!
//! The receiver hands every accepted packet to a [`Writer`]. Writers are
//! called on the network thread, so they must not block; [`QueueWriter`]
//! is the usual way to move packets to a consumer thread.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::packet::Packet;

/// Consumer of received packets
pub trait Writer: Send + Sync {
    /// Take ownership of a packet. Must not block.
    fn write(&self, packet: Packet);
}

impl<F> Writer for F
where
    F: Fn(Packet) + Send + Sync,
{
    fn write(&self, packet: Packet) {
        self(packet)
    }
}

/// Writer that forwards packets into a bounded channel, dropping them when
/// the consumer falls behind
pub struct QueueWriter {
    tx: Sender<Packet>,
    dropped: AtomicU64,
}

impl QueueWriter {
    /// Packets dropped because the queue was full or the consumer had gone
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Writer for QueueWriter {
    fn write(&self, packet: Packet) {
        match self.tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("packet queue: full, dropping packet");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("packet queue: consumer gone, dropping packet");
            }
        }
    }
}

/// Create a bounded packet queue and the writer feeding it
pub fn packet_queue(capacity: usize) -> (QueueWriter, Receiver<Packet>) {
    let (tx, rx) = bounded(capacity);
    (
        QueueWriter {
            tx,
            dropped: AtomicU64::new(0),
        },
        rx,
    )
}
