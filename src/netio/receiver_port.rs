//! UDP receiver port
//!
//! One port per bound local address. The port owns the OS handle and turns
//! every readable datagram into a [`Packet`] without copying the payload:
//!
//! ```text
//!   readable ──► BufferPool::allocate ──► RecvBuf (2 refs) ──► try_recv
//!                                                                 │
//!        Writer::write ◄── Packet{UDP, src, dst, Slice} ◄── complete (1 ref)
//! ```
//!
//! All methods run on the thread of the event loop that owns the port, so
//! the lifecycle flags need no locking. Only the counters are shared.

use serde::Serialize;
use std::fmt;
use std::io;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::base::{BufferPool, Slice};
use crate::error::NetworkError;
use crate::fatal;
use crate::netio::handle::{BindFlags, Datagram, Membership, RecvBuf, UdpHandle};
use crate::packet::{Address, PacketFlags, PacketPool, Writer};

/// Identifier of a port within its event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives the close notification of a port
pub trait CloseHandler {
    /// Called exactly once, when the port has fully closed
    fn handle_closed(&self, port: PortId);
}

/// Port lifecycle state
///
/// [`UdpReceiverPort::open`] runs to completion under `&mut self`, so there
/// is no observable opening state: a port goes from `Created` straight to
/// `Open`, or stays `Created` when opening fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortState {
    /// Constructed, or `open()` failed part way
    Created,
    /// Receiving datagrams
    Open,
    /// Waiting for the OS handle to close
    Closing,
    /// Close notification delivered
    Closed,
}

/// Live counters of a port, readable from any thread
#[derive(Debug, Default)]
pub struct PortCounters {
    received: AtomicU64,
    bytes: AtomicU64,
    network_errors: AtomicU64,
    empty: AtomicU64,
    partial: AtomicU64,
    no_buffer: AtomicU64,
    no_packet: AtomicU64,
}

impl PortCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get statistics
    pub fn snapshot(&self) -> PortStats {
        PortStats {
            received: self.received.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            no_buffer: self.no_buffer.load(Ordering::Relaxed),
            no_packet: self.no_packet.load(Ordering::Relaxed),
        }
    }
}

/// Port statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PortStats {
    /// Packets handed to the writer
    pub received: u64,
    /// Payload bytes handed to the writer
    pub bytes: u64,
    /// Reads that failed with an OS error
    pub network_errors: u64,
    /// Zero-length datagrams
    pub empty: u64,
    /// Truncated datagrams
    pub partial: u64,
    /// Datagrams dropped because the buffer pool was exhausted
    pub no_buffer: u64,
    /// Datagrams dropped because the packet pool was exhausted
    pub no_packet: u64,
}

/// Receive side of one UDP address
pub struct UdpReceiverPort<H: UdpHandle> {
    id: PortId,
    address: Address,
    handle: H,

    writer: Arc<dyn Writer>,
    packet_pool: PacketPool,
    buffer_pool: BufferPool,
    close_handler: Rc<dyn CloseHandler>,

    handle_initialized: bool,
    multicast_joined: bool,
    recv_started: bool,
    closed: bool,

    packet_counter: u32,
    max_reads_per_wakeup: usize,
    reuse_multicast_address: bool,
    counters: Arc<PortCounters>,
}

impl<H: UdpHandle> UdpReceiverPort<H> {
    pub fn new(
        id: PortId,
        address: Address,
        handle: H,
        writer: Arc<dyn Writer>,
        packet_pool: PacketPool,
        buffer_pool: BufferPool,
        close_handler: Rc<dyn CloseHandler>,
    ) -> Self {
        Self {
            id,
            address,
            handle,
            writer,
            packet_pool,
            buffer_pool,
            close_handler,
            handle_initialized: false,
            multicast_joined: false,
            recv_started: false,
            closed: false,
            packet_counter: 0,
            max_reads_per_wakeup: crate::constants::DEFAULT_MAX_READS_PER_WAKEUP,
            reuse_multicast_address: true,
            counters: Arc::new(PortCounters::default()),
        }
    }

    /// Limit the datagrams read per readiness notification (at least one)
    pub fn set_max_reads_per_wakeup(&mut self, max_reads: usize) {
        self.max_reads_per_wakeup = max_reads.max(1);
    }

    /// Bind multicast groups with address reuse
    pub fn set_reuse_multicast_address(&mut self, reuse: bool) {
        self.reuse_multicast_address = reuse;
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    /// Configured address; after a successful `open()`, the bound one
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> PortState {
        if self.closed {
            PortState::Closed
        } else if self.handle_initialized && self.handle.is_closing() {
            PortState::Closing
        } else if self.recv_started {
            PortState::Open
        } else {
            PortState::Created
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Get statistics
    pub fn stats(&self) -> PortStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<PortCounters> {
        self.counters.clone()
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    /// Bind the socket and start receiving.
    ///
    /// On failure nothing is received; the owner still has to call
    /// [`async_close`](Self::async_close) to release what was set up.
    pub fn open(&mut self) -> Result<(), NetworkError> {
        let Some(saddr) = self.address.saddr() else {
            tracing::error!("udp receiver: can't open port with invalid address");
            return Err(NetworkError::InvalidAddress(self.address.to_string()));
        };

        if let Err(e) = self.handle.init() {
            tracing::error!("udp receiver: can't initialize handle: {}", e);
            return Err(NetworkError::InitFailed(e.to_string()));
        }
        self.handle_initialized = true;

        let reuse_addr = self.reuse_multicast_address
            && self.address.multicast()
            && self.address.port() > 0;

        self.bind(&saddr, reuse_addr)?;

        let bound = self.handle.local_addr().map_err(|e| {
            tracing::error!("udp receiver: can't read bound address: {}", e);
            NetworkError::LocalAddrFailed(e.to_string())
        })?;

        let expected = self.address.slen();
        let got = bound.len() as usize;
        if got != expected {
            tracing::error!(
                "udp receiver: unexpected bound address length: got={} expected={}",
                got,
                expected
            );
            return Err(NetworkError::AddressLengthMismatch { got, expected });
        }

        if !self.address.set_saddr(&bound) {
            tracing::error!("udp receiver: bound address is not an IP address");
            return Err(NetworkError::InvalidBoundAddress);
        }

        if self.address.multicast() {
            self.join_multicast_group()?;
        }

        if let Err(e) = self.handle.recv_start() {
            tracing::error!("udp receiver: can't start receiving: {}", e);
            return Err(NetworkError::RecvStartFailed(e.to_string()));
        }
        self.recv_started = true;

        tracing::info!("udp receiver: opened port {}", self.address);

        Ok(())
    }

    fn bind(&mut self, saddr: &socket2::SockAddr, reuse_addr: bool) -> Result<(), NetworkError> {
        let mut result = Err(io::Error::from(io::ErrorKind::InvalidInput));

        if self.address.version() == 6 {
            result = self.handle.bind(
                saddr,
                BindFlags {
                    ipv6_only: true,
                    reuse_addr,
                },
            );
        }

        let retry = matches!(
            &result,
            Err(e) if matches!(e.kind(), io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported)
        );
        if retry {
            result = self.handle.bind(
                saddr,
                BindFlags {
                    ipv6_only: false,
                    reuse_addr,
                },
            );
        }

        result.map_err(|e| {
            tracing::error!("udp receiver: can't bind {}: {}", self.address, e);
            NetworkError::BindFailed {
                address: self.address.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn join_multicast_group(&mut self) -> Result<(), NetworkError> {
        let Some(group) = self.address.ip() else {
            return Err(NetworkError::InvalidAddress(self.address.to_string()));
        };

        if let Err(e) = self.handle.set_membership(group, Membership::Join) {
            tracing::error!("udp receiver: can't join multicast group {}: {}", self.address, e);
            return Err(NetworkError::MulticastFailed {
                group: self.address.to_string(),
                reason: e.to_string(),
            });
        }

        self.multicast_joined = true;
        Ok(())
    }

    fn leave_multicast_group(&mut self) {
        if !self.multicast_joined {
            return;
        }
        self.multicast_joined = false;

        if let Some(group) = self.address.ip() {
            if let Err(e) = self.handle.set_membership(group, Membership::Leave) {
                tracing::error!(
                    "udp receiver: can't leave multicast group {}: {}",
                    self.address,
                    e
                );
            }
        }
    }

    /// Begin closing the port. Safe to call any number of times; the close
    /// handler is notified once, synchronously if the handle was never
    /// initialized, otherwise from [`on_close_complete`](Self::on_close_complete).
    pub fn async_close(&mut self) {
        if self.closed {
            return;
        }

        if !self.handle_initialized {
            self.closed = true;
            self.close_handler.handle_closed(self.id);
            return;
        }

        tracing::info!("udp receiver: closing port {}", self.address);

        if self.recv_started {
            if let Err(e) = self.handle.recv_stop() {
                tracing::error!("udp receiver: can't stop receiving: {}", e);
            }
            self.recv_started = false;
        }

        self.leave_multicast_group();

        if !self.handle.is_closing() {
            self.handle.close();
        }
    }

    /// The OS handle has finished closing
    pub fn on_close_complete(&mut self) {
        if self.closed {
            fatal!("udp receiver: close completed twice for port {}", self.id);
        }

        self.handle_initialized = false;

        tracing::info!("udp receiver: closed port {}", self.address);

        self.closed = true;
        self.close_handler.handle_closed(self.id);
    }

    /// Drain the socket after a readiness notification.
    /// Returns the number of reads attempted.
    pub fn handle_readable(&mut self) -> usize {
        let mut reads = 0;

        while reads < self.max_reads_per_wakeup && self.recv_started {
            reads += 1;
            if !self.read_one() {
                break;
            }
        }

        reads
    }

    /// Read one datagram. Returns false when the socket has nothing more.
    fn read_one(&mut self) -> bool {
        let Some(buffer) = self.buffer_pool.allocate() else {
            // Consume the datagram anyway, or readiness never clears.
            let datagram = self.handle.discard();

            if let Err(e) = &datagram.result {
                PortCounters::bump(&self.counters.network_errors);
                tracing::error!(
                    "udp receiver: network error: num={} src=none dst={} err={}",
                    self.packet_counter,
                    self.address,
                    e
                );
                return true;
            }

            let dropped = datagram.src.is_some();
            if dropped {
                PortCounters::bump(&self.counters.no_buffer);
                tracing::error!(
                    "udp receiver: can't allocate buffer, dropping datagram: dst={}",
                    self.address
                );
            }

            return dropped;
        };

        let mut recv = RecvBuf::new(buffer);
        let datagram = self.handle.try_recv(recv.as_mut_slice());

        self.complete_recv(recv, datagram)
    }

    fn complete_recv(&mut self, recv: RecvBuf, datagram: Datagram) -> bool {
        let Datagram {
            result,
            src,
            partial,
        } = datagram;

        let mut src_addr = Address::default();
        if let Some(saddr) = &src {
            if !src_addr.set_saddr(saddr) {
                tracing::error!(
                    "udp receiver: can't determine source address: num={} dst={}",
                    self.packet_counter,
                    self.address
                );
            }
        }

        let buffer = recv.complete();

        let nread = match result {
            Ok(nread) => nread,
            Err(e) => {
                PortCounters::bump(&self.counters.network_errors);
                tracing::error!(
                    "udp receiver: network error: num={} src={} dst={} err={}",
                    self.packet_counter,
                    src_addr,
                    self.address,
                    e
                );
                return true;
            }
        };

        if nread == 0 {
            if src.is_none() {
                // no more data for now
                return false;
            }
            PortCounters::bump(&self.counters.empty);
            tracing::trace!(
                "udp receiver: empty packet: num={} src={} dst={}",
                self.packet_counter,
                src_addr,
                self.address
            );
            return true;
        }

        if src.is_none() {
            fatal!("udp receiver: unexpected null source address");
        }

        if partial {
            PortCounters::bump(&self.counters.partial);
            tracing::debug!(
                "udp receiver: ignoring partial read: num={} src={} dst={} nread={}",
                self.packet_counter,
                src_addr,
                self.address,
                nread
            );
            return true;
        }

        self.packet_counter = self.packet_counter.wrapping_add(1);

        tracing::trace!(
            "udp receiver: received packet: num={} src={} dst={} nread={}",
            self.packet_counter,
            src_addr,
            self.address,
            nread
        );

        if nread > buffer.capacity() {
            fatal!(
                "udp receiver: unexpected buffer size: got {}, max {}",
                nread,
                buffer.capacity()
            );
        }

        let Some(mut packet) = self.packet_pool.allocate() else {
            PortCounters::bump(&self.counters.no_packet);
            tracing::error!("udp receiver: can't allocate packet");
            return true;
        };

        packet.add_flags(PacketFlags::UDP);
        if let Some(udp) = packet.udp_mut() {
            udp.src_addr = src_addr;
            udp.dst_addr = self.address;
        }
        packet.set_data(Slice::new(buffer, 0, nread));

        PortCounters::bump(&self.counters.received);
        self.counters
            .bytes
            .fetch_add(nread as u64, Ordering::Relaxed);

        self.writer.write(packet);

        true
    }
}

impl<H: UdpHandle> Drop for UdpReceiverPort<H> {
    fn drop(&mut self) {
        // Already unwinding from another failure.
        if std::thread::panicking() {
            return;
        }

        if self.handle_initialized {
            fatal!("udp receiver: receiver was not fully closed before calling destructor");
        }
    }
}

impl<H: UdpHandle> fmt::Debug for UdpReceiverPort<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpReceiverPort")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
