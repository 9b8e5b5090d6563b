//! OS datagram handle abstraction
//!
//! [`UdpHandle`] is the boundary between the receiver port state machine and
//! the operating system. The port drives it with plain synchronous calls;
//! readiness and close completion are reported back to the port by whoever
//! owns it (the [`NetworkLoop`](crate::netio::NetworkLoop) for real sockets,
//! the test harness for scripted ones).

use socket2::SockAddr;
use std::io;
use std::mem::MaybeUninit;
use std::net::IpAddr;

use crate::base::buffer::BufferLease;
use crate::base::Buffer;
use crate::{fatal, fatal_if};

/// Options applied to the socket before binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindFlags {
    /// Refuse IPv4-mapped traffic on an IPv6 socket
    pub ipv6_only: bool,
    /// Allow several sockets to bind the same address
    pub reuse_addr: bool,
}

/// Multicast group membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Join,
    Leave,
}

/// Outcome of one non-blocking read
#[derive(Debug)]
pub struct Datagram {
    /// Number of bytes stored, or the OS error
    pub result: io::Result<usize>,
    /// Sender address, absent when nothing was read
    pub src: Option<SockAddr>,
    /// The datagram did not fit into the buffer and was truncated
    pub partial: bool,
}

impl Datagram {
    /// Nothing to read right now
    pub fn would_block() -> Self {
        Self {
            result: Ok(0),
            src: None,
            partial: false,
        }
    }

    pub fn error(err: io::Error) -> Self {
        Self {
            result: Err(err),
            src: None,
            partial: false,
        }
    }

    pub fn received(len: usize, src: SockAddr, partial: bool) -> Self {
        Self {
            result: Ok(len),
            src: Some(src),
            partial,
        }
    }
}

/// Non-blocking UDP handle driven by a receiver port
///
/// Calls other than [`init`](UdpHandle::init) are only made after a
/// successful `init`. [`close`](UdpHandle::close) completes asynchronously;
/// the owner reports completion through
/// [`UdpReceiverPort::on_close_complete`](crate::netio::UdpReceiverPort::on_close_complete).
pub trait UdpHandle {
    /// Prepare the handle for use
    fn init(&mut self) -> io::Result<()>;

    /// Create the socket and bind it to `addr`
    fn bind(&mut self, addr: &SockAddr, flags: BindFlags) -> io::Result<()>;

    /// Address the socket is actually bound to
    fn local_addr(&self) -> io::Result<SockAddr>;

    /// Join or leave a multicast group on the default interface
    fn set_membership(&mut self, group: IpAddr, op: Membership) -> io::Result<()>;

    /// Start delivering readiness notifications
    fn recv_start(&mut self) -> io::Result<()>;

    /// Stop delivering readiness notifications
    fn recv_stop(&mut self) -> io::Result<()>;

    /// Read one datagram into `buf` without blocking
    fn try_recv(&mut self, buf: &mut [MaybeUninit<u8>]) -> Datagram;

    /// Read and drop one datagram without storing it
    fn discard(&mut self) -> Datagram;

    /// Begin closing the handle
    fn close(&mut self);

    /// Whether [`close`](UdpHandle::close) was already called
    fn is_closing(&self) -> bool;
}

/// Receive buffer lent to the OS for the duration of one read
///
/// Holds two handles to the same buffer: the allocation and the one taken
/// for the pending read. While a `RecvBuf` exists nobody else can reach the
/// buffer.
pub struct RecvBuf {
    lease: BufferLease,
}

impl RecvBuf {
    /// Lend a freshly allocated buffer. Any other live handle to it is an
    /// invariant violation.
    pub(crate) fn new(buffer: Buffer) -> Self {
        let refs = buffer.ref_count();
        match BufferLease::new(buffer) {
            Some(lease) => Self { lease },
            None => fatal!(
                "udp receiver: unexpected buffer refcount: got {}, expected 1",
                refs
            ),
        }
    }

    /// Storage the OS writes the datagram into
    pub fn as_mut_slice(&mut self) -> &mut [MaybeUninit<u8>] {
        self.lease.storage_mut()
    }

    pub fn capacity(&self) -> usize {
        self.lease.capacity()
    }

    /// Number of live handles to the buffer
    pub fn ref_count(&self) -> usize {
        self.lease.ref_count()
    }

    /// End the read and release the pending handle.
    ///
    /// Exactly two handles must be live at this point: anything else means
    /// a handle escaped while the OS owned the storage.
    pub(crate) fn complete(self) -> Buffer {
        fatal_if!(
            self.lease.ref_count() != 2,
            "udp receiver: unexpected buffer refcount: got {}, expected 2",
            self.lease.ref_count()
        );

        let (buffer, pending) = self.lease.into_parts();
        drop(pending);
        buffer
    }
}
