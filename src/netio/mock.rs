//! Scripted handle for driving a receiver port without a network

use socket2::SockAddr;
use std::collections::VecDeque;
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};

use crate::netio::handle::{BindFlags, Datagram, Membership, UdpHandle};

/// Port number handed out for ephemeral binds
pub const EPHEMERAL_PORT: u16 = 40000;

/// OS call made on the handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init,
    Bind { addr: SocketAddr, flags: BindFlags },
    Join(IpAddr),
    Leave(IpAddr),
    RecvStart,
    RecvStop,
    TryRecv,
    Discard,
    Close,
}

/// What the next read returns
pub enum Incoming {
    /// Datagram with payload
    Data { bytes: Vec<u8>, src: SocketAddr },
    /// Zero-length datagram
    Empty { src: SocketAddr },
    /// OS error
    Error(io::ErrorKind),
    /// Byte count larger than the buffer the port supplied
    Oversize { len: usize, src: SocketAddr },
    /// Data without a source address
    NullSource { len: usize },
    /// Data with a source address of a non-IP family
    RawSource { bytes: Vec<u8>, src: SockAddr },
}

#[derive(Default)]
pub struct MockHandle {
    calls: Vec<Call>,
    bound: Option<SocketAddr>,
    closing: bool,

    pub inbox: VecDeque<Incoming>,
    pub bind_results: VecDeque<io::ErrorKind>,
    pub local_addr_override: Option<SockAddr>,
    pub fail_init: bool,
    pub fail_join: bool,
    pub fail_recv_start: bool,
    pub fail_recv_stop: bool,
}

impl MockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbox(inbox: impl IntoIterator<Item = Incoming>) -> Self {
        Self {
            inbox: inbox.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Calls except reads
    pub fn control_calls(&self) -> Vec<Call> {
        self.calls
            .iter()
            .filter(|call| !matches!(call, Call::TryRecv | Call::Discard))
            .cloned()
            .collect()
    }

    fn next(&mut self, buf: &mut [MaybeUninit<u8>]) -> Datagram {
        match self.inbox.pop_front() {
            None => Datagram::would_block(),
            Some(Incoming::Data { bytes, src }) => {
                let len = fill(buf, &bytes);
                Datagram::received(len, src.into(), len < bytes.len())
            }
            Some(Incoming::Empty { src }) => Datagram::received(0, src.into(), false),
            Some(Incoming::Error(kind)) => Datagram::error(io::Error::from(kind)),
            Some(Incoming::Oversize { len, src }) => Datagram::received(len, src.into(), false),
            Some(Incoming::NullSource { len }) => Datagram {
                result: Ok(len),
                src: None,
                partial: false,
            },
            Some(Incoming::RawSource { bytes, src }) => {
                let len = fill(buf, &bytes);
                Datagram::received(len, src, len < bytes.len())
            }
        }
    }
}

fn fill(buf: &mut [MaybeUninit<u8>], bytes: &[u8]) -> usize {
    for (dst, src) in buf.iter_mut().zip(bytes) {
        dst.write(*src);
    }
    bytes.len().min(buf.len())
}

fn fail(kind: io::ErrorKind) -> io::Result<()> {
    Err(io::Error::from(kind))
}

impl UdpHandle for MockHandle {
    fn init(&mut self) -> io::Result<()> {
        self.calls.push(Call::Init);
        if self.fail_init {
            return fail(io::ErrorKind::Other);
        }
        Ok(())
    }

    fn bind(&mut self, addr: &SockAddr, flags: BindFlags) -> io::Result<()> {
        let Some(mut addr) = addr.as_socket() else {
            return fail(io::ErrorKind::InvalidInput);
        };
        self.calls.push(Call::Bind { addr, flags });

        if let Some(kind) = self.bind_results.pop_front() {
            return fail(kind);
        }

        if addr.port() == 0 {
            addr.set_port(EPHEMERAL_PORT);
        }
        self.bound = Some(addr);
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SockAddr> {
        if let Some(addr) = &self.local_addr_override {
            return Ok(addr.clone());
        }
        self.bound
            .map(SockAddr::from)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    fn set_membership(&mut self, group: IpAddr, op: Membership) -> io::Result<()> {
        self.calls.push(match op {
            Membership::Join => Call::Join(group),
            Membership::Leave => Call::Leave(group),
        });
        if self.fail_join && op == Membership::Join {
            return fail(io::ErrorKind::AddrNotAvailable);
        }
        Ok(())
    }

    fn recv_start(&mut self) -> io::Result<()> {
        self.calls.push(Call::RecvStart);
        if self.fail_recv_start {
            return fail(io::ErrorKind::Other);
        }
        Ok(())
    }

    fn recv_stop(&mut self) -> io::Result<()> {
        self.calls.push(Call::RecvStop);
        if self.fail_recv_stop {
            return fail(io::ErrorKind::Other);
        }
        Ok(())
    }

    fn try_recv(&mut self, buf: &mut [MaybeUninit<u8>]) -> Datagram {
        self.calls.push(Call::TryRecv);
        self.next(buf)
    }

    fn discard(&mut self) -> Datagram {
        self.calls.push(Call::Discard);
        self.next(&mut [])
    }

    fn close(&mut self) {
        self.calls.push(Call::Close);
        self.closing = true;
    }

    fn is_closing(&self) -> bool {
        self.closing
    }
}
