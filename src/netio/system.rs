//! OS-backed UDP handle
//!
//! Sockets are created with `socket2` so bind options can be set before
//! binding, then registered with the tokio reactor of the network loop
//! thread. Must be used from inside the loop's `LocalSet`.

use socket2::{Domain, MaybeUninitSlice, Protocol, SockAddr, SockRef, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use tokio::io::Interest;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::netio::handle::{BindFlags, Datagram, Membership, UdpHandle};

/// Real UDP socket driven by the network loop
#[derive(Default)]
pub struct SystemHandle {
    closing: bool,
    socket: Option<Rc<UdpSocket>>,
    reader: Option<JoinHandle<()>>,
    on_readable: Option<Rc<dyn Fn() -> bool>>,
    on_closed: Option<Box<dyn FnOnce()>>,
}

impl SystemHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called each time the socket becomes readable. Returning false stops
    /// the reader.
    pub fn on_readable(&mut self, callback: impl Fn() -> bool + 'static) {
        self.on_readable = Some(Rc::new(callback));
    }

    /// Called once the socket is released after [`close`](UdpHandle::close)
    pub fn on_closed(&mut self, callback: impl FnOnce() + 'static) {
        self.on_closed = Some(Box::new(callback));
    }

    fn socket(&self) -> io::Result<&Rc<UdpSocket>> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    fn recv(&self, buf: &mut [MaybeUninit<u8>]) -> Datagram {
        let socket = match self.socket() {
            Ok(socket) => socket,
            Err(e) => return Datagram::error(e),
        };

        let result = socket.try_io(Interest::READABLE, || {
            SockRef::from(&**socket).recv_from_vectored(&mut [MaybeUninitSlice::new(buf)])
        });

        match result {
            Ok((len, flags, src)) => Datagram::received(len, src, flags.is_truncated()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Datagram::would_block(),
            Err(e) => Datagram::error(e),
        }
    }
}

impl UdpHandle for SystemHandle {
    fn init(&mut self) -> io::Result<()> {
        // Registration needs the reactor of the loop thread.
        tokio::runtime::Handle::try_current()
            .map(|_| ())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn bind(&mut self, addr: &SockAddr, flags: BindFlags) -> io::Result<()> {
        let domain = addr.domain();
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        if domain == Domain::IPV6 {
            socket.set_only_v6(flags.ipv6_only)?;
        }
        if flags.reuse_addr {
            socket.set_reuse_address(true)?;
        }

        socket.bind(addr)?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        self.socket = Some(Rc::new(socket));

        Ok(())
    }

    fn local_addr(&self) -> io::Result<SockAddr> {
        SockRef::from(&**self.socket()?).local_addr()
    }

    fn set_membership(&mut self, group: IpAddr, op: Membership) -> io::Result<()> {
        let socket = self.socket()?;

        match (group, op) {
            (IpAddr::V4(group), Membership::Join) => {
                socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
            }
            (IpAddr::V4(group), Membership::Leave) => {
                socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
            }
            (IpAddr::V6(group), Membership::Join) => socket.join_multicast_v6(&group, 0),
            (IpAddr::V6(group), Membership::Leave) => socket.leave_multicast_v6(&group, 0),
        }
    }

    fn recv_start(&mut self) -> io::Result<()> {
        let socket = self.socket()?.clone();
        let on_readable = self
            .on_readable
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no readable callback"))?;

        self.reader = Some(tokio::task::spawn_local(async move {
            loop {
                if let Err(e) = socket.readable().await {
                    tracing::error!("udp receiver: can't wait for readiness: {}", e);
                    break;
                }
                if !on_readable() {
                    break;
                }
            }
        }));

        Ok(())
    }

    fn recv_stop(&mut self) -> io::Result<()> {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
        Ok(())
    }

    fn try_recv(&mut self, buf: &mut [MaybeUninit<u8>]) -> Datagram {
        self.recv(buf)
    }

    fn discard(&mut self) -> Datagram {
        let mut datagram = self.recv(&mut []);
        if datagram.src.is_some() {
            datagram.partial = true;
        }
        datagram
    }

    fn close(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;

        let reader = self.reader.take();
        let socket = self.socket.take();
        let on_closed = self.on_closed.take();

        if let Some(reader) = &reader {
            reader.abort();
        }

        // The reader holds the socket too; wait for it before reporting.
        tokio::task::spawn_local(async move {
            if let Some(reader) = reader {
                let _ = reader.await;
            }
            drop(socket);

            if let Some(on_closed) = on_closed {
                on_closed();
            }
        });
    }

    fn is_closing(&self) -> bool {
        self.closing
    }
}

impl Drop for SystemHandle {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
