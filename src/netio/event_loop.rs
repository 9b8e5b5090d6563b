//! Network event loop
//!
//! A dedicated thread runs a single-threaded tokio runtime and owns every
//! receiver port. Other threads talk to it through an event channel and
//! block on a one-shot reply, so ports never leave the loop thread:
//!
//! ```text
//!  caller thread                      loop thread ("roc-netio-rx")
//!  ─────────────                      ────────────────────────────
//!  add_udp_receiver ── AddReceiver ──► port.open() ──► reader task
//!        ▲                                  │              │
//!        └────────── bound address ◄────────┘      readable → handle_readable
//!
//!  remove_port ────── RemovePort ────► port.async_close()
//!        ▲                                  │
//!        │                           HandleClosed → on_close_complete
//!        └──────────── Ok(()) ◄──────── PortClosed → port dropped
//! ```

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio::task::LocalSet;

use crate::base::BufferPool;
use crate::config::{AppConfig, NetworkConfig};
use crate::error::NetworkError;
use crate::netio::receiver_port::{
    CloseHandler, PortCounters, PortId, PortStats, UdpReceiverPort,
};
use crate::netio::system::SystemHandle;
use crate::packet::{Address, PacketPool, Writer};

type Reply<T> = Sender<Result<T, NetworkError>>;

enum LoopEvent {
    AddReceiver {
        address: Address,
        writer: Arc<dyn Writer>,
        reply: Reply<Address>,
    },
    RemovePort {
        address: Address,
        reply: Reply<()>,
    },
    HandleClosed(PortId),
    PortClosed(PortId),
    Stop,
}

/// Bound port as seen from outside the loop thread
struct PortEntry {
    id: PortId,
    counters: Arc<PortCounters>,
}

type Registry = Arc<RwLock<HashMap<Address, PortEntry>>>;

/// Owner of the network thread and every port running on it
pub struct NetworkLoop {
    events: mpsc::UnboundedSender<LoopEvent>,
    registry: Registry,
    thread: Option<JoinHandle<()>>,
}

impl NetworkLoop {
    /// Start the loop thread. Ports draw from the given pools.
    pub fn new(
        packet_pool: PacketPool,
        buffer_pool: BufferPool,
        config: &NetworkConfig,
    ) -> Result<Self, NetworkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NetworkError::LoopSpawnFailed(e.to_string()))?;

        let (events, rx) = mpsc::unbounded_channel();
        let registry = Registry::default();

        let loop_events = events.clone();
        let loop_registry = registry.clone();
        let max_reads_per_wakeup = config.max_reads_per_wakeup;
        let reuse_multicast_address = config.reuse_multicast_address;

        let thread = thread::Builder::new()
            .name("roc-netio-rx".to_string())
            .spawn(move || {
                // Ports are thread-local; the state is built on the loop thread.
                let state = LoopState {
                    ports: HashMap::new(),
                    waiters: HashMap::new(),
                    next_id: 0,
                    stopping: false,
                    events: loop_events,
                    registry: loop_registry,
                    packet_pool,
                    buffer_pool,
                    max_reads_per_wakeup,
                    reuse_multicast_address,
                };

                let local = LocalSet::new();
                local.block_on(&runtime, state.run(rx));
                tracing::debug!("network loop: finished");
            })
            .map_err(|e| NetworkError::LoopSpawnFailed(e.to_string()))?;

        tracing::info!("network loop: started");

        Ok(Self {
            events,
            registry,
            thread: Some(thread),
        })
    }

    /// Start the loop with pools and settings from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, NetworkError> {
        Self::new(
            PacketPool::from_config(&config.pools),
            BufferPool::from_config(&config.pools),
            &config.network,
        )
    }

    /// Open a receiver port and route its packets to `writer`.
    ///
    /// Returns the address actually bound, which differs from `address`
    /// when an ephemeral port was requested. Blocks until the port is open;
    /// must not be called from a writer.
    pub fn add_udp_receiver(
        &self,
        address: Address,
        writer: Arc<dyn Writer>,
    ) -> Result<Address, NetworkError> {
        let (reply, rx) = bounded(1);

        self.events
            .send(LoopEvent::AddReceiver {
                address,
                writer,
                reply,
            })
            .map_err(|_| NetworkError::LoopStopped)?;

        rx.recv().map_err(|_| NetworkError::LoopStopped)?
    }

    /// Open a receiver for every address in `config.receivers`, all feeding
    /// the same writer
    pub fn add_configured_receivers(
        &self,
        config: &NetworkConfig,
        writer: Arc<dyn Writer>,
    ) -> Result<Vec<Address>, NetworkError> {
        config
            .receivers
            .iter()
            .map(|receiver| {
                let address: Address = receiver.parse()?;
                self.add_udp_receiver(address, writer.clone())
            })
            .collect()
    }

    /// Close the port bound to `address` and wait until it is fully closed
    pub fn remove_port(&self, address: Address) -> Result<(), NetworkError> {
        let (reply, rx) = bounded(1);

        self.events
            .send(LoopEvent::RemovePort { address, reply })
            .map_err(|_| NetworkError::LoopStopped)?;

        rx.recv().map_err(|_| NetworkError::LoopStopped)?
    }

    /// Number of open ports
    pub fn num_ports(&self) -> usize {
        self.registry.read().len()
    }

    /// Bound addresses of open ports
    pub fn ports(&self) -> Vec<Address> {
        self.registry.read().keys().copied().collect()
    }

    /// Statistics of the port bound to `address`
    pub fn port_stats(&self, address: &Address) -> Option<PortStats> {
        self.registry
            .read()
            .get(address)
            .map(|entry| entry.counters.snapshot())
    }
}

impl Drop for NetworkLoop {
    fn drop(&mut self) {
        let _ = self.events.send(LoopEvent::Stop);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("network loop: thread panicked");
            }
        }

        tracing::info!("network loop: stopped");
    }
}

/// Forwards close notifications back into the loop
struct LoopCloseHandler {
    events: mpsc::UnboundedSender<LoopEvent>,
}

impl CloseHandler for LoopCloseHandler {
    fn handle_closed(&self, port: PortId) {
        let _ = self.events.send(LoopEvent::PortClosed(port));
    }
}

type SharedPort = Rc<RefCell<UdpReceiverPort<SystemHandle>>>;

/// Everything owned by the loop thread
struct LoopState {
    ports: HashMap<PortId, SharedPort>,
    waiters: HashMap<PortId, Vec<Reply<()>>>,
    next_id: u64,
    stopping: bool,
    events: mpsc::UnboundedSender<LoopEvent>,
    registry: Registry,
    packet_pool: PacketPool,
    buffer_pool: BufferPool,
    max_reads_per_wakeup: usize,
    reuse_multicast_address: bool,
}

impl LoopState {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LoopEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                LoopEvent::AddReceiver {
                    address,
                    writer,
                    reply,
                } => {
                    let _ = reply.send(self.add_receiver(address, writer));
                }
                LoopEvent::RemovePort { address, reply } => self.remove_port(address, reply),
                LoopEvent::HandleClosed(id) => {
                    if let Some(port) = self.ports.get(&id).cloned() {
                        port.borrow_mut().on_close_complete();
                    }
                }
                LoopEvent::PortClosed(id) => self.port_closed(id),
                LoopEvent::Stop => {
                    tracing::debug!("network loop: stopping, {} port(s) open", self.ports.len());
                    self.stopping = true;
                    for port in self.ports.values() {
                        port.borrow_mut().async_close();
                    }
                }
            }

            if self.stopping && self.ports.is_empty() {
                break;
            }
        }
    }

    fn add_receiver(
        &mut self,
        address: Address,
        writer: Arc<dyn Writer>,
    ) -> Result<Address, NetworkError> {
        if self.stopping {
            return Err(NetworkError::LoopStopped);
        }

        // Multicast ports bind with address reuse, so the OS won't refuse
        // a second socket on the same address.
        if self.registry.read().contains_key(&address) {
            tracing::error!("network loop: port already open on {}", address);
            return Err(NetworkError::AddressInUse(address.to_string()));
        }

        self.next_id += 1;
        let id = PortId(self.next_id);

        let close_handler = Rc::new(LoopCloseHandler {
            events: self.events.clone(),
        });

        let port: SharedPort = Rc::new(RefCell::new(UdpReceiverPort::new(
            id,
            address,
            SystemHandle::new(),
            writer,
            self.packet_pool.clone(),
            self.buffer_pool.clone(),
            close_handler,
        )));

        {
            let mut guard = port.borrow_mut();
            guard.set_max_reads_per_wakeup(self.max_reads_per_wakeup);
            guard.set_reuse_multicast_address(self.reuse_multicast_address);

            let weak = Rc::downgrade(&port);
            guard.handle_mut().on_readable(move || match weak.upgrade() {
                Some(port) => {
                    port.borrow_mut().handle_readable();
                    true
                }
                None => false,
            });

            let events = self.events.clone();
            guard.handle_mut().on_closed(move || {
                let _ = events.send(LoopEvent::HandleClosed(id));
            });
        }

        self.ports.insert(id, port.clone());

        let mut guard = port.borrow_mut();
        match guard.open() {
            Ok(()) => {
                let bound = guard.address();
                if self.registry.read().contains_key(&bound) {
                    tracing::error!("network loop: port already open on {}", bound);
                    guard.async_close();
                    return Err(NetworkError::AddressInUse(bound.to_string()));
                }

                self.registry.write().insert(
                    bound,
                    PortEntry {
                        id,
                        counters: guard.counters(),
                    },
                );
                Ok(bound)
            }
            Err(e) => {
                tracing::error!("network loop: can't open port {}: {}", address, e);
                guard.async_close();
                Err(e)
            }
        }
    }

    fn remove_port(&mut self, address: Address, reply: Reply<()>) {
        let id = match self.registry.read().get(&address) {
            Some(entry) => entry.id,
            None => {
                let _ = reply.send(Err(NetworkError::PortNotFound(address.to_string())));
                return;
            }
        };

        tracing::debug!("network loop: removing port {}", address);

        self.waiters.entry(id).or_default().push(reply);

        if let Some(port) = self.ports.get(&id) {
            port.borrow_mut().async_close();
        }
    }

    fn port_closed(&mut self, id: PortId) {
        self.ports.remove(&id);
        self.registry.write().retain(|_, entry| entry.id != id);

        for reply in self.waiters.remove(&id).unwrap_or_default() {
            let _ = reply.send(Ok(()));
        }
    }
}
