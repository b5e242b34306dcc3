//! # Server Endpoint
//!
//! One bound UDP socket serving any number of peers. Two workers:
//!
//! - `hudp-receiver` decodes datagrams. Reliable packets go through the
//!   [`ReliableReceiver`] and are ACKed to their source address; unreliable
//!   packets are handed to the [`UnreliableQueue`].
//! - `hudp-gap-skip` runs the receiver's gap scan on a short fixed period.
//!
//! The application polls [`HudpServer::receive_reliable`] and
//! [`HudpServer::receive_unreliable`]; neither blocks.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use quanta::Instant;
use tracing::{debug, info, warn};

use hudp_transport::queue::{UnreliableEntry, UnreliableQueue};
use hudp_transport::receiver::{Delivered, ReliableReceiver};
use hudp_transport::stats::{EventSink, ReceiverStats, TransportEvent};
use hudp_transport::wire::{ChannelType, Datagram, Packet};

use crate::config::ProtocolConfig;
use crate::{forward_events, is_poll_timeout};

pub struct HudpServer {
    socket: Arc<UdpSocket>,
    receiver: Arc<Mutex<ReliableReceiver>>,
    unreliable: UnreliableQueue,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    shutdown_grace: Duration,
    thread_handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl HudpServer {
    pub fn bind(
        addr: impl ToSocketAddrs,
        config: &ProtocolConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Self::from_socket(socket, config, sink)
    }

    /// Serve on an already-bound socket.
    pub fn from_socket(
        socket: UdpSocket,
        config: &ProtocolConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        socket.set_read_timeout(Some(config.socket.poll_timeout))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let receiver = Arc::new(Mutex::new(ReliableReceiver::new(
            config.receiver.receiver.clone(),
        )));
        let unreliable = UnreliableQueue::new();
        let running = Arc::new(AtomicBool::new(true));

        let server = Self {
            socket: socket.clone(),
            receiver: receiver.clone(),
            unreliable: unreliable.clone(),
            sink: sink.clone(),
            running: running.clone(),
            shutdown_grace: config.socket.shutdown_grace,
            thread_handles: Mutex::new(Vec::new()),
        };

        let recv_handle = {
            let receiver = receiver.clone();
            let sink = sink.clone();
            let running = running.clone();
            let max_datagram = config.socket.max_datagram;
            thread::Builder::new()
                .name("hudp-receiver".into())
                .spawn(move || {
                    receive_loop(socket, receiver, unreliable, sink, running, max_datagram)
                })?
        };
        server.push_handle(recv_handle);

        let gap_handle = {
            let interval = config.receiver.gap_check_interval;
            thread::Builder::new()
                .name("hudp-gap-skip".into())
                .spawn(move || gap_skip_loop(receiver, sink, running, interval))?
        };
        server.push_handle(gap_handle);

        info!(%local_addr, "server bound");
        Ok(server)
    }

    /// Next in-order reliable payload, if one is ready.
    pub fn receive_reliable(&self) -> Option<Delivered> {
        let (delivered, events) = {
            let mut rx = self.lock_receiver();
            let delivered = rx.receive();
            (delivered, rx.drain_events().collect::<Vec<_>>())
        };
        forward_events(self.sink.as_ref(), events);
        if let Some(d) = &delivered {
            debug!(seq = d.sequence, "delivered reliable packet");
        }
        delivered
    }

    /// Oldest unreliable arrival, if any.
    pub fn receive_unreliable(&self) -> Option<UnreliableEntry> {
        let entry = self.unreliable.pop()?;
        self.sink.record(&TransportEvent::PacketDelivered {
            channel: ChannelType::Unreliable,
            sequence: entry.sequence,
        });
        Some(entry)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn jitter_ms(&self) -> f64 {
        self.lock_receiver().jitter_ms()
    }

    /// Reliable delivery cursor.
    pub fn next_expected(&self) -> u64 {
        self.lock_receiver().next_expected()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.lock_receiver().stats().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Worker threads started and not yet joined.
    pub fn worker_count(&self) -> usize {
        self.thread_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Stop the workers, wait out the grace period, then join. Idempotent.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        info!("server shutting down");
        thread::sleep(self.shutdown_grace);
        let mut handles = self
            .thread_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn lock_receiver(&self) -> std::sync::MutexGuard<'_, ReliableReceiver> {
        self.receiver.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_handle(&self, handle: thread::JoinHandle<()>) {
        self.thread_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

impl Drop for HudpServer {
    fn drop(&mut self) {
        self.close();
    }
}

// ─── Workers ────────────────────────────────────────────────────────────────

fn receive_loop(
    socket: Arc<UdpSocket>,
    receiver: Arc<Mutex<ReliableReceiver>>,
    unreliable: UnreliableQueue,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    max_datagram: usize,
) {
    let mut buf = vec![0u8; max_datagram];

    while running.load(Ordering::Relaxed) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(ref e) if is_poll_timeout(e) => continue,
            Err(e) => {
                warn!(error = %e, "receive failed");
                continue;
            }
        };

        match Datagram::decode(&buf[..n]) {
            Ok(Datagram::Data(pkt)) => match pkt.header.channel {
                ChannelType::Reliable => {
                    on_reliable(&socket, &receiver, sink.as_ref(), pkt, from);
                }
                ChannelType::Unreliable => {
                    let sequence = pkt.header.sequence;
                    sink.record(&TransportEvent::PacketReceived {
                        channel: ChannelType::Unreliable,
                        sequence,
                        bytes: pkt.payload.len(),
                    });
                    debug!(seq = sequence, %from, "received unreliable packet");
                    unreliable.push(sequence, pkt.payload);
                }
            },
            Ok(Datagram::Ack(ack)) => {
                debug!(seq = ack.sequence, %from, "ignoring ACK on server socket");
            }
            Err(e) => {
                debug!(error = %e, %from, "undecodable datagram");
                let events: Vec<_> = {
                    let mut rx = receiver.lock().unwrap_or_else(|e| e.into_inner());
                    rx.record_malformed(n);
                    rx.drain_events().collect()
                };
                forward_events(sink.as_ref(), events);
            }
        }
    }
}

fn on_reliable(
    socket: &UdpSocket,
    receiver: &Mutex<ReliableReceiver>,
    sink: &dyn EventSink,
    pkt: Packet,
    from: SocketAddr,
) {
    let (reply, events) = {
        let mut rx = receiver.lock().unwrap_or_else(|e| e.into_inner());
        let reply = rx.receive_packet(pkt, Instant::now());
        (reply, rx.drain_events().collect::<Vec<_>>())
    };

    if let Some((ack, _)) = reply {
        if let Err(e) = socket.send_to(&ack.encode(), from) {
            warn!(error = %e, seq = ack.sequence, %from, "ACK send failed");
        }
    }
    forward_events(sink, events);
}

fn gap_skip_loop(
    receiver: Arc<Mutex<ReliableReceiver>>,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    while running.load(Ordering::Relaxed) {
        thread::sleep(interval);

        let events: Vec<_> = {
            let mut rx = receiver.lock().unwrap_or_else(|e| e.into_inner());
            rx.poll_gaps(Instant::now());
            rx.drain_events().collect()
        };
        forward_events(sink.as_ref(), events);
    }
}
