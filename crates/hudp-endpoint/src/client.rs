//! # Client Endpoint
//!
//! One UDP socket talking to one fixed peer. Sends go out on the caller's
//! thread; two workers run alongside:
//!
//! - `hudp-ack-listener` polls the socket and releases acknowledged packets.
//! - `hudp-retransmit` scans the tracked store on a fixed period, resending
//!   and abandoning.
//!
//! The [`ReliableSender`] (and with it the tracked-packet store) sits behind
//! a single mutex. Events are drained under the lock and forwarded to the
//! sink after it is released.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use quanta::Instant;
use tracing::{debug, info, warn};

use hudp_transport::sender::ReliableSender;
use hudp_transport::stats::{EventSink, SenderStats, TransportEvent};
use hudp_transport::wire::Datagram;

use crate::config::ProtocolConfig;
use crate::{forward_events, is_poll_timeout};

/// Abandoned sequence numbers held for [`HudpClient::abandoned`]. Once full,
/// further notifications are dropped until the caller drains them.
pub const ABANDONED_BACKLOG: usize = 1000;

pub struct HudpClient {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    sender: Arc<Mutex<ReliableSender>>,
    sink: Arc<dyn EventSink>,
    abandoned_rx: Receiver<u64>,
    running: Arc<AtomicBool>,
    shutdown_grace: Duration,
    thread_handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl HudpClient {
    /// Bind an ephemeral local port and start the worker threads.
    pub fn connect(
        peer: SocketAddr,
        config: &ProtocolConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(bind_addr)?;
        Self::from_socket(socket, peer, config, sink)
    }

    /// Use an already-bound socket.
    pub fn from_socket(
        socket: UdpSocket,
        peer: SocketAddr,
        config: &ProtocolConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        socket.set_read_timeout(Some(config.socket.poll_timeout))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let sender = Arc::new(Mutex::new(ReliableSender::new(config.sender.retransmit)));
        let running = Arc::new(AtomicBool::new(true));
        let (abandoned_tx, abandoned_rx) = bounded(ABANDONED_BACKLOG);

        let client = Self {
            socket: socket.clone(),
            peer,
            sender: sender.clone(),
            sink: sink.clone(),
            abandoned_rx,
            running: running.clone(),
            shutdown_grace: config.socket.shutdown_grace,
            thread_handles: Mutex::new(Vec::new()),
        };

        let ack_handle = {
            let socket = socket.clone();
            let sender = sender.clone();
            let sink = sink.clone();
            let running = running.clone();
            let max_datagram = config.socket.max_datagram;
            thread::Builder::new()
                .name("hudp-ack-listener".into())
                .spawn(move || ack_listener(socket, sender, sink, running, max_datagram))?
        };
        client.push_handle(ack_handle);

        let retransmit_handle = {
            let interval = config.sender.retransmit_interval;
            thread::Builder::new()
                .name("hudp-retransmit".into())
                .spawn(move || {
                    retransmit_loop(socket, peer, sender, sink, abandoned_tx, running, interval)
                })?
        };
        client.push_handle(retransmit_handle);

        info!(%local_addr, %peer, "client started");
        Ok(client)
    }

    /// Send on the reliable channel. Returns the assigned sequence number.
    ///
    /// A socket error is logged and left to the retransmit path.
    pub fn send_reliable(&self, payload: &str) -> Result<u64> {
        self.ensure_running()?;
        let (out, events) = {
            let mut sender = self.lock_sender();
            let out = sender.send_reliable(payload, Instant::now())?;
            (out, sender.drain_events().collect::<Vec<_>>())
        };
        self.transmit(&out.data, out.sequence);
        forward_events(self.sink.as_ref(), events);
        Ok(out.sequence)
    }

    /// Send on the unreliable channel. Returns the assigned sequence number.
    pub fn send_unreliable(&self, payload: &str) -> Result<u64> {
        self.ensure_running()?;
        let (out, events) = {
            let mut sender = self.lock_sender();
            let out = sender.send_unreliable(payload)?;
            (out, sender.drain_events().collect::<Vec<_>>())
        };
        self.transmit(&out.data, out.sequence);
        forward_events(self.sink.as_ref(), events);
        Ok(out.sequence)
    }

    /// Sequence numbers abandoned without an ACK since the last call.
    ///
    /// Holds at most [`ABANDONED_BACKLOG`] entries; anything abandoned while
    /// the backlog is full is only visible through [`stats`](Self::stats) and
    /// the `PacketAbandoned` event. Callers that care should drain regularly.
    pub fn abandoned(&self) -> Vec<u64> {
        self.abandoned_rx.try_iter().collect()
    }

    /// Reliable packets still awaiting an ACK.
    pub fn in_flight(&self) -> usize {
        self.lock_sender().in_flight()
    }

    pub fn retry_count(&self, sequence: u64) -> Option<u32> {
        self.lock_sender().retry_count(sequence)
    }

    pub fn stats(&self) -> SenderStats {
        self.lock_sender().stats().clone()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
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
        info!(peer = %self.peer, "client shutting down");
        thread::sleep(self.shutdown_grace);
        let mut handles = self
            .thread_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Client closed"))
        }
    }

    fn transmit(&self, data: &Bytes, sequence: u64) {
        if let Err(e) = self.socket.send_to(data, self.peer) {
            warn!(error = %e, seq = sequence, "send failed");
        }
    }

    fn lock_sender(&self) -> std::sync::MutexGuard<'_, ReliableSender> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_handle(&self, handle: thread::JoinHandle<()>) {
        self.thread_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

impl Drop for HudpClient {
    fn drop(&mut self) {
        self.close();
    }
}

// ─── Workers ────────────────────────────────────────────────────────────────

fn ack_listener(
    socket: Arc<UdpSocket>,
    sender: Arc<Mutex<ReliableSender>>,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    max_datagram: usize,
) {
    let mut buf = vec![0u8; max_datagram];

    while running.load(Ordering::Relaxed) {
        let n = match socket.recv_from(&mut buf) {
            Ok((n, _from)) => n,
            Err(ref e) if is_poll_timeout(e) => continue,
            Err(e) => {
                warn!(error = %e, "ACK listener receive failed");
                continue;
            }
        };

        let ack = match Datagram::decode(&buf[..n]) {
            Ok(Datagram::Ack(ack)) => ack,
            Ok(Datagram::Data(pkt)) => {
                debug!(seq = pkt.header.sequence, "ignoring data packet on client socket");
                continue;
            }
            Err(e) => {
                debug!(error = %e, len = n, "malformed datagram, dropping");
                sink.record(&TransportEvent::MalformedDatagram { len: n });
                continue;
            }
        };

        let events: Vec<_> = {
            let mut sender = sender.lock().unwrap_or_else(|e| e.into_inner());
            sender.process_ack(&ack, Instant::now());
            sender.drain_events().collect()
        };
        forward_events(sink.as_ref(), events);
    }
}

fn retransmit_loop(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    sender: Arc<Mutex<ReliableSender>>,
    sink: Arc<dyn EventSink>,
    abandoned_tx: Sender<u64>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    while running.load(Ordering::Relaxed) {
        thread::sleep(interval);

        let (resend, abandoned, events) = {
            let mut sender = sender.lock().unwrap_or_else(|e| e.into_inner());
            let resend = sender.poll_retransmits(Instant::now());
            let abandoned = sender.drain_abandoned();
            (resend, abandoned, sender.drain_events().collect::<Vec<_>>())
        };

        forward_events(sink.as_ref(), events);
        for sequence in abandoned {
            match abandoned_tx.try_send(sequence) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(seq = sequence, "abandonment backlog full, dropping notification");
                }
            }
        }
        for out in &resend {
            if let Err(e) = socket.send_to(&out.data, peer) {
                warn!(error = %e, seq = out.sequence, "retransmit failed");
            }
        }
    }
}
