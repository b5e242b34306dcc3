//! # Unreliable Channel Queue
//!
//! Arrival-ordered hand-off from the socket thread to the application. No
//! reordering, no deduplication, no loss detection; the queue knows nothing
//! about the reliable delivery cursor.
//!
//! Backed by an unbounded `crossbeam-channel`, so producers and consumers on
//! different threads never share a lock.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// One unreliable arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreliableEntry {
    pub sequence: u64,
    pub payload: String,
}

/// Multi-producer, multi-consumer FIFO. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct UnreliableQueue {
    tx: Sender<UnreliableEntry>,
    rx: Receiver<UnreliableEntry>,
}

impl UnreliableQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        UnreliableQueue { tx, rx }
    }

    /// Append an arrival.
    pub fn push(&self, sequence: u64, payload: String) {
        // Cannot fail: `self` keeps the receiving half alive.
        let _ = self.tx.send(UnreliableEntry { sequence, payload });
    }

    /// Oldest unconsumed entry, or `None` without blocking.
    pub fn pop(&self) -> Option<UnreliableEntry> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for UnreliableQueue {
    fn default() -> Self {
        Self::new()
    }
}
