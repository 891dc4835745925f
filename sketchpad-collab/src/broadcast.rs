//! Fan-out of server events to connected peers.
//!
//! Each peer owns a bounded outbound queue drained by its connection task.
//! A message is encoded once and the same `Arc<str>` is handed to every
//! recipient. Delivery is best-effort: a full or closed queue drops the
//! frame, and the next full snapshot brings that peer back in sync.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::{ProtocolError, ServerMessage};
use crate::room::UserId;

/// Pre-encoded JSON text frame.
pub type Outbound = Arc<str>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Counters shared with observers outside the session task.
#[derive(Debug, Default)]
pub struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    active_peers: AtomicU64,
}

impl AtomicBroadcastStats {
    pub fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.active_peers.load(Ordering::Relaxed) as usize,
        }
    }
}

/// The set of connections in one room.
pub struct BroadcastGroup {
    peers: HashMap<UserId, mpsc::Sender<Outbound>>,
    /// Outbound queue bound per peer
    capacity: usize,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` bounds how many frames may wait for a slow peer before
    /// further frames to it are dropped.
    pub fn new(capacity: usize) -> Self {
        Self::with_stats(capacity, Arc::new(AtomicBroadcastStats::default()))
    }

    /// Group that reports into counters owned by the caller.
    pub fn with_stats(capacity: usize, stats: Arc<AtomicBroadcastStats>) -> Self {
        Self {
            peers: HashMap::new(),
            capacity: capacity.max(1),
            stats,
        }
    }

    /// Register a peer and return the receiving end of its outbound queue.
    pub fn add_peer(&mut self, peer_id: &str) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.attach(peer_id, tx);
        rx
    }

    /// Register a peer whose queue was created by the caller.
    pub fn attach(&mut self, peer_id: &str, tx: mpsc::Sender<Outbound>) {
        self.peers.insert(peer_id.to_string(), tx);
        self.stats
            .active_peers
            .store(self.peers.len() as u64, Ordering::Relaxed);
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        let removed = self.peers.remove(peer_id).is_some();
        self.stats
            .active_peers
            .store(self.peers.len() as u64, Ordering::Relaxed);
        removed
    }

    /// Send to a single peer. Returns whether the frame was queued.
    pub fn send_to(&self, peer_id: &str, msg: &ServerMessage) -> Result<bool, ProtocolError> {
        let encoded: Outbound = msg.encode()?.into();
        Ok(match self.peers.get(peer_id) {
            Some(tx) => self.deliver(peer_id, tx, encoded),
            None => false,
        })
    }

    /// Send to every peer except `exclude`. Returns the number of peers the
    /// frame was queued for.
    pub fn broadcast(&self, msg: &ServerMessage, exclude: Option<&str>) -> Result<usize, ProtocolError> {
        let encoded: Outbound = msg.encode()?.into();
        Ok(self.broadcast_raw(encoded, exclude))
    }

    /// Fan out an already encoded frame.
    pub fn broadcast_raw(&self, encoded: Outbound, exclude: Option<&str>) -> usize {
        let mut delivered = 0;
        for (id, tx) in &self.peers {
            if Some(id.as_str()) == exclude {
                continue;
            }
            if self.deliver(id, tx, encoded.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(&self, peer_id: &str, tx: &mpsc::Sender<Outbound>, frame: Outbound) -> bool {
        match tx.try_send(frame) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Outbound queue full for {peer_id}, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Outbound queue closed for {peer_id}");
                false
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_peer(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats.snapshot()
    }
}
