//! In-process network for tests and simulations
//!
//! Every participant (node or client) joins with its id and receives a
//! mailbox. Sends are routed by `dest` and may be dropped by a seeded loss
//! model, which makes lossy multi-node runs reproducible.

use crate::transport::{Transport, TransportError};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rumor_core::{Message, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

struct LossModel {
    drop_rate: f64,
    rng: StdRng,
}

impl LossModel {
    fn should_drop(&mut self) -> bool {
        self.drop_rate > 0.0 && self.rng.gen::<f64>() < self.drop_rate
    }
}

/// Shared in-memory message fabric
pub struct MemoryNetwork {
    mailboxes: RwLock<HashMap<NodeId, mpsc::UnboundedSender<Message>>>,
    loss: Mutex<LossModel>,
    sent: AtomicU64,
    dropped: AtomicU64,
    sent_by: RwLock<HashMap<NodeId, u64>>,
}

impl MemoryNetwork {
    /// Lossless network
    pub fn new() -> Arc<Self> {
        Self::with_loss(0.0, 0)
    }

    /// Network that silently drops each send with probability `drop_rate`
    pub fn with_loss(drop_rate: f64, seed: u64) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: RwLock::new(HashMap::new()),
            loss: Mutex::new(LossModel {
                drop_rate: drop_rate.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
            }),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            sent_by: RwLock::new(HashMap::new()),
        })
    }

    /// Register a participant and return its mailbox
    pub fn join(&self, id: impl Into<NodeId>) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.write().insert(id.into(), tx);
        rx
    }

    /// Transport handle for any participant
    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::new(MemoryTransport {
            network: self.clone(),
        })
    }

    /// Change the loss rate mid-run (e.g. to heal a partition)
    pub fn set_drop_rate(&self, drop_rate: f64) {
        self.loss.lock().drop_rate = drop_rate.clamp(0.0, 1.0);
    }

    /// Messages handed to the network, including dropped ones
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages lost by the loss model
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages handed to the network by one sender
    pub fn sent_by(&self, src: &NodeId) -> u64 {
        self.sent_by.read().get(src).copied().unwrap_or(0)
    }

    fn deliver(&self, message: Message) -> Result<(), TransportError> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        *self.sent_by.write().entry(message.src.clone()).or_insert(0) += 1;

        let mailbox = self
            .mailboxes
            .read()
            .get(&message.dest)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(message.dest.clone()))?;

        if self.loss.lock().should_drop() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropped {} {} -> {}", message.kind(), message.src, message.dest);
            return Ok(());
        }

        mailbox
            .send(message)
            .map_err(|e| TransportError::Unreachable(e.0.dest))
    }
}

struct MemoryTransport {
    network: Arc<MemoryNetwork>,
}

impl Transport for MemoryTransport {
    fn send(&self, message: Message) -> Result<(), TransportError> {
        self.network.deliver(message)
    }
}
