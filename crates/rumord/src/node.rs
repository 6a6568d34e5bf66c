//! Broadcast node: client-facing services and peer handlers

use crate::batch::Batcher;
use crate::config::{Config, GossipMode, Propagation, TopologyMode};
use crate::disseminator::Disseminator;
use crate::peers::PeerSet;
use crate::scheduler::GossipScheduler;
use crate::store::ValueStore;
use rand::Rng;
use rumor_core::{Message, NodeId, Payload, Topology, Value, ValueRange};
use rumor_net::{Handler, HandlerError, Identity, Outbox};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Running counters shared by the node, disseminator and scheduler
#[derive(Debug, Default)]
pub struct Counters {
    pub broadcasts: AtomicU64,
    pub forwards_sent: AtomicU64,
    pub forwards_received: AtomicU64,
    pub send_failures: AtomicU64,
    pub gossip_rounds: AtomicU64,
    pub gossip_skipped: AtomicU64,
    pub values_merged: AtomicU64,
}

/// Node statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStats {
    pub values: usize,
    pub peers: usize,
    pub broadcasts: u64,
    pub forwards_sent: u64,
    pub forwards_received: u64,
    pub send_failures: u64,
    pub gossip_rounds: u64,
    pub gossip_skipped: u64,
    pub values_merged: u64,
}

/// A single cluster node.
///
/// All per-node state (values, peers, counters) is owned here, so several
/// nodes can live in one process.
pub struct BroadcastNode {
    node_id: NodeId,
    store: Arc<ValueStore>,
    peers: Arc<PeerSet>,
    outbox: Outbox,
    disseminator: Disseminator,
    counters: Arc<Counters>,
    batcher: Batcher,
    propagation: Propagation,
    gossip_mode: GossipMode,
    topology_mode: TopologyMode,
}

impl BroadcastNode {
    pub fn new(identity: &Identity, outbox: Outbox, config: &Config) -> Self {
        let store = Arc::new(ValueStore::new());
        let peers = Arc::new(PeerSet::from_membership(
            identity.node_id.clone(),
            &identity.node_ids,
        ));
        let counters = Arc::new(Counters::default());
        let disseminator = Disseminator::new(peers.clone(), outbox.clone(), counters.clone());

        Self {
            node_id: identity.node_id.clone(),
            store,
            peers,
            outbox,
            disseminator,
            counters,
            batcher: Batcher::new(config.max_line_bytes, &identity.node_ids),
            propagation: config.propagation,
            gossip_mode: config.gossip_mode,
            topology_mode: config.topology_mode,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<ValueStore> {
        &self.store
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// Anti-entropy scheduler sharing this node's store and peers
    pub fn gossip_scheduler<R>(&self, interval: Duration, rng: R) -> GossipScheduler<R>
    where
        R: Rng + Send + 'static,
    {
        GossipScheduler::new(
            self.store.clone(),
            self.peers.clone(),
            self.outbox.clone(),
            self.counters.clone(),
            self.batcher,
            interval,
            rng,
        )
    }

    /// Record a client value, propagate it, acknowledge.
    ///
    /// Propagation runs even for values already known, and its failures never
    /// reach the client.
    pub fn handle_broadcast(&self, request: &Message, value: Value) -> Result<(), HandlerError> {
        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        let is_new = self.store.insert(value);
        debug!("Broadcast {} from {} (new: {})", value, request.src, is_new);

        if self.propagation == Propagation::Flood {
            let report = self.disseminator.flood(value);
            trace!("Flooded {} to {} peers", value, report.attempted - report.failed);
        }

        self.outbox.reply(request, Payload::BroadcastOk)?;
        Ok(())
    }

    /// Record a value forwarded by a peer. Never re-forwards.
    pub fn handle_forward(&self, value: Value) {
        self.counters.forwards_received.fetch_add(1, Ordering::Relaxed);
        self.store.insert(value);
    }

    pub fn handle_read(&self, request: &Message) -> Result<(), HandlerError> {
        let messages = self.store.snapshot();
        self.outbox.reply(request, Payload::ReadOk { messages })?;
        Ok(())
    }

    pub fn handle_topology(&self, request: &Message, topology: &Topology) -> Result<(), HandlerError> {
        if self.topology_mode == TopologyMode::Neighbors {
            if self.peers.restrict_to(topology) {
                info!("Peer set restricted to {:?}", self.peers.to_vec());
            } else {
                debug!("Topology has no entry for {}, keeping full peer set", self.node_id);
            }
        }

        self.outbox.reply(request, Payload::TopologyOk)?;
        Ok(())
    }

    /// Merge a peer's pushed set; in push-pull mode, send back what it lacks
    /// within the range the push covers
    pub fn handle_gossip(
        &self,
        request: &Message,
        values: &[Value],
        range: Option<ValueRange>,
    ) -> Result<(), HandlerError> {
        self.merge(values);

        if self.gossip_mode == GossipMode::PushPull {
            let range = range.unwrap_or(ValueRange::FULL);
            let mut missing = self.store.missing_from(values);
            missing.retain(|v| range.contains(*v));
            if !missing.is_empty() {
                trace!("Returning {} values to {}", missing.len(), request.src);
                for payload in self.batcher.gossip_ok(missing) {
                    self.outbox.reply(request, payload)?;
                }
            }
        }
        Ok(())
    }

    /// Merge a push-pull answer. Never answered.
    pub fn handle_gossip_ok(&self, values: &[Value]) {
        self.merge(values);
    }

    fn merge(&self, values: &[Value]) {
        let added = self.store.union(values.iter().copied());
        if added > 0 {
            self.counters
                .values_merged
                .fetch_add(added as u64, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> NodeStats {
        let c = &self.counters;
        NodeStats {
            values: self.store.len(),
            peers: self.peers.len(),
            broadcasts: c.broadcasts.load(Ordering::Relaxed),
            forwards_sent: c.forwards_sent.load(Ordering::Relaxed),
            forwards_received: c.forwards_received.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            gossip_rounds: c.gossip_rounds.load(Ordering::Relaxed),
            gossip_skipped: c.gossip_skipped.load(Ordering::Relaxed),
            values_merged: c.values_merged.load(Ordering::Relaxed),
        }
    }
}

impl Handler for BroadcastNode {
    fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message.payload() {
            Payload::Broadcast { message: value } => self.handle_broadcast(&message, *value),
            Payload::Read => self.handle_read(&message),
            Payload::Topology { topology } => self.handle_topology(&message, topology),
            Payload::Forward { message: value } => {
                self.handle_forward(*value);
                Ok(())
            }
            Payload::Gossip { messages, range } => self.handle_gossip(&message, messages, *range),
            Payload::GossipOk { messages } => {
                self.handle_gossip_ok(messages);
                Ok(())
            }
            _ if message.body.in_reply_to.is_some() => {
                trace!("Ignoring {} from {}", message.kind(), message.src);
                Ok(())
            }
            _ => Err(rumor_core::Error::NotSupported(message.kind()).into()),
        }
    }
}
