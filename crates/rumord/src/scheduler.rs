//! Anti-entropy gossip scheduler
//!
//! Every period the scheduler picks one peer uniformly at random and pushes
//! the full value set to it, split into as many lines as the set needs.
//! Rounds never wait for an answer: a round that
//! is lost is simply repeated by a later one, so the loop alternates between
//! idle (waiting for the timer) and a short exchanging step that ends as soon
//! as the payload is handed to the transport.

use crate::batch::Batcher;
use crate::node::Counters;
use crate::peers::PeerSet;
use crate::store::ValueStore;
use rand::rngs::StdRng;
use rand::Rng;
use rumor_core::{NodeId, Payload};
use rumor_net::Outbox;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Result of a single gossip round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No peers to talk to
    Skipped,
    /// Snapshot of `values` entries handed to the transport in `messages`
    /// gossip messages
    Sent {
        peer: NodeId,
        values: usize,
        messages: usize,
    },
    /// The transport refused the send
    Failed { peer: NodeId },
}

/// Periodic push of the full value set to one random peer
pub struct GossipScheduler<R = StdRng> {
    store: Arc<ValueStore>,
    peers: Arc<PeerSet>,
    outbox: Outbox,
    counters: Arc<Counters>,
    batcher: Batcher,
    interval: Duration,
    rng: R,
}

impl<R: Rng + Send + 'static> GossipScheduler<R> {
    pub fn new(
        store: Arc<ValueStore>,
        peers: Arc<PeerSet>,
        outbox: Outbox,
        counters: Arc<Counters>,
        batcher: Batcher,
        interval: Duration,
        rng: R,
    ) -> Self {
        Self {
            store,
            peers,
            outbox,
            counters,
            batcher,
            interval,
            rng,
        }
    }

    /// Run one round now
    pub fn tick(&mut self) -> TickOutcome {
        let Some(peer) = self.peers.choose(&mut self.rng) else {
            self.counters.gossip_skipped.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::Skipped;
        };

        // Copy out under the store lock, send without it
        let snapshot = self.store.snapshot();
        let values = snapshot.len();
        let payloads = self.batcher.gossip(snapshot);
        let messages = payloads.len();

        for payload in payloads {
            if let Err(e) = self.outbox.send(&peer, payload) {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                debug!("Gossip to {} failed: {}", peer, e);
                return TickOutcome::Failed { peer };
            }
        }

        self.counters.gossip_rounds.fetch_add(1, Ordering::Relaxed);
        trace!("Gossiped {} values to {} in {} messages", values, peer, messages);
        TickOutcome::Sent {
            peer,
            values,
            messages,
        }
    }

    /// Move the scheduler onto a background task ticking every period
    pub fn spawn(mut self) -> GossipTask {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let period = self.interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick();
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
            debug!("Gossip loop stopped");
        });

        GossipTask {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to a running gossip loop
pub struct GossipTask {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl GossipTask {
    /// Signal the loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!("Gossip task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use bytes::BytesMut;
    use rand::SeedableRng;
    use rumor_core::{Message, Value};
    use rumor_net::framing::DEFAULT_MAX_LINE_BYTES;
    use rumor_net::{JsonLinesCodec, MemoryNetwork};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_util::codec::{Decoder, Encoder};

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    fn scheduler(
        network: &Arc<MemoryNetwork>,
        cluster: &[&str],
        store: Arc<ValueStore>,
        seed: u64,
    ) -> (GossipScheduler<StdRng>, Arc<Counters>) {
        let members = ids(cluster);
        let peers = Arc::new(PeerSet::from_membership(NodeId::from("n1"), &members));
        let outbox = Outbox::new(NodeId::from("n1"), network.transport());
        let counters = Arc::new(Counters::default());
        let scheduler = GossipScheduler::new(
            store,
            peers,
            outbox,
            counters.clone(),
            Batcher::new(DEFAULT_MAX_LINE_BYTES, &members),
            Duration::from_millis(100),
            StdRng::seed_from_u64(seed),
        );
        (scheduler, counters)
    }

    fn count(rx: &mut UnboundedReceiver<Message>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[test]
    fn test_single_node_skips_round() {
        let network = MemoryNetwork::new();
        let (mut scheduler, counters) = scheduler(&network, &["n1"], Arc::new(ValueStore::new()), 1);

        assert_eq!(scheduler.tick(), TickOutcome::Skipped);
        assert_eq!(network.sent(), 0);
        assert_eq!(counters.gossip_skipped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_tick_pushes_snapshot_to_chosen_peer() {
        let network = MemoryNetwork::new();
        let mut inboxes: Vec<_> = ["n2", "n3", "n4"].iter().map(|n| network.join(*n)).collect();
        let store = Arc::new(ValueStore::new());
        store.union(vec![1, 3]);
        let (mut scheduler, counters) = scheduler(&network, &["n1", "n2", "n3", "n4"], store, 99);

        let mut expected_rng = StdRng::seed_from_u64(99);
        let expected = ids(&["n2", "n3", "n4"])
            .choose(&mut expected_rng)
            .cloned()
            .unwrap();

        assert_eq!(
            scheduler.tick(),
            TickOutcome::Sent {
                peer: expected.clone(),
                values: 2,
                messages: 1
            }
        );

        let index = ["n2", "n3", "n4"]
            .iter()
            .position(|n| *n == expected.as_str())
            .unwrap();
        let message = inboxes[index].try_recv().unwrap();
        match message.body.payload {
            Payload::Gossip {
                mut messages,
                range: None,
            } => {
                messages.sort_unstable();
                assert_eq!(messages, vec![1, 3]);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(network.sent(), 1);
        assert_eq!(counters.gossip_rounds.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failed_send_is_absorbed() {
        // Nobody joined, so every destination is unreachable
        let network = MemoryNetwork::new();
        let (mut scheduler, counters) = scheduler(&network, &["n1", "n2"], Arc::new(ValueStore::new()), 5);

        assert_eq!(
            scheduler.tick(),
            TickOutcome::Failed {
                peer: NodeId::from("n2")
            }
        );
        assert_eq!(counters.send_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_oversized_snapshot_is_split_into_decodable_lines() {
        let network = MemoryNetwork::new();
        let mut n2 = network.join("n2");
        let store = Arc::new(ValueStore::new());
        store.union((0..120_000).map(|v| v * 1_000_003));
        let (mut scheduler, _counters) = scheduler(&network, &["n1", "n2"], store, 11);

        let messages = match scheduler.tick() {
            TickOutcome::Sent {
                values: 120_000,
                messages,
                ..
            } => messages,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(messages > 1);

        // Every line goes through the receiving codec intact
        let mut codec = JsonLinesCodec::new();
        let mut wire = BytesMut::new();
        let mut sent = 0;
        while let Ok(message) = n2.try_recv() {
            codec.encode(&message, &mut wire).unwrap();
            sent += 1;
        }
        assert_eq!(sent, messages);

        let mut received: Vec<Value> = Vec::new();
        while let Some(line) = codec.decode(&mut wire).unwrap() {
            assert!(line.len() <= DEFAULT_MAX_LINE_BYTES);
            match Message::decode(&line).unwrap().body.payload {
                Payload::Gossip {
                    messages,
                    range: Some(range),
                } => {
                    assert!(messages.iter().all(|v| range.contains(*v)));
                    received.extend(messages);
                }
                other => panic!("unexpected payload: {:?}", other),
            }
        }
        assert_eq!(received.len(), 120_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_ticks_until_stopped() {
        let network = MemoryNetwork::new();
        let mut n2 = network.join("n2");
        let store = Arc::new(ValueStore::new());
        store.insert(8);
        let (scheduler, _counters) = scheduler(&network, &["n1", "n2"], store, 3);

        let task = scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count(&mut n2), 3);

        task.stop().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count(&mut n2), 0);
    }
}
