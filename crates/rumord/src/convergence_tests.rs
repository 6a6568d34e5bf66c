//! Multi-node simulations over the in-memory network
//!
//! Rounds are driven by hand: every node ticks its scheduler once, then all
//! mailboxes are drained until the network is quiet.

use crate::config::{Config, GossipMode, Propagation};
use crate::node::BroadcastNode;
use crate::scheduler::GossipScheduler;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rumor_core::{Message, NodeId, Payload, Value};
use rumor_net::{Handler, Identity, MemoryNetwork, Outbox};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const MAX_ROUNDS: usize = 100;

struct SimNode {
    node: BroadcastNode,
    inbox: UnboundedReceiver<Message>,
    scheduler: GossipScheduler<StdRng>,
}

struct Cluster {
    network: Arc<MemoryNetwork>,
    nodes: Vec<SimNode>,
    _client: UnboundedReceiver<Message>,
    next_msg_id: u64,
}

impl Cluster {
    fn new(size: usize, drop_rate: f64, seed: u64, config: Config) -> Self {
        let network = MemoryNetwork::with_loss(drop_rate, seed);
        let client = network.join("c1");
        let node_ids: Vec<NodeId> = (1..=size).map(|i| NodeId::new(format!("n{}", i))).collect();

        let nodes = node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let inbox = network.join(id.clone());
                let identity = Identity {
                    node_id: id.clone(),
                    node_ids: node_ids.clone(),
                };
                let outbox = Outbox::new(id.clone(), network.transport());
                let node = BroadcastNode::new(&identity, outbox, &config);
                let scheduler = node.gossip_scheduler(
                    Duration::from_millis(100),
                    StdRng::seed_from_u64(seed.wrapping_add(i as u64 + 1)),
                );
                SimNode {
                    node,
                    inbox,
                    scheduler,
                }
            })
            .collect();

        Self {
            network,
            nodes,
            _client: client,
            next_msg_id: 0,
        }
    }

    /// Client broadcast at one node, then let the network settle
    fn broadcast(&mut self, at: usize, value: Value) {
        self.next_msg_id += 1;
        let target = &self.nodes[at].node;
        let mut message = Message::new(
            NodeId::from("c1"),
            target.node_id().clone(),
            Payload::Broadcast { message: value },
        );
        message.body.msg_id = Some(self.next_msg_id);
        target.handle(message).unwrap();
        self.settle();
    }

    fn settle(&mut self) {
        loop {
            let mut delivered = 0;
            for sim in &mut self.nodes {
                while let Ok(message) = sim.inbox.try_recv() {
                    sim.node.handle(message).unwrap();
                    delivered += 1;
                }
            }
            if delivered == 0 {
                break;
            }
        }
    }

    fn gossip_round(&mut self) {
        for sim in &mut self.nodes {
            sim.scheduler.tick();
        }
        self.settle();
    }

    fn converged(&self, values: &[Value]) -> bool {
        self.nodes
            .iter()
            .all(|sim| values.iter().all(|v| sim.node.store().contains(*v)))
    }

    /// Gossip until every node holds `values`; returns the rounds used
    fn rounds_to_converge(&mut self, values: &[Value]) -> Option<usize> {
        for round in 0..=MAX_ROUNDS {
            if self.converged(values) {
                return Some(round);
            }
            self.gossip_round();
        }
        None
    }
}

#[test]
fn test_lossless_flood_needs_no_gossip() {
    let mut cluster = Cluster::new(5, 0.0, 1, Config::default());

    cluster.broadcast(2, 42);

    assert_eq!(cluster.rounds_to_converge(&[42]), Some(0));
}

#[test]
fn test_flood_is_one_hop() {
    let mut cluster = Cluster::new(5, 0.0, 2, Config::default());

    cluster.broadcast(0, 7);

    // Four forwards from the origin plus the broadcast_ok
    assert_eq!(cluster.network.sent(), 5);
    assert_eq!(cluster.network.sent_by(&NodeId::from("n1")), 5);
    for id in ["n2", "n3", "n4", "n5"] {
        assert_eq!(cluster.network.sent_by(&NodeId::from(id)), 0);
    }
}

#[test]
fn test_converges_despite_dropped_sends() {
    let mut cluster = Cluster::new(5, 0.3, 3, Config::default());
    let values: Vec<Value> = (0..10).collect();

    for (i, value) in values.iter().enumerate() {
        cluster.broadcast(i % 5, *value);
    }

    let rounds = cluster.rounds_to_converge(&values);
    assert!(rounds.is_some(), "no convergence within {} rounds", MAX_ROUNDS);
    assert!(cluster.network.dropped() > 0);
}

#[test]
fn test_push_only_gossip_converges_without_flooding() {
    let config = Config {
        propagation: Propagation::GossipOnly,
        gossip_mode: GossipMode::Push,
        ..Config::default()
    };
    let mut cluster = Cluster::new(5, 0.2, 4, config);

    cluster.broadcast(4, -3);
    assert!(!cluster.converged(&[-3]));

    assert!(cluster.rounds_to_converge(&[-3]).is_some());
}

#[test]
fn test_gossip_repairs_a_fully_lost_flood() {
    let mut cluster = Cluster::new(4, 1.0, 5, Config::default());

    cluster.broadcast(1, 100);
    for (i, sim) in cluster.nodes.iter().enumerate() {
        assert_eq!(sim.node.store().contains(100), i == 1);
    }

    cluster.network.set_drop_rate(0.0);
    assert!(cluster.rounds_to_converge(&[100]).is_some());
}

#[test]
fn test_single_node_cluster() {
    let mut cluster = Cluster::new(1, 0.0, 6, Config::default());

    cluster.broadcast(0, 9);
    cluster.gossip_round();

    assert!(cluster.converged(&[9]));
    // Only the broadcast_ok
    assert_eq!(cluster.network.sent(), 1);
    assert_eq!(cluster.nodes[0].node.stats().gossip_skipped, 1);
}
