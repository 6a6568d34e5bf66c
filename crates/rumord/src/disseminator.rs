//! Flood-on-receipt forwarding

use crate::node::Counters;
use crate::peers::PeerSet;
use rumor_core::{Payload, Value};
use rumor_net::Outbox;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Outcome of one flood
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloodReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Sends a value once to every peer.
///
/// Only the node that received the client broadcast floods; receivers of a
/// `forward` just record the value. Lost forwards are repaired by gossip.
pub struct Disseminator {
    peers: Arc<PeerSet>,
    outbox: Outbox,
    counters: Arc<Counters>,
}

impl Disseminator {
    pub fn new(peers: Arc<PeerSet>, outbox: Outbox, counters: Arc<Counters>) -> Self {
        Self {
            peers,
            outbox,
            counters,
        }
    }

    pub fn flood(&self, value: Value) -> FloodReport {
        let mut report = FloodReport::default();

        for peer in self.peers.to_vec() {
            report.attempted += 1;
            if let Err(e) = self.outbox.send(&peer, Payload::Forward { message: value }) {
                debug!("Forward of {} to {} failed: {}", value, peer, e);
                report.failed += 1;
            }
        }

        self.counters
            .forwards_sent
            .fetch_add((report.attempted - report.failed) as u64, Ordering::Relaxed);
        self.counters
            .send_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumor_core::NodeId;
    use rumor_net::MemoryNetwork;

    #[test]
    fn test_flood_reaches_every_peer_once() {
        let network = MemoryNetwork::new();
        let mut n2 = network.join("n2");
        let mut n3 = network.join("n3");
        let ids: Vec<NodeId> = ["n1", "n2", "n3"].iter().map(|n| NodeId::from(*n)).collect();
        let peers = Arc::new(PeerSet::from_membership(NodeId::from("n1"), &ids));
        let outbox = Outbox::new(NodeId::from("n1"), network.transport());
        let counters = Arc::new(Counters::default());
        let disseminator = Disseminator::new(peers, outbox, counters.clone());

        let report = disseminator.flood(42);

        assert_eq!(report, FloodReport { attempted: 2, failed: 0 });
        for rx in [&mut n2, &mut n3] {
            assert_eq!(rx.try_recv().unwrap().body.payload, Payload::Forward { message: 42 });
            assert!(rx.try_recv().is_err());
        }
        assert_eq!(counters.forwards_sent.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unreachable_peer_is_absorbed() {
        let network = MemoryNetwork::new();
        let _n2 = network.join("n2");
        // n3 never joins
        let ids: Vec<NodeId> = ["n1", "n2", "n3"].iter().map(|n| NodeId::from(*n)).collect();
        let peers = Arc::new(PeerSet::from_membership(NodeId::from("n1"), &ids));
        let outbox = Outbox::new(NodeId::from("n1"), network.transport());
        let counters = Arc::new(Counters::default());
        let disseminator = Disseminator::new(peers, outbox, counters.clone());

        let report = disseminator.flood(1);

        assert_eq!(report, FloodReport { attempted: 2, failed: 1 });
        assert_eq!(counters.send_failures.load(Ordering::Relaxed), 1);
    }
}
