//! Peer set and random peer selection

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use rumor_core::{NodeId, Topology};

/// Every id in `node_ids` except `exclude`, in membership order
pub fn others(node_ids: &[NodeId], exclude: &NodeId) -> Vec<NodeId> {
    node_ids
        .iter()
        .filter(|id| *id != exclude)
        .cloned()
        .collect()
}

/// The other nodes of the cluster
#[derive(Debug)]
pub struct PeerSet {
    self_id: NodeId,
    peers: RwLock<Vec<NodeId>>,
}

impl PeerSet {
    /// Peers from the cluster membership, excluding ourselves
    pub fn from_membership(self_id: NodeId, node_ids: &[NodeId]) -> Self {
        let peers = others(node_ids, &self_id);
        Self {
            self_id,
            peers: RwLock::new(peers),
        }
    }

    /// Narrow the set to our neighbours in `topology`.
    ///
    /// Returns false and leaves the set alone if the map has no entry for us.
    pub fn restrict_to(&self, topology: &Topology) -> bool {
        match topology.get(&self.self_id) {
            Some(neighbours) => {
                let mut restricted = others(neighbours, &self.self_id);
                restricted.sort();
                restricted.dedup();
                *self.peers.write() = restricted;
                true
            }
            None => false,
        }
    }

    /// Uniformly random peer, or `None` for a single-node cluster
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<NodeId> {
        self.peers.read().choose(rng).cloned()
    }

    pub fn to_vec(&self) -> Vec<NodeId> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
