//! rumord - rumor Broadcast Node
//!
//! This daemon provides:
//! - A deduplicated, grow-only value store
//! - Flood-on-receipt forwarding of broadcast values
//! - Periodic anti-entropy gossip with one random peer per round, split
//!   into batches that fit the line limit
//! - Client-facing broadcast, read and topology services

pub mod batch;
pub mod config;
pub mod disseminator;
pub mod node;
pub mod peers;
pub mod scheduler;
pub mod server;
pub mod store;

#[cfg(test)]
mod convergence_tests;

pub use batch::Batcher;
pub use config::Config;
pub use disseminator::Disseminator;
pub use node::{BroadcastNode, NodeStats};
pub use peers::PeerSet;
pub use scheduler::{GossipScheduler, GossipTask, TickOutcome};
pub use server::Server;
pub use store::ValueStore;
