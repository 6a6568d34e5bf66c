//! Configuration for rumord

use clap::{Parser, ValueEnum};
use std::time::Duration;

/// How a broadcast value leaves the node that received it
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Propagation {
    /// Forward once to every peer, then rely on gossip for repair
    Flood,
    /// Wait for the next gossip round
    GossipOnly,
}

/// Shape of one anti-entropy round
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GossipMode {
    /// Sender pushes its set; receiver stays silent
    Push,
    /// Receiver answers with the values the sender lacked
    PushPull,
}

/// What to do with `topology` hints
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TopologyMode {
    /// Acknowledge and keep disseminating to every node
    Ignore,
    /// Restrict the peer set to this node's neighbours
    Neighbors,
}

/// rumord - rumor Broadcast Node
#[derive(Parser, Debug, Clone)]
#[command(name = "rumord")]
#[command(author, version, about = "Eventually consistent broadcast node", long_about = None)]
pub struct Config {
    /// Gossip round period in milliseconds
    #[arg(long, env = "RUMOR_GOSSIP_INTERVAL_MS", default_value = "100")]
    pub gossip_interval_ms: u64,

    /// Propagation strategy for broadcast values
    #[arg(long, env = "RUMOR_PROPAGATION", value_enum, default_value = "flood")]
    pub propagation: Propagation,

    /// Anti-entropy exchange shape
    #[arg(long, env = "RUMOR_GOSSIP_MODE", value_enum, default_value = "push-pull")]
    pub gossip_mode: GossipMode,

    /// Handling of topology hints
    #[arg(long, env = "RUMOR_TOPOLOGY_MODE", value_enum, default_value = "ignore")]
    pub topology_mode: TopologyMode,

    /// Seed for peer selection (random if unset)
    #[arg(long, env = "RUMOR_RNG_SEED")]
    pub rng_seed: Option<u64>,

    /// Maximum line size in bytes; bounds inbound lines and outgoing gossip
    #[arg(long, default_value = "1048576")]
    pub max_line_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gossip_interval_ms == 0 {
            anyhow::bail!("Gossip interval must be at least 1ms");
        }
        if self.max_line_bytes == 0 {
            anyhow::bail!("Maximum line size cannot be zero");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        Ok(())
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 100,
            propagation: Propagation::Flood,
            gossip_mode: GossipMode::PushPull,
            topology_mode: TopologyMode::Ignore,
            rng_seed: None,
            max_line_bytes: rumor_net::framing::DEFAULT_MAX_LINE_BYTES,
            verbose: false,
            log_format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli() {
        let parsed = Config::try_parse_from(["rumord"]).unwrap();
        let defaults = Config::default();

        assert_eq!(parsed.gossip_interval_ms, defaults.gossip_interval_ms);
        assert_eq!(parsed.propagation, defaults.propagation);
        assert_eq!(parsed.gossip_mode, defaults.gossip_mode);
        assert_eq!(parsed.topology_mode, defaults.topology_mode);
        assert_eq!(parsed.max_line_bytes, defaults.max_line_bytes);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_parse_modes() {
        let config = Config::try_parse_from([
            "rumord",
            "--propagation",
            "gossip-only",
            "--gossip-mode",
            "push",
            "--topology-mode",
            "neighbors",
            "--rng-seed",
            "42",
        ])
        .unwrap();

        assert_eq!(config.propagation, Propagation::GossipOnly);
        assert_eq!(config.gossip_mode, GossipMode::Push);
        assert_eq!(config.topology_mode, TopologyMode::Neighbors);
        assert_eq!(config.rng_seed, Some(42));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.gossip_interval_ms = 0;
        assert!(config.validate().is_err());

        config.gossip_interval_ms = 50;
        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
