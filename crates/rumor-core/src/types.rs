//! Identity and value types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A broadcast value. Values are opaque integers; only set membership matters.
pub type Value = i64;

/// Adjacency map carried by `topology` messages.
pub type Topology = HashMap<NodeId, Vec<NodeId>>;

/// Inclusive span of values a gossip batch speaks for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub start: Value,
    pub end: Value,
}

impl ValueRange {
    pub const FULL: ValueRange = ValueRange {
        start: Value::MIN,
        end: Value::MAX,
    };

    pub fn contains(&self, value: Value) -> bool {
        self.start <= value && value <= self.end
    }
}

/// Node identifier as assigned by the cluster harness (`n1`, `c3`, ...)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
