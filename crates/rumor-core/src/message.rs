//! Message envelope and typed payloads
//!
//! Every message is a single JSON object:
//!
//! ```text
//! {"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 1, "message": 42}}
//! ```
//!
//! The body carries a `type` discriminator, an optional `msg_id` assigned by
//! the sender, an optional `in_reply_to` naming the request it answers, and
//! the fields of the payload itself.

use crate::error::{Error, ErrorCode, MalformedMessage, Result};
use crate::types::{NodeId, Topology, Value, ValueRange};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// PAYLOADS
// =============================================================================

/// Typed message payloads, tagged by the body's `type` field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Harness assigns identity and membership
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,

    /// Client publishes a value
    Broadcast { message: Value },
    BroadcastOk,

    /// Client asks for every known value
    Read,
    ReadOk { messages: Vec<Value> },

    /// Client suggests a neighbour map. Any shape is accepted: a hint that
    /// is not a map reads as empty, and entries that are not id lists are
    /// dropped.
    Topology {
        #[serde(default, deserialize_with = "lenient_topology")]
        topology: Topology,
    },
    TopologyOk,

    /// One-hop flood of a single value between nodes
    Forward { message: Value },

    /// Anti-entropy push of the sender's value set, or of the slice of it
    /// inside `range` when the set spans several messages
    Gossip {
        messages: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<ValueRange>,
    },

    /// Push-pull answer: values the gossip sender was missing
    GossipOk { messages: Vec<Value> },

    Error { code: ErrorCode, text: String },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Init { .. } => MessageKind::Init,
            Payload::InitOk => MessageKind::InitOk,
            Payload::Broadcast { .. } => MessageKind::Broadcast,
            Payload::BroadcastOk => MessageKind::BroadcastOk,
            Payload::Read => MessageKind::Read,
            Payload::ReadOk { .. } => MessageKind::ReadOk,
            Payload::Topology { .. } => MessageKind::Topology,
            Payload::TopologyOk => MessageKind::TopologyOk,
            Payload::Forward { .. } => MessageKind::Forward,
            Payload::Gossip { .. } => MessageKind::Gossip,
            Payload::GossipOk { .. } => MessageKind::GossipOk,
            Payload::Error { .. } => MessageKind::Error,
        }
    }
}

fn lenient_topology<'de, D>(deserializer: D) -> std::result::Result<Topology, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Object(entries) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(Topology::new());
    };

    Ok(entries
        .into_iter()
        .filter_map(|(node, neighbours)| {
            serde_json::from_value(neighbours)
                .ok()
                .map(|neighbours| (NodeId::from(node), neighbours))
        })
        .collect())
}

/// Payload discriminator, mirroring the wire `type` strings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Init,
    InitOk,
    Broadcast,
    BroadcastOk,
    Read,
    ReadOk,
    Topology,
    TopologyOk,
    Forward,
    Gossip,
    GossipOk,
    Error,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Init => "init",
            MessageKind::InitOk => "init_ok",
            MessageKind::Broadcast => "broadcast",
            MessageKind::BroadcastOk => "broadcast_ok",
            MessageKind::Read => "read",
            MessageKind::ReadOk => "read_ok",
            MessageKind::Topology => "topology",
            MessageKind::TopologyOk => "topology_ok",
            MessageKind::Forward => "forward",
            MessageKind::Gossip => "gossip",
            MessageKind::GossipOk => "gossip_ok",
            MessageKind::Error => "error",
        }
    }

    /// Requests a client waits on; malformed ones are answered with an error
    pub fn is_client_facing(self) -> bool {
        matches!(
            self,
            MessageKind::Init | MessageKind::Broadcast | MessageKind::Read | MessageKind::Topology
        )
    }

    /// Node-to-node traffic
    pub fn is_peer_to_peer(self) -> bool {
        matches!(
            self,
            MessageKind::Forward | MessageKind::Gossip | MessageKind::GossipOk
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "init" => MessageKind::Init,
            "init_ok" => MessageKind::InitOk,
            "broadcast" => MessageKind::Broadcast,
            "broadcast_ok" => MessageKind::BroadcastOk,
            "read" => MessageKind::Read,
            "read_ok" => MessageKind::ReadOk,
            "topology" => MessageKind::Topology,
            "topology_ok" => MessageKind::TopologyOk,
            "forward" => MessageKind::Forward,
            "gossip" => MessageKind::Gossip,
            "gossip_ok" => MessageKind::GossipOk,
            "error" => MessageKind::Error,
            _ => return Err(()),
        })
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Message body: correlation ids plus the flattened payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Body {
    pub fn new(payload: Payload) -> Self {
        Self {
            msg_id: None,
            in_reply_to: None,
            payload,
        }
    }
}

/// A routed message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

/// Envelope with an undecoded body, kept so a bad body can still be answered
#[derive(Deserialize)]
struct RawMessage {
    src: NodeId,
    dest: NodeId,
    body: serde_json::Value,
}

impl Message {
    pub fn new(src: NodeId, dest: NodeId, payload: Payload) -> Self {
        Self {
            src,
            dest,
            body: Body::new(payload),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.body.payload
    }

    /// Decode a single JSON line.
    ///
    /// A line that is not an envelope yields [`Error::Json`]. An envelope
    /// whose body does not match its `type` yields [`Error::Malformed`] with
    /// enough context to answer the sender.
    pub fn decode(line: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(line)?;

        match Body::deserialize(&raw.body) {
            Ok(body) => Ok(Self {
                src: raw.src,
                dest: raw.dest,
                body,
            }),
            Err(e) => Err(Error::Malformed(MalformedMessage {
                msg_type: raw
                    .body
                    .get("type")
                    .and_then(|t| t.as_str())
                    .map(String::from),
                msg_id: raw.body.get("msg_id").and_then(|id| id.as_u64()),
                src: raw.src,
                dest: raw.dest,
                reason: e.to_string(),
            })),
        }
    }

    /// Encode as a single JSON line (without the trailing newline)
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
