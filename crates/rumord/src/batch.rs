//! Splitting value sets across protocol lines
//!
//! The store only grows, so a full snapshot eventually outgrows the line
//! limit of the receiving codec. Gossip is therefore cut into sorted batches.
//! Each batch carries the range of values it speaks for, so a push-pull peer
//! only answers with values from that range and never repeats what other
//! batches of the same round already cover.

use rumor_core::{Message, NodeId, Payload, Value, ValueRange};

/// Widest JSON encoding of one value (`-9223372036854775808`) plus a comma
const MAX_VALUE_BYTES: usize = 21;

/// Cuts value sets into payloads that each fit on one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batcher {
    per_message: usize,
}

impl Batcher {
    /// Batcher for lines of at most `max_line_bytes`, addressed between any
    /// two of `node_ids`
    pub fn new(max_line_bytes: usize, node_ids: &[NodeId]) -> Self {
        let overhead = envelope_bytes(node_ids);
        // Trailing newline
        let room = max_line_bytes.saturating_sub(overhead + 1);
        Self {
            per_message: (room / MAX_VALUE_BYTES).max(1),
        }
    }

    pub fn per_message(&self) -> usize {
        self.per_message
    }

    /// Gossip payloads covering `values`.
    ///
    /// A set that fits in one message goes out unranged. Larger sets are
    /// sorted and split; together the batch ranges cover every value.
    pub fn gossip(&self, mut values: Vec<Value>) -> Vec<Payload> {
        if values.len() <= self.per_message {
            return vec![Payload::Gossip {
                messages: values,
                range: None,
            }];
        }

        values.sort_unstable();
        let batches: Vec<&[Value]> = values.chunks(self.per_message).collect();
        batches
            .iter()
            .enumerate()
            .map(|(i, batch)| {
                let start = if i == 0 { Value::MIN } else { batch[0] };
                let end = match batches.get(i + 1) {
                    Some(next) => next[0] - 1,
                    None => Value::MAX,
                };
                Payload::Gossip {
                    messages: batch.to_vec(),
                    range: Some(ValueRange { start, end }),
                }
            })
            .collect()
    }

    /// Push-pull answers carrying `values`
    pub fn gossip_ok(&self, values: Vec<Value>) -> Vec<Payload> {
        values
            .chunks(self.per_message)
            .map(|batch| Payload::GossipOk {
                messages: batch.to_vec(),
            })
            .collect()
    }
}

/// Encoded size of the largest gossip envelope with no values in it
fn envelope_bytes(node_ids: &[NodeId]) -> usize {
    let longest = node_ids
        .iter()
        .max_by_key(|id| id.as_str().len())
        .cloned()
        .unwrap_or_else(|| NodeId::from(""));

    let mut widest = Message::new(
        longest.clone(),
        longest,
        Payload::Gossip {
            messages: Vec::new(),
            range: Some(ValueRange::FULL),
        },
    );
    widest.body.msg_id = Some(u64::MAX);
    widest.body.in_reply_to = Some(u64::MAX);

    match widest.encode() {
        Ok(line) => line.len(),
        Err(_) => 0,
    }
}
