use crate::node_id::NodeId;
use crate::protocol::is_fresher;
use std::collections::HashMap;

/// Highest broadcast sequence number seen per (sender, message type).
#[derive(Debug, Default)]
pub struct DedupCache {
    latest: HashMap<(NodeId, u8), u16>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq` and return true if it is new, false for a duplicate or
    /// stale packet.
    pub fn observe(&mut self, sender: &NodeId, msg_type: u8, seq: u16) -> bool {
        let key = (sender.clone(), msg_type);
        match self.latest.get(&key) {
            Some(&last) if !is_fresher(seq, last) => false,
            _ => {
                self.latest.insert(key, seq);
                true
            }
        }
    }

    /// Drop everything known about a sender, so a restarted node with a
    /// fresh counter is not mistaken for a replay.
    pub fn forget(&mut self, sender: &NodeId) {
        self.latest.retain(|(id, _), _| id != sender);
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
