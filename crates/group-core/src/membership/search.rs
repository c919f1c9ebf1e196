use crate::node_id::{NodeId, SearchId};
use crate::protocol::{MsgType, Nic, Result, set_search_ttl};

/// A search we started or one cached from another node.
///
/// TTL semantics: `0` is one-shot, negative never expires, positive is a
/// lifetime in milliseconds counted from when the record was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRecord {
    pub search_id: SearchId,
    pub group: String,
    pub private: bool,
    pub ttl_ms: i32,
    pub hop_count: u8,
    pub flood_prob: u8,
    /// Encoded PEER_SEARCH / PEER_SEARCH_PPG body, forwarded verbatim.
    pub message: Vec<u8>,
    pub originator: NodeId,
    /// Originator's key, replies are encrypted for it.
    pub public_key: Option<String>,
    /// Originator's NICs, replies are sent there.
    pub nics: Vec<Nic>,
    pub created_ms: u64,
    pub last_tx_ms: u64,
    pub last_rx_ms: u64,
}

impl SearchRecord {
    pub fn msg_type(&self) -> MsgType {
        if self.private {
            MsgType::PeerSearchPpg
        } else {
            MsgType::PeerSearch
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.ttl_ms != 0
    }

    /// TTL left at `now_ms`. Only positive TTLs count down.
    pub fn remaining_ttl(&self, now_ms: u64) -> i32 {
        if self.ttl_ms <= 0 {
            return self.ttl_ms;
        }
        let elapsed = now_ms.saturating_sub(self.created_ms).min(i32::MAX as u64) as i32;
        self.ttl_ms.saturating_sub(elapsed)
    }

    fn ttl_elapsed(&self, now_ms: u64) -> bool {
        self.ttl_ms > 0 && self.remaining_ttl(now_ms) <= 0
    }

    /// Whether the record should be dropped at `now_ms`.
    ///
    /// Foreign searches live for one lease past their last receipt. Our own
    /// one-shot searches are kept for one lease so replies can still find
    /// them.
    pub fn is_expired(&self, local: &NodeId, now_ms: u64, lease_ms: u64) -> bool {
        if self.ttl_elapsed(now_ms) {
            return true;
        }
        if &self.originator != local {
            return now_ms.saturating_sub(self.last_rx_ms) > lease_ms;
        }
        self.ttl_ms == 0 && now_ms.saturating_sub(self.created_ms) > lease_ms
    }

    pub fn resend_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        self.is_persistent() && now_ms.saturating_sub(self.last_tx_ms) > interval_ms
    }

    /// The stored message with its TTL field brought up to date.
    pub fn current_message(&self, now_ms: u64) -> Result<Vec<u8>> {
        let mut message = self.message.clone();
        if self.ttl_ms > 0 {
            set_search_ttl(&mut message, self.remaining_ttl(now_ms))?;
        }
        Ok(message)
    }
}
