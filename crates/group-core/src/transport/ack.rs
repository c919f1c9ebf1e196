use super::InterfaceId;
use crate::node_id::NodeId;
use std::collections::HashMap;
use std::net::SocketAddrV4;

/// A reliable unicast still waiting for its ACK.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub packet: Vec<u8>,
    pub dest: SocketAddrV4,
    pub iface: InterfaceId,
    pub created_ms: u64,
    pub deadline_ms: u64,
    pub attempts: u32,
}

/// One retransmission due this sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resend {
    pub to: NodeId,
    pub seq: u16,
    pub iface: InterfaceId,
    pub dest: SocketAddrV4,
    pub packet: Vec<u8>,
}

/// Retransmission cache for reliable unicasts, keyed by destination node
/// and packet sequence number. Only the destination's ACK clears an entry.
#[derive(Debug, Default)]
pub struct AckCache {
    pending: HashMap<(NodeId, u16), PendingAck>,
}

impl AckCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        to: NodeId,
        seq: u16,
        iface: InterfaceId,
        dest: SocketAddrV4,
        packet: Vec<u8>,
        now_ms: u64,
        ttl_ms: u64,
    ) {
        self.pending.insert(
            (to, seq),
            PendingAck {
                packet,
                dest,
                iface,
                created_ms: now_ms,
                deadline_ms: now_ms.saturating_add(ttl_ms),
                attempts: 1,
            },
        );
    }

    /// Returns true if `seq` to `from` was pending.
    pub fn acknowledge(&mut self, from: &NodeId, seq: u16) -> bool {
        self.pending.remove(&(from.clone(), seq)).is_some()
    }

    /// Collect packets to resend and drop entries whose deadline passed.
    ///
    /// Returns the resends and the number of entries given up on.
    pub fn sweep(&mut self, now_ms: u64) -> (Vec<Resend>, usize) {
        let before = self.pending.len();
        self.pending.retain(|_, entry| now_ms < entry.deadline_ms);
        let expired = before - self.pending.len();

        let mut resends: Vec<Resend> = self
            .pending
            .iter_mut()
            .map(|((to, seq), entry)| {
                entry.attempts += 1;
                Resend {
                    to: to.clone(),
                    seq: *seq,
                    iface: entry.iface,
                    dest: entry.dest,
                    packet: entry.packet.clone(),
                }
            })
            .collect();
        resends.sort_by(|a, b| (a.seq, &a.to).cmp(&(b.seq, &b.to)));
        (resends, expired)
    }

    pub fn get(&self, to: &NodeId, seq: u16) -> Option<&PendingAck> {
        self.pending.get(&(to.clone(), seq))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
