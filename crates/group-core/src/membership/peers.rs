//! Known remote nodes.
//!
//! The [`PeerTable`] keeps live peers and, separately, peers that timed
//! out. A dead record is kept so a node reappearing with the same ID is
//! recognised as a revival rather than a brand new node.

use crate::node_id::NodeId;
use crate::protocol::{GroupAdvert, InfoMessage, Nic};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

/// A remote node as last advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node_id: NodeId,
    pub name: String,
    /// Address picked from its NICs for direct contact.
    pub addr: Option<Ipv4Addr>,
    pub port: u16,
    pub public_key: Option<String>,
    pub nics: Vec<Nic>,
    pub info_seq: u16,
    /// `None` until the first GROUP_DATA from this peer.
    pub group_data_seq: Option<u16>,
    pub last_contact_ms: u64,
    pub ping_interval_ms: u32,
    pub ping_count: u64,
    /// Advertised groups keyed by name.
    pub groups: BTreeMap<String, GroupAdvert>,
}

impl Peer {
    pub fn from_info(
        node_id: NodeId,
        info: &InfoMessage,
        nics: Vec<Nic>,
        addr: Option<Ipv4Addr>,
        port: u16,
        now_ms: u64,
    ) -> Self {
        Self {
            node_id,
            name: info.node_name.clone(),
            addr,
            port,
            public_key: info.public_key.clone(),
            nics,
            info_seq: info.seq,
            group_data_seq: None,
            last_contact_ms: now_ms,
            ping_interval_ms: info.ping_interval_ms,
            ping_count: 1,
            groups: group_map(&info.groups),
        }
    }

    /// Any packet from a peer counts as a ping.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_contact_ms = now_ms;
        self.ping_count += 1;
    }

    pub fn is_expired(&self, now_ms: u64, timeout_factor: u8) -> bool {
        let allowed = self.ping_interval_ms as u64 * timeout_factor as u64;
        now_ms.saturating_sub(self.last_contact_ms) > allowed
    }
}

pub fn group_map(groups: &[GroupAdvert]) -> BTreeMap<String, GroupAdvert> {
    groups
        .iter()
        .map(|g| (g.name().to_string(), g.clone()))
        .collect()
}

/// Difference between two advertised group maps of one peer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GroupDiff {
    /// New names, or names whose kind changed.
    pub added: Vec<GroupAdvert>,
    /// Names gone, or whose kind changed (listed under the old kind).
    pub removed: Vec<GroupAdvert>,
    /// Same name and kind, different content.
    pub updated: Vec<GroupAdvert>,
}

impl GroupDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

pub fn diff_groups(
    old: &BTreeMap<String, GroupAdvert>,
    new: &BTreeMap<String, GroupAdvert>,
) -> GroupDiff {
    let mut diff = GroupDiff::default();
    for (name, advert) in new {
        match old.get(name) {
            None => diff.added.push(advert.clone()),
            Some(prev) if prev.kind() != advert.kind() => {
                diff.removed.push(prev.clone());
                diff.added.push(advert.clone());
            }
            Some(prev) if prev != advert => diff.updated.push(advert.clone()),
            Some(_) => {}
        }
    }
    for (name, advert) in old {
        if !new.contains_key(name) {
            diff.removed.push(advert.clone());
        }
    }
    diff
}

#[derive(Debug, Default)]
pub struct PeerTable {
    live: HashMap<NodeId, Peer>,
    dead: HashMap<NodeId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Peer> {
        self.live.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &NodeId) -> Option<&mut Peer> {
        self.live.get_mut(node_id)
    }

    pub fn is_alive(&self, node_id: &NodeId) -> bool {
        self.live.contains_key(node_id)
    }

    pub fn is_dead(&self, node_id: &NodeId) -> bool {
        self.dead.contains_key(node_id)
    }

    /// Add a live peer, discarding any dead record with the same ID.
    pub fn insert(&mut self, peer: Peer) {
        self.dead.remove(&peer.node_id);
        self.live.insert(peer.node_id.clone(), peer);
    }

    /// Move a dead peer back to the live table. Returns false if it was not
    /// dead.
    pub fn revive(&mut self, node_id: &NodeId, now_ms: u64) -> bool {
        match self.dead.remove(node_id) {
            Some(mut peer) => {
                peer.last_contact_ms = now_ms;
                peer.group_data_seq = None;
                self.live.insert(node_id.clone(), peer);
                true
            }
            None => false,
        }
    }

    /// Move a live peer to the dead table.
    pub fn bury(&mut self, node_id: &NodeId) -> bool {
        match self.live.remove(node_id) {
            Some(peer) => {
                self.dead.insert(node_id.clone(), peer);
                true
            }
            None => false,
        }
    }

    /// Live peers past their timeout, sorted by ID.
    pub fn expired(&self, now_ms: u64, timeout_factor: u8) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .live
            .values()
            .filter(|p| p.is_expired(now_ms, timeout_factor))
            .map(|p| p.node_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn live(&self) -> impl Iterator<Item = &Peer> {
        self.live.values()
    }

    pub fn dead(&self) -> impl Iterator<Item = &Peer> {
        self.dead.values()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    fn info(groups: Vec<GroupAdvert>) -> InfoMessage {
        InfoMessage {
            seq: 1,
            ping_interval_ms: 2000,
            node_name: "peer".into(),
            public_key: None,
            groups,
        }
    }

    fn peer(name: &str, now: u64) -> Peer {
        Peer::from_info(id(name), &info(vec![]), vec![], None, 8500, now)
    }

    fn public_peer(name: &str, data: &[u8]) -> GroupAdvert {
        GroupAdvert::PublicPeer {
            name: name.into(),
            data: data.to_vec(),
        }
    }

    // ==================== Timeout ====================

    #[test]
    fn test_expires_after_interval_times_factor() {
        let p = peer("a", 0);
        assert!(!p.is_expired(10_000, 5));
        assert!(p.is_expired(10_001, 5));
    }

    #[test]
    fn test_touch_resets_contact() {
        let mut p = peer("a", 0);
        p.touch(9_000);
        assert_eq!(p.ping_count, 2);
        assert!(!p.is_expired(15_000, 5));
    }

    // ==================== Table ====================

    #[test]
    fn test_bury_and_revive() {
        let mut table = PeerTable::new();
        table.insert(peer("a", 0));
        assert!(table.bury(&id("a")));
        assert!(!table.is_alive(&id("a")));
        assert!(table.is_dead(&id("a")));

        assert!(table.revive(&id("a"), 50_000));
        assert_eq!(table.get(&id("a")).unwrap().last_contact_ms, 50_000);
        assert!(!table.is_dead(&id("a")));
        assert!(!table.revive(&id("a"), 60_000));
    }

    #[test]
    fn test_insert_clears_dead_record() {
        let mut table = PeerTable::new();
        table.insert(peer("a", 0));
        table.bury(&id("a"));
        table.insert(peer("a", 100));
        assert!(table.is_alive(&id("a")));
        assert_eq!(table.dead().count(), 0);
    }

    #[test]
    fn test_expired_sorted() {
        let mut table = PeerTable::new();
        table.insert(peer("c", 0));
        table.insert(peer("a", 0));
        table.insert(peer("b", 20_000));
        assert_eq!(table.expired(20_000, 5), vec![id("a"), id("c")]);
    }

    // ==================== Group diff ====================

    #[test]
    fn test_diff_added_removed_updated() {
        let old = group_map(&[
            public_peer("ops", b"1"),
            public_peer("gone", b""),
            GroupAdvert::PublicManaged {
                name: "same".into(),
            },
        ]);
        let new = group_map(&[
            public_peer("ops", b"2"),
            public_peer("fresh", b""),
            GroupAdvert::PublicManaged {
                name: "same".into(),
            },
        ]);
        let diff = diff_groups(&old, &new);
        assert_eq!(diff.added, vec![public_peer("fresh", b"")]);
        assert_eq!(diff.removed, vec![public_peer("gone", b"")]);
        assert_eq!(diff.updated, vec![public_peer("ops", b"2")]);
    }

    #[test]
    fn test_diff_kind_change_is_remove_plus_add() {
        let old = group_map(&[public_peer("x", b"")]);
        let new = group_map(&[GroupAdvert::PublicManaged { name: "x".into() }]);
        let diff = diff_groups(&old, &new);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.updated.is_empty());
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let groups = group_map(&[public_peer("ops", b"1")]);
        assert!(diff_groups(&groups, &groups).is_empty());
    }
}
