//! Inbound message handling.

use super::engine::{EngineState, SearchOptions};
use super::groups::{LocalGroupDetail, Member, open_data};
use super::peers::{Peer, diff_groups, group_map};
use super::search::SearchRecord;
use super::{GroupError, Result};
use crate::crypto::encrypt_for;
use crate::events::GroupEvent;
use crate::node_id::{NodeId, SearchId};
use crate::protocol::{
    GroupAdvert, GroupDataMessage, GroupKind, InfoMessage, Message, MsgType, Nic, PacketHeader,
    PeerSearchMessage, PrivateSearchMessage, SearchReplyMessage, is_fresher,
};
use crate::transport::{Delivery, InterfaceId, Receipt};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

impl EngineState {
    pub(super) fn handle_packet(&mut self, arrival: InterfaceId, packet: &[u8]) {
        let inbound = match self.transport.receive(arrival, packet) {
            Receipt::Deliver(inbound) => inbound,
            Receipt::Acked { seq, pending } => {
                if !pending {
                    debug!("ACK for seq {} matched nothing", seq);
                }
                return;
            }
            Receipt::Dropped(reason) => {
                debug!("Dropped packet on {}: {:?}", arrival, reason);
                return;
            }
        };

        let header = &inbound.header;
        let message =
            MsgType::from_u8(header.msg_type).and_then(|t| Message::decode(t, inbound.body));
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("Invalid message {} from {}: {}", header.msg_type, header.sender, e);
                return;
            }
        };

        let now = self.now();
        if let Some(peer) = self.peers.get_mut(&header.sender) {
            peer.touch(now);
        }
        self.dispatch(header, message, inbound.body, now);
        self.transport.relay(&inbound, packet);
    }

    fn dispatch(&mut self, header: &PacketHeader, message: Message, body: &[u8], now: u64) {
        let sender = &header.sender;
        match message {
            Message::Ping => self.handle_ping(sender, now),
            Message::Info(info) => self.handle_info(sender, header.nics.clone(), info, now),
            Message::GroupData(data) => self.handle_group_data(sender, data),
            Message::PeerSearch(search) => {
                let record = SearchRecord {
                    search_id: search.search_id,
                    group: search.group_name,
                    private: false,
                    ttl_ms: search.ttl,
                    hop_count: header.hop_count.saturating_sub(1),
                    flood_prob: header.flood_prob,
                    message: body.to_vec(),
                    originator: search.originator,
                    public_key: search.public_key,
                    nics: search.nics,
                    created_ms: now,
                    last_tx_ms: now,
                    last_rx_ms: now,
                };
                self.handle_search(record, now);
            }
            Message::PeerSearchPpg(search) => {
                let record = SearchRecord {
                    search_id: search.search_id,
                    group: search.group_name,
                    private: true,
                    ttl_ms: search.ttl,
                    hop_count: header.hop_count.saturating_sub(1),
                    flood_prob: header.flood_prob,
                    message: body.to_vec(),
                    originator: search.originator,
                    public_key: search.public_key,
                    nics: search.nics,
                    created_ms: now,
                    last_tx_ms: now,
                    last_rx_ms: now,
                };
                self.handle_search(record, now);
            }
            Message::PeerSearchReply(reply) => self.handle_reply(sender, reply),
        }
    }

    // ==================== PING / INFO ====================

    fn handle_ping(&mut self, sender: &NodeId, now: u64) {
        if self.peers.is_alive(sender) {
            return;
        }
        if self.peers.revive(sender, now) {
            info!("Peer {} is back", sender);
            self.welcome_peer(sender, now);
        }
        // Unknown or just revived: let it learn about us
        self.send_info();
    }

    fn handle_info(&mut self, sender: &NodeId, nics: Vec<Nic>, info: InfoMessage, now: u64) {
        if !self.peers.is_alive(sender) {
            if self.peers.revive(sender, now) {
                info!("Peer {} is back", sender);
                // A restarted node picks a new counter; take this INFO as is
                if let Some(peer) = self.peers.get_mut(sender) {
                    peer.info_seq = info.seq.wrapping_sub(1);
                }
                self.welcome_peer(sender, now);
            } else {
                let addr = self.transport.route(&nics).ok().map(|(_, a)| *a.ip());
                let peer = Peer::from_info(sender.clone(), &info, nics, addr, self.config.port, now);
                info!("New peer {} ({})", sender, peer.name);
                self.peers.insert(peer);
                self.send_info();
                self.welcome_peer(sender, now);
                return;
            }
        }
        self.update_peer(sender, nics, info);
    }

    /// Announce a peer that just became live and match what it advertises.
    fn welcome_peer(&mut self, sender: &NodeId, now: u64) {
        self.emit(GroupEvent::NewPeer {
            node_id: sender.clone(),
        });
        self.forward_persistent_searches(sender, now);
        let adverts: Vec<GroupAdvert> = self
            .peers
            .get(sender)
            .map(|p| p.groups.values().cloned().collect())
            .unwrap_or_default();
        for advert in adverts {
            self.match_peer_group(sender, &advert);
        }
    }

    fn update_peer(&mut self, sender: &NodeId, nics: Vec<Nic>, info: InfoMessage) {
        let addr = self.transport.route(&nics).ok().map(|(_, a)| *a.ip());
        let Some(peer) = self.peers.get_mut(sender) else {
            return;
        };
        if !is_fresher(info.seq, peer.info_seq) {
            debug!("Stale INFO {} from {} (have {})", info.seq, sender, peer.info_seq);
            return;
        }
        peer.info_seq = info.seq;
        peer.ping_interval_ms = info.ping_interval_ms;
        peer.name = info.node_name;
        peer.public_key = info.public_key;
        if !nics.is_empty() {
            peer.nics = nics;
            peer.addr = addr;
        }
        let groups = group_map(&info.groups);
        let diff = diff_groups(&peer.groups, &groups);
        peer.groups = groups;
        if diff.is_empty() {
            return;
        }

        for advert in &diff.removed {
            self.drop_peer_member(advert.name(), sender);
        }
        for advert in &diff.added {
            self.match_peer_group(sender, advert);
        }
        for advert in &diff.updated {
            self.refresh_member_data(sender, advert);
        }
        self.emit(GroupEvent::GroupListChanged {
            node_id: sender.clone(),
        });
    }

    // ==================== Peer group matching ====================

    /// Add `sender` to our peer group of the same name if the kinds agree
    /// and, for private groups, the password does.
    pub(super) fn match_peer_group(&mut self, sender: &NodeId, advert: &GroupAdvert) {
        let name = advert.name();
        let Some(local) = self.groups.get(name) else {
            return;
        };
        let data = match (&local.detail, advert) {
            (LocalGroupDetail::PublicPeer { .. }, GroupAdvert::PublicPeer { data, .. }) => {
                data.clone()
            }
            (
                LocalGroupDetail::PrivatePeer { secret, .. },
                GroupAdvert::PrivatePeer {
                    encrypted_group_name,
                    unencrypted_len,
                    encrypted_data,
                    ..
                },
            ) => {
                if !secret.key.token_matches(encrypted_group_name, name) {
                    info!("Peer {} uses another password for '{}'", sender, name);
                    self.emit_conflict(name, sender);
                    return;
                }
                match open_data(&secret.key, encrypted_data, *unencrypted_len) {
                    Some(data) => data,
                    None => {
                        warn!("Cannot open group data of '{}' from {}", name, sender);
                        return;
                    }
                }
            }
            (LocalGroupDetail::PublicPeer { .. }, GroupAdvert::PrivatePeer { .. })
            | (LocalGroupDetail::PrivatePeer { .. }, GroupAdvert::PublicPeer { .. }) => {
                info!("Peer {} advertises '{}' with the other privacy", sender, name);
                self.emit_conflict(name, sender);
                return;
            }
            _ => return,
        };

        let Some(member) = self.member_for(sender, Some(data.clone())) else {
            return;
        };
        let name = name.to_string();
        if let Some(group) = self.groups.get_mut(&name) {
            group.members.insert(sender.clone(), member);
        }
        debug!("{} joined peer group '{}'", sender, name);
        self.emit(GroupEvent::NewGroupMember {
            group: name,
            member: sender.clone(),
            data: Some(data),
        });
    }

    fn emit_conflict(&self, name: &str, sender: &NodeId) {
        self.emit(GroupEvent::ConflictWithPrivatePeerGroup {
            group: name.to_string(),
            node_id: sender.clone(),
        });
    }

    fn member_for(&self, node_id: &NodeId, data: Option<Vec<u8>>) -> Option<Member> {
        let peer = self.peers.get(node_id)?;
        Some(Member {
            node_id: node_id.clone(),
            addr: peer.addr,
            port: peer.port,
            public_key: peer.public_key.clone(),
            data,
        })
    }

    fn drop_peer_member(&mut self, name: &str, sender: &NodeId) {
        let Some(group) = self.groups.get_mut(name) else {
            return;
        };
        if group.peer_params().is_none() || group.members.remove(sender).is_none() {
            return;
        }
        debug!("{} left peer group '{}'", sender, name);
        self.emit(GroupEvent::GroupMemberLeft {
            group: name.to_string(),
            member: sender.clone(),
        });
    }

    /// Same group, new content: keep a member's copy of the data current,
    /// or try matching again if it was not a member yet.
    fn refresh_member_data(&mut self, sender: &NodeId, advert: &GroupAdvert) {
        let is_member = self
            .groups
            .get(advert.name())
            .is_some_and(|g| g.has_member(sender));
        if !is_member {
            self.match_peer_group(sender, advert);
            return;
        }
        if let Some(data) = self.readable_data(advert) {
            self.store_member_data(advert.name(), sender, data);
        }
    }

    /// Plaintext data of a remote peer group advert, if we hold a matching
    /// local group that can read it.
    fn readable_data(&self, advert: &GroupAdvert) -> Option<Vec<u8>> {
        let local = self.groups.get(advert.name())?;
        match (&local.detail, advert) {
            (LocalGroupDetail::PublicPeer { .. }, GroupAdvert::PublicPeer { data, .. }) => {
                Some(data.clone())
            }
            (
                LocalGroupDetail::PrivatePeer { secret, .. },
                GroupAdvert::PrivatePeer {
                    unencrypted_len,
                    encrypted_data,
                    ..
                },
            ) => open_data(&secret.key, encrypted_data, *unencrypted_len),
            _ => None,
        }
    }

    /// Update a member's data and report it if it changed.
    fn store_member_data(&mut self, name: &str, sender: &NodeId, data: Vec<u8>) {
        let Some(member) = self
            .groups
            .get_mut(name)
            .and_then(|g| g.members.get_mut(sender))
        else {
            return;
        };
        if member.data.as_deref() == Some(data.as_slice()) {
            return;
        }
        member.data = Some(data.clone());
        self.emit(GroupEvent::PeerGroupDataChanged {
            group: name.to_string(),
            node_id: sender.clone(),
            data,
        });
    }

    // ==================== GROUP_DATA ====================

    fn handle_group_data(&mut self, sender: &NodeId, message: GroupDataMessage) {
        let Some(peer) = self.peers.get_mut(sender) else {
            debug!("GROUP_DATA from unknown {}", sender);
            self.send_info();
            return;
        };
        if let Some(last) = peer.group_data_seq {
            if !is_fresher(message.seq, last) {
                debug!("Stale GROUP_DATA {} from {} (have {})", message.seq, sender, last);
                return;
            }
        }
        peer.group_data_seq = Some(message.seq);

        let Some(advert) = peer.groups.get_mut(&message.group_name) else {
            warn!(
                "GROUP_DATA from {} for unadvertised group '{}'",
                sender, message.group_name
            );
            return;
        };
        match advert {
            GroupAdvert::PublicPeer { data, .. } => *data = message.data,
            GroupAdvert::PrivatePeer {
                encrypted_data,
                unencrypted_len,
                ..
            } => {
                *encrypted_data = message.data;
                *unencrypted_len = message.unencrypted_len;
            }
            _ => {
                debug!("GROUP_DATA for managed group '{}'", message.group_name);
                return;
            }
        }
        let advert = advert.clone();

        if let Some(data) = self.readable_data(&advert) {
            self.store_member_data(advert.name(), sender, data);
        }
    }

    // ==================== Searches ====================

    fn handle_search(&mut self, record: SearchRecord, now: u64) {
        if let Some(known) = self.searches.get_mut(&record.search_id) {
            known.last_rx_ms = now;
            return;
        }
        let search_id = record.search_id.clone();
        debug!(
            "Search {} for '{}' from {}",
            search_id, record.group, record.originator
        );
        self.searches.insert(search_id.clone(), record);
        self.deliver_search(&search_id);
    }

    /// Raise a search request event if we are in the searched group and the
    /// originator is one of its members.
    pub(super) fn deliver_search(&self, search_id: &SearchId) {
        let Some(record) = self.searches.get(search_id) else {
            return;
        };
        if record.originator == self.node_id {
            return;
        }
        let Some(local) = self.groups.get(&record.group) else {
            return;
        };
        if !local.has_member(&record.originator) {
            debug!(
                "Search {} from non-member {} of '{}'",
                search_id, record.originator, record.group
            );
            return;
        }

        let param = match (&local.detail, Message::decode(record.msg_type(), &record.message)) {
            (LocalGroupDetail::PublicPeer { .. }, Ok(Message::PeerSearch(search))) => search.param,
            (LocalGroupDetail::PrivatePeer { secret, .. }, Ok(Message::PeerSearchPpg(search))) => {
                if !secret.key.token_matches(&search.encrypted_group_name, &record.group) {
                    warn!("Search {} is not sealed with our key for '{}'", search_id, record.group);
                    return;
                }
                match open_data(&secret.key, &search.encrypted_param, search.unencrypted_len) {
                    Some(param) => param,
                    None => {
                        warn!("Cannot open parameter of search {}", search_id);
                        return;
                    }
                }
            }
            _ => return,
        };
        self.emit(GroupEvent::PeerSearchRequestReceived {
            group: record.group.clone(),
            originator: record.originator.clone(),
            search_id: search_id.clone(),
            param,
        });
    }

    fn handle_reply(&mut self, sender: &NodeId, reply: SearchReplyMessage) {
        let Some(record) = self.searches.get(&reply.search_id) else {
            debug!("Reply from {} to unknown search {}", sender, reply.search_id);
            return;
        };
        if record.originator != self.node_id {
            debug!("Reply from {} to foreign search {}", sender, reply.search_id);
            return;
        }
        if !self
            .groups
            .get(&record.group)
            .is_some_and(|g| g.peer_params().is_some())
        {
            warn!("Reply to search {} for a group we left", reply.search_id);
            return;
        }
        let opened = self.keys.decrypt(&reply.param);
        let param = match opened {
            Ok(param) => param,
            Err(_) if record.public_key.is_none() => reply.param,
            Err(e) => {
                warn!("Cannot open reply from {}: {}", sender, e);
                return;
            }
        };
        self.emit(GroupEvent::PeerSearchResultReceived {
            group: record.group.clone(),
            responder: sender.clone(),
            search_id: reply.search_id,
            param,
        });
    }

    pub(super) fn start_search(
        &mut self,
        group: &str,
        param: &[u8],
        options: SearchOptions,
    ) -> Result<SearchId> {
        let local = self
            .groups
            .get(group)
            .ok_or_else(|| GroupError::NotAMember(group.to_string()))?;
        let search_id = SearchId::generate();
        let nics = self.transport.local_nics();
        let ttl = options.ttl_ms.max(-1);
        let public_key = Some(self.keys.public_base64());

        let (private, message) = match &local.detail {
            LocalGroupDetail::PublicPeer { .. } => (
                false,
                PeerSearchMessage {
                    originator: self.node_id.clone(),
                    nics: nics.clone(),
                    ttl,
                    search_id: search_id.clone(),
                    public_key: public_key.clone(),
                    group_name: group.to_string(),
                    param: param.to_vec(),
                }
                .encode()?,
            ),
            LocalGroupDetail::PrivatePeer { secret, .. } => (
                true,
                PrivateSearchMessage {
                    originator: self.node_id.clone(),
                    nics: nics.clone(),
                    ttl,
                    search_id: search_id.clone(),
                    public_key: public_key.clone(),
                    group_name: group.to_string(),
                    encrypted_group_name: secret.key.encrypt_token(group)?,
                    unencrypted_len: param.len() as u16,
                    encrypted_param: if param.is_empty() {
                        Vec::new()
                    } else {
                        secret.key.encrypt(param)?
                    },
                }
                .encode()?,
            ),
            _ => return Err(GroupError::WrongGroupKind(group.to_string())),
        };

        let now = self.now();
        let record = SearchRecord {
            search_id: search_id.clone(),
            group: group.to_string(),
            private,
            ttl_ms: ttl,
            hop_count: options.hop_count,
            flood_prob: options.flood_prob,
            message,
            originator: self.node_id.clone(),
            public_key,
            nics,
            created_ms: now,
            last_tx_ms: now,
            last_rx_ms: now,
        };
        self.transport.broadcast(
            record.msg_type(),
            &record.message,
            record.hop_count,
            record.flood_prob,
            true,
        )?;
        self.searches.insert(search_id.clone(), record);
        self.last_ping_ms = now;
        info!("Started search {} in '{}' (ttl {})", search_id, group, ttl);
        Ok(search_id)
    }

    pub(super) fn respond_to_search(&mut self, search_id: &SearchId, param: &[u8]) -> Result<()> {
        let record = self
            .searches
            .get(search_id)
            .ok_or_else(|| GroupError::UnknownSearch(search_id.to_string()))?;
        if !self
            .groups
            .get(&record.group)
            .is_some_and(|g| g.peer_params().is_some())
        {
            return Err(GroupError::NotAMember(record.group.clone()));
        }
        let param = match &record.public_key {
            Some(key) => encrypt_for(key, param)?,
            None => param.to_vec(),
        };
        let body = SearchReplyMessage {
            search_id: search_id.clone(),
            param,
        }
        .encode()?;
        let (originator, nics) = (record.originator.clone(), record.nics.clone());
        let delivery = self.transport.default_reliable();
        let now = self.now();
        self.transport.send_unicast(
            &originator,
            &nics,
            MsgType::PeerSearchReply,
            &body,
            delivery,
            now,
        )?;
        Ok(())
    }

    /// Hand cached persistent searches to a peer that just appeared, if it
    /// advertises the searched group.
    fn forward_persistent_searches(&mut self, peer_id: &NodeId, now: u64) {
        let Some(peer) = self.peers.get(peer_id) else {
            return;
        };
        let nics = peer.nics.clone();
        let peer_groups: BTreeSet<(String, GroupKind)> = peer
            .groups
            .values()
            .filter(|g| !g.kind().is_managed())
            .map(|g| (g.name().to_string(), g.kind()))
            .collect();

        let candidates: Vec<SearchId> = self
            .searches
            .values()
            .filter(|r| r.is_persistent() && &r.originator != peer_id)
            .filter(|r| {
                let kind = if r.private {
                    GroupKind::PrivatePeer
                } else {
                    GroupKind::PublicPeer
                };
                peer_groups.contains(&(r.group.clone(), kind))
            })
            .map(|r| r.search_id.clone())
            .collect();

        for search_id in candidates {
            let Some(record) = self.searches.get(&search_id) else {
                continue;
            };
            if record.ttl_ms > 0 && record.remaining_ttl(now) <= 0 {
                self.searches.remove(&search_id);
                continue;
            }
            let (msg_type, message) = match record.current_message(now) {
                Ok(message) => (record.msg_type(), message),
                Err(e) => {
                    warn!("Cannot forward search {}: {}", search_id, e);
                    continue;
                }
            };
            if let Err(e) =
                self.transport
                    .send_unicast(peer_id, &nics, msg_type, &message, Delivery::Unreliable, now)
            {
                warn!("Forwarding search {} to {} failed: {}", search_id, peer_id, e);
            }
        }
    }

    pub(super) fn status_changed(&mut self) {
        let now = self.now();
        let ids: Vec<SearchId> = self.searches.keys().cloned().collect();
        for search_id in ids {
            let expired = self
                .searches
                .get(&search_id)
                .is_some_and(|r| r.ttl_ms > 0 && r.remaining_ttl(now) <= 0);
            if expired {
                self.searches.remove(&search_id);
                continue;
            }
            self.deliver_search(&search_id);
        }
    }
}
