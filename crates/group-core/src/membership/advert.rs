//! What this node advertises, and the compiled view of every group it
//! knows about.

use super::engine::{EngineState, info_message};
use super::groups::{GroupListing, GroupOrigin, group_data_len};
use super::Result;
use crate::protocol::{GroupAdvert, GroupDataMessage, MsgType};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, warn};

impl EngineState {
    /// Re-encode the cached INFO body under a fresh sequence number.
    ///
    /// INFO travels as far as the widest-reaching peer group (or the ping
    /// settings, whichever is larger).
    pub(super) fn rebuild_info(&mut self) -> Result<()> {
        let (hop_count, flood_prob) = self
            .groups
            .values()
            .filter_map(|g| g.peer_params())
            .fold(
                (self.config.ping_hop_count, self.config.ping_flood_prob),
                |(hop, flood), p| (hop.max(p.hop_count), flood.max(p.flood_prob)),
            );
        let seq = self.info_seq.take();
        let body = info_message(self, seq).encode()?;
        self.transport.check_fits(body.len(), true)?;
        self.info_body = body;
        self.info_hop_count = hop_count;
        self.info_flood_prob = flood_prob;
        debug!("INFO now seq {} with {} groups", seq, self.groups.len());
        Ok(())
    }

    pub(super) fn refresh_info(&mut self) {
        if let Err(e) = self.rebuild_info() {
            warn!("Keeping previous INFO: {}", e);
        }
    }

    pub(super) fn send_info(&mut self) {
        if !self.config.advertise {
            return;
        }
        if let Err(e) = self.transport.broadcast(
            MsgType::Info,
            &self.info_body,
            self.info_hop_count,
            self.info_flood_prob,
            true,
        ) {
            warn!("Failed to send INFO: {}", e);
        }
        let now = self.now();
        self.last_info_ms = now;
        self.last_ping_ms = now;
    }

    pub(super) fn send_ping(&mut self) {
        if let Err(e) = self.transport.broadcast(
            MsgType::Ping,
            &[],
            self.config.ping_hop_count,
            self.config.ping_flood_prob,
            false,
        ) {
            warn!("Failed to send PING: {}", e);
        }
        self.last_ping_ms = self.now();
    }

    /// GROUP_DATA for a peer group, with the group's hop count and flood
    /// probability.
    fn group_data(&self, name: &str, seq: u16) -> Result<Option<(GroupDataMessage, u8, u8)>> {
        let Some(group) = self.groups.get(name) else {
            return Ok(None);
        };
        let Some(params) = group.peer_params() else {
            return Ok(None);
        };
        let unencrypted_len = group_data_len(&params.data)?;
        let data = match group.advert() {
            GroupAdvert::PublicPeer { data, .. } => data,
            GroupAdvert::PrivatePeer { encrypted_data, .. } => encrypted_data,
            _ => return Ok(None),
        };
        let message = GroupDataMessage {
            seq,
            group_name: name.to_string(),
            unencrypted_len,
            data,
        };
        Ok(Some((message, params.hop_count, params.flood_prob)))
    }

    /// Fail if the current data of `name` cannot go out as one GROUP_DATA
    /// packet.
    pub(super) fn check_group_data(&self, name: &str) -> Result<()> {
        if let Some((message, _, _)) = self.group_data(name, self.group_data_seq.current())? {
            self.transport.check_fits(message.encode()?.len(), false)?;
        }
        Ok(())
    }

    /// Announce a peer group's current data.
    pub(super) fn send_group_data(&mut self, name: &str) -> Result<()> {
        let seq = self.group_data_seq.take();
        let Some((message, hop_count, flood_prob)) = self.group_data(name, seq)? else {
            return Ok(());
        };
        let body = message.encode()?;
        self.transport
            .broadcast(MsgType::GroupData, &body, hop_count, flood_prob, false)?;
        self.last_ping_ms = self.now();
        Ok(())
    }

    /// Local groups, then peer groups seen on other nodes, then remote
    /// managed groups under `name@creator`.
    pub(super) fn compiled_groups(&self) -> BTreeMap<String, GroupListing> {
        let mut listing: BTreeMap<String, GroupListing> = self
            .groups
            .values()
            .map(|g| {
                (
                    g.name.clone(),
                    GroupListing {
                        name: g.name.clone(),
                        kind: g.kind(),
                        origin: GroupOrigin::Local,
                    },
                )
            })
            .collect();

        for peer in self.peers.live() {
            for advert in peer.groups.values() {
                let kind = advert.kind();
                let name = advert.name().to_string();
                if kind.is_managed() {
                    let joined = self
                        .joins
                        .get(&name)
                        .is_some_and(|j| j.creator == peer.node_id);
                    listing.insert(
                        format!("{}@{}", name, peer.node_id),
                        GroupListing {
                            name,
                            kind,
                            origin: GroupOrigin::RemoteManaged {
                                creator: peer.node_id.clone(),
                                joined,
                            },
                        },
                    );
                } else {
                    listing.entry(name.clone()).or_insert(GroupListing {
                        name,
                        kind,
                        origin: GroupOrigin::RemotePeer {
                            creator: peer.node_id.clone(),
                        },
                    });
                }
            }
        }
        listing
    }

    pub(super) fn dump_state(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "node {} ({})", self.node_id, self.node_name);
        let _ = writeln!(
            out,
            "running={} advertise={} info_seq={} group_data_seq={}",
            self.running,
            self.config.advertise,
            self.info_seq.last_taken(),
            self.group_data_seq.last_taken()
        );
        for nic in self.transport.local_nics() {
            let _ = writeln!(out, "nic {}/{}", nic.ip, nic.netmask);
        }

        let mut peers: Vec<_> = self.peers.live().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        let _ = writeln!(out, "peers ({})", peers.len());
        for peer in peers {
            let _ = writeln!(
                out,
                "  {} {} last_contact={} pings={} groups=[{}]",
                peer.node_id,
                peer.name,
                peer.last_contact_ms,
                peer.ping_count,
                peer.groups.keys().cloned().collect::<Vec<_>>().join(",")
            );
        }

        let mut dead: Vec<_> = self.peers.dead().map(|p| p.node_id.to_string()).collect();
        dead.sort();
        let _ = writeln!(out, "dead peers ({})", dead.len());
        for node_id in dead {
            let _ = writeln!(out, "  {}", node_id);
        }

        let _ = writeln!(out, "groups ({})", self.groups.len());
        for group in self.groups.values() {
            let members: Vec<String> = group.members.keys().map(|m| m.to_string()).collect();
            let _ = writeln!(out, "  {} {:?} members=[{}]", group.name, group.kind(), members.join(","));
        }

        let _ = writeln!(out, "joins ({})", self.joins.len());
        for join in self.joins.values() {
            let _ = writeln!(out, "  {}@{} {:?}", join.group, join.creator, join.mode);
        }

        let _ = writeln!(out, "searches ({})", self.searches.len());
        for search in self.searches.values() {
            let _ = writeln!(
                out,
                "  {} group={} originator={} ttl={}",
                search.search_id, search.group, search.originator, search.ttl_ms
            );
        }
        out
    }
}
