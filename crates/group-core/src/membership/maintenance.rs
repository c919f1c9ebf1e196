//! Periodic work: PING/INFO cadence, peer timeouts and search upkeep.

use super::engine::EngineState;
use super::groups::JoinMode;
use crate::events::GroupEvent;
use crate::node_id::{NodeId, SearchId};
use tracing::{debug, info, warn};

impl EngineState {
    pub(super) fn tick(&mut self) {
        let now = self.now();
        if self.running && self.config.advertise {
            if now.saturating_sub(self.last_info_ms) > self.config.info_interval_ms {
                self.send_info();
            } else if now.saturating_sub(self.last_ping_ms) > self.config.ping_interval_ms {
                self.send_ping();
            }
        }
        self.timeout_nodes(now);
        self.timeout_searches(now);
    }

    /// Retire peers that went quiet for longer than their ping interval
    /// times the timeout factor.
    fn timeout_nodes(&mut self, now: u64) {
        for node_id in self.peers.expired(now, self.config.node_timeout_factor) {
            self.retire_peer(&node_id);
        }
    }

    fn retire_peer(&mut self, node_id: &NodeId) {
        let left: Vec<String> = self
            .groups
            .iter_mut()
            .filter_map(|(name, g)| g.members.remove(node_id).map(|_| name.clone()))
            .collect();
        for group in left {
            self.emit(GroupEvent::GroupMemberLeft {
                group,
                member: node_id.clone(),
            });
        }

        let retracted: Vec<String> = self
            .joins
            .values()
            .filter(|j| &j.creator == node_id && j.mode == JoinMode::OneTimeOnly)
            .map(|j| j.group.clone())
            .collect();
        for group in retracted {
            self.joins.remove(&group);
            info!("Dropped join of '{}' after its creator {} died", group, node_id);
        }

        self.emit(GroupEvent::DeadPeer {
            node_id: node_id.clone(),
        });
        self.peers.bury(node_id);
        self.transport.forget_sender(node_id);
        info!("Peer {} timed out", node_id);
    }

    /// Drop expired searches and re-broadcast our own persistent ones.
    fn timeout_searches(&mut self, now: u64) {
        let lease = self.config.search_lease_ms;
        let resend = self.config.search_resend_interval_ms;
        let ids: Vec<SearchId> = self.searches.keys().cloned().collect();

        for search_id in ids {
            let Some(record) = self.searches.get(&search_id) else {
                continue;
            };
            let own = record.originator == self.node_id;

            if record.is_expired(&self.node_id, now, lease) {
                let Some(record) = self.searches.remove(&search_id) else {
                    continue;
                };
                debug!("Search {} expired", search_id);
                if !(own && record.ttl_ms == 0) {
                    self.emit(GroupEvent::PersistentPeerSearchTerminated {
                        group: record.group,
                        originator: record.originator,
                        search_id,
                    });
                }
                continue;
            }

            if !own || !record.resend_due(now, resend) {
                continue;
            }
            let (msg_type, hop_count, flood_prob) =
                (record.msg_type(), record.hop_count, record.flood_prob);
            let message = match record.current_message(now) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Cannot re-encode search {}: {}", search_id, e);
                    continue;
                }
            };
            if let Err(e) = self
                .transport
                .broadcast(msg_type, &message, hop_count, flood_prob, true)
            {
                warn!("Re-broadcast of search {} failed: {}", search_id, e);
            }
            if let Some(record) = self.searches.get_mut(&search_id) {
                record.last_tx_ms = now;
            }
        }
    }
}
