use super::groups::{
    GroupListing, JoinMode, JoinRecord, LocalGroup, PeerGroupParams, validate_group_name,
};
use super::peers::{Peer, PeerTable};
use super::search::SearchRecord;
use super::{EngineConfig, GroupError, MAX_PARAM_LEN, Result};
use crate::channel::{
    ChannelConnector, ChannelError, ChannelHandler, ChannelRequest, JoinRequest, LeaveRequest,
    Rejection, TcpConnector,
};
use crate::clock::{Clock, SystemClock};
use crate::crypto::{GroupKey, NodeKeyPair};
use crate::events::{EventBus, GroupEvent, Subscription};
use crate::node_id::{NodeId, SearchId};
use crate::protocol::{GroupAdvert, GroupKind, InfoMessage, Nic, SeqCounter};
use crate::settings::{GroupSettings, NodeSettings, SettingsError};
use crate::transport::{InterfaceId, NetworkInterface, Transport, TransportError};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Dissemination settings for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub hop_count: u8,
    pub flood_prob: u8,
    /// 0 one-shot, negative until stopped, positive lifetime in ms.
    pub ttl_ms: i32,
}

/// Hop count and flood probability for a peer group's INFO and GROUP_DATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerGroupOptions {
    pub hop_count: u8,
    pub flood_prob: u8,
}

impl Default for PeerGroupOptions {
    fn default() -> Self {
        Self {
            hop_count: 1,
            flood_prob: 100,
        }
    }
}

/// Everything guarded by the engine lock.
pub(crate) struct EngineState {
    pub(super) config: EngineConfig,
    pub(super) node_id: NodeId,
    pub(super) node_name: String,
    pub(super) keys: NodeKeyPair,
    pub(super) transport: Transport,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) bus: Arc<EventBus>,
    pub(super) groups: BTreeMap<String, LocalGroup>,
    pub(super) joins: BTreeMap<String, JoinRecord>,
    pub(super) peers: PeerTable,
    pub(super) searches: BTreeMap<SearchId, SearchRecord>,
    pub(super) info_seq: SeqCounter,
    pub(super) group_data_seq: SeqCounter,
    /// Encoded INFO body, rebuilt whenever what we advertise changes.
    pub(super) info_body: Vec<u8>,
    pub(super) info_hop_count: u8,
    pub(super) info_flood_prob: u8,
    pub(super) last_info_ms: u64,
    pub(super) last_ping_ms: u64,
    pub(super) running: bool,
}

impl EngineState {
    pub(super) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn view(&self) -> EngineView<'_> {
        EngineView { state: self }
    }

    pub(super) fn emit(&self, event: GroupEvent) {
        self.bus.emit(&event, &self.view());
    }

    fn ensure_name_free(&self, name: &str) -> Result<()> {
        validate_group_name(name)?;
        if self.groups.contains_key(name) {
            return Err(GroupError::DuplicateGroup(name.to_string()));
        }
        Ok(())
    }

    /// Store a new group, advertise it and match it against what peers
    /// already advertise.
    fn add_group(&mut self, group: LocalGroup) -> Result<()> {
        let name = group.name.clone();
        let kind = group.kind();
        self.groups.insert(name.clone(), group);
        if let Err(e) = self.rebuild_info() {
            self.groups.remove(&name);
            return Err(e);
        }
        if self.running {
            self.send_info();
        }
        info!("Created {:?} group '{}'", kind, name);

        if matches!(kind, GroupKind::PublicPeer | GroupKind::PrivatePeer) {
            let matches: Vec<(NodeId, GroupAdvert)> = self
                .peers
                .live()
                .filter_map(|p| p.groups.get(&name).map(|g| (p.node_id.clone(), g.clone())))
                .collect();
            for (peer, advert) in matches {
                self.match_peer_group(&peer, &advert);
            }
        }
        Ok(())
    }

    fn remove_group(&mut self, name: &str) -> Result<LocalGroup> {
        let group = self
            .groups
            .remove(name)
            .ok_or_else(|| GroupError::UnknownGroup(name.to_string()))?;
        self.refresh_info();
        if self.running {
            self.send_info();
        }
        info!("Removed group '{}'", name);
        Ok(group)
    }

    fn update_peer_group_data(
        &mut self,
        name: &str,
        data: Vec<u8>,
        options: PeerGroupOptions,
    ) -> Result<()> {
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| GroupError::UnknownGroup(name.to_string()))?;
        let previous = group.clone();
        group.set_peer_data(data, options.hop_count, options.flood_prob)?;
        if let Err(e) = self.rebuild_info().and_then(|()| self.check_group_data(name)) {
            self.groups.insert(name.to_string(), previous);
            self.refresh_info();
            return Err(e);
        }
        if self.running {
            if let Err(e) = self.send_group_data(name) {
                warn!("Failed to send GROUP_DATA for '{}': {}", name, e);
            }
        }
        Ok(())
    }

    fn prepare_join(
        &self,
        name: &str,
        creator: &NodeId,
        password: Option<&str>,
        join_data: Option<&[u8]>,
    ) -> Result<(SocketAddrV4, ChannelRequest, Option<String>, GroupKind)> {
        if self.joins.contains_key(name) {
            return Err(GroupError::AlreadyJoined(name.to_string()));
        }
        let peer = self
            .peers
            .get(creator)
            .ok_or_else(|| GroupError::UnknownPeer(creator.to_string()))?;
        let advert = peer
            .groups
            .get(name)
            .ok_or_else(|| GroupError::UnknownGroup(name.to_string()))?;

        let nonce = match advert {
            GroupAdvert::PublicManaged { .. } => None,
            GroupAdvert::PrivateManaged {
                encrypted_nonce, ..
            } => {
                let password = password.ok_or(GroupError::InvalidPassword)?;
                let nonce = GroupKey::derive(password)
                    .decrypt_token(encrypted_nonce)
                    .map_err(|_| GroupError::Authentication(name.to_string()))?;
                Some(nonce)
            }
            _ => return Err(GroupError::WrongGroupKind(name.to_string())),
        };
        let (_, addr) = self.transport.route(&peer.nics)?;

        let request = ChannelRequest::Join(JoinRequest {
            kind: advert.kind(),
            node_id: self.node_id.clone(),
            group: name.to_string(),
            join_data: join_data.map(<[u8]>::to_vec),
            public_key: Some(self.keys.public_base64()),
            nonce,
        });
        Ok((addr, request, peer.public_key.clone(), advert.kind()))
    }

    fn handle_join(&mut self, from: Ipv4Addr, request: &JoinRequest) -> std::result::Result<(), Rejection> {
        let Some(group) = self.groups.get(&request.group) else {
            info!("Join for unknown group '{}' from {}", request.group, request.node_id);
            return Err(Rejection::NoSuchGroup);
        };
        if group.kind() != request.kind {
            info!("Join for '{}' names the wrong kind", request.group);
            return Err(Rejection::NoSuchGroup);
        }
        let Some(peer) = self.peers.get(&request.node_id) else {
            info!("Join for '{}' from unknown node {}", request.group, request.node_id);
            return Err(Rejection::UnknownPeer);
        };
        if let Some(secret) = group.secret() {
            if request.nonce.as_deref() != Some(secret.nonce.as_str()) {
                info!("Join for '{}' from {} used the wrong password", request.group, request.node_id);
                return Err(Rejection::BadNonce);
            }
        }

        let member = super::Member {
            node_id: request.node_id.clone(),
            addr: Some(from),
            port: peer.port,
            public_key: request.public_key.clone().or_else(|| peer.public_key.clone()),
            data: request.join_data.clone(),
        };
        if let Some(group) = self.groups.get_mut(&request.group) {
            group.members.insert(member.node_id.clone(), member);
        }
        info!("{} joined group '{}'", request.node_id, request.group);
        self.emit(GroupEvent::NewGroupMember {
            group: request.group.clone(),
            member: request.node_id.clone(),
            data: request.join_data.clone(),
        });
        Ok(())
    }

    fn handle_leave(&mut self, request: &LeaveRequest) -> std::result::Result<(), Rejection> {
        let group = self
            .groups
            .get_mut(&request.group)
            .filter(|g| g.kind().is_managed())
            .ok_or(Rejection::NoSuchGroup)?;
        if group.members.remove(&request.node_id).is_none() {
            return Err(Rejection::NotMember);
        }
        info!("{} left group '{}'", request.node_id, request.group);
        self.emit(GroupEvent::GroupMemberLeft {
            group: request.group.clone(),
            member: request.node_id.clone(),
        });
        Ok(())
    }
}

/// Read-only view of the engine handed to event callbacks.
pub struct EngineView<'a> {
    pub(super) state: &'a EngineState,
}

impl EngineView<'_> {
    pub fn node_id(&self) -> &NodeId {
        &self.state.node_id
    }

    pub fn node_name(&self) -> &str {
        &self.state.node_name
    }

    pub fn peer(&self, node_id: &NodeId) -> Option<&Peer> {
        self.state.peers.get(node_id)
    }

    pub fn is_peer_alive(&self, node_id: &NodeId) -> bool {
        self.state.peers.is_alive(node_id)
    }

    pub fn local_group(&self, name: &str) -> Option<&LocalGroup> {
        self.state.groups.get(name)
    }

    pub fn search(&self, search_id: &SearchId) -> Option<&SearchRecord> {
        self.state.searches.get(search_id)
    }
}

/// The membership engine of one node.
///
/// Share it as `Arc<GroupManager>`: inbound packets go to
/// [`handle_packet`](Self::handle_packet), a timer calls
/// [`tick`](Self::tick) and [`sweep_acks`](Self::sweep_acks) about once a
/// second, and join requests arrive through its [`ChannelHandler`] impl.
pub struct GroupManager {
    state: Mutex<EngineState>,
    bus: Arc<EventBus>,
    connector: Arc<dyn ChannelConnector>,
}

impl GroupManager {
    /// A node with a fresh identity, the wall clock and TCP joins.
    pub fn new(node_name: &str, config: EngineConfig) -> Self {
        Self::with_parts(
            NodeId::generate(),
            node_name,
            NodeKeyPair::generate(),
            config,
            Arc::new(SystemClock),
            Arc::new(TcpConnector::default()),
        )
    }

    pub fn with_parts(
        node_id: NodeId,
        node_name: &str,
        keys: NodeKeyPair,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let now = clock.now_ms();
        let mut state = EngineState {
            transport: Transport::new(node_id.clone(), config.transport_config()),
            node_id,
            node_name: node_name.to_string(),
            keys,
            clock,
            bus: Arc::clone(&bus),
            groups: BTreeMap::new(),
            joins: BTreeMap::new(),
            peers: PeerTable::new(),
            searches: BTreeMap::new(),
            info_seq: SeqCounter::from_clock(now),
            group_data_seq: SeqCounter::from_clock(now),
            info_body: Vec::new(),
            info_hop_count: config.ping_hop_count,
            info_flood_prob: config.ping_flood_prob,
            last_info_ms: now,
            last_ping_ms: now,
            running: false,
            config,
        };
        state.refresh_info();
        Self {
            state: Mutex::new(state),
            bus,
            connector,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&GroupEvent, &EngineView<'_>) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(callback)
    }

    // ==================== Lifecycle ====================

    pub fn add_interface(&self, iface: Box<dyn NetworkInterface>) -> InterfaceId {
        self.lock().transport.add_interface(iface)
    }

    /// Begin advertising. Fails if no interface is attached.
    pub fn start(&self) -> Result<()> {
        let mut st = self.lock();
        if st.transport.interface_count() == 0 {
            return Err(TransportError::NoInterfaces.into());
        }
        st.running = true;
        st.send_info();
        info!("Node {} ({}) started", st.node_id, st.node_name);
        Ok(())
    }

    pub fn stop(&self) {
        let mut st = self.lock();
        st.running = false;
        info!("Node {} stopped", st.node_id);
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Process one inbound datagram that arrived on `iface`.
    pub fn handle_packet(&self, iface: InterfaceId, packet: &[u8]) {
        self.lock().handle_packet(iface, packet);
    }

    /// Periodic PING/INFO and timeout sweep.
    pub fn tick(&self) {
        self.lock().tick();
    }

    /// Retransmit unacknowledged reliable packets. Returns how many went out.
    pub fn sweep_acks(&self) -> usize {
        let mut st = self.lock();
        let now = st.now();
        st.transport.sweep_acks(now)
    }

    // ==================== Groups ====================

    /// Create a managed group, private when a password is given.
    pub fn create_managed_group(&self, name: &str, password: Option<&str>) -> Result<()> {
        let mut st = self.lock();
        st.ensure_name_free(name)?;
        let group = match password {
            Some(password) => LocalGroup::private_managed(name, password)?,
            None => LocalGroup::public_managed(name),
        };
        st.add_group(group)
    }

    /// Create a peer group, private when a password is given.
    pub fn create_peer_group(
        &self,
        name: &str,
        password: Option<&str>,
        data: Option<&[u8]>,
        options: PeerGroupOptions,
    ) -> Result<()> {
        let mut st = self.lock();
        st.ensure_name_free(name)?;
        let params = PeerGroupParams {
            data: data.map(<[u8]>::to_vec).unwrap_or_default(),
            hop_count: options.hop_count,
            flood_prob: options.flood_prob,
        };
        let group = match password {
            Some(password) => LocalGroup::private_peer(name, password, params)?,
            None => LocalGroup::public_peer(name, params),
        };
        st.add_group(group)
    }

    /// Change a peer group's data and announce it with a GROUP_DATA message.
    pub fn update_peer_group_data(
        &self,
        name: &str,
        data: &[u8],
        options: PeerGroupOptions,
    ) -> Result<()> {
        self.lock()
            .update_peer_group_data(name, data.to_vec(), options)
    }

    pub fn remove_group(&self, name: &str) -> Result<()> {
        self.lock().remove_group(name).map(|_| ())
    }

    // ==================== Joins ====================

    /// Join a managed group created by `creator`.
    ///
    /// Blocks on the join channel with the engine unlocked.
    pub fn join_managed_group(
        &self,
        name: &str,
        creator: &NodeId,
        password: Option<&str>,
        mode: JoinMode,
        join_data: Option<&[u8]>,
    ) -> Result<()> {
        let (addr, request, creator_key, kind) =
            self.lock().prepare_join(name, creator, password, join_data)?;

        info!("Joining group '{}' at {}", name, creator);
        self.connector
            .exchange(addr, &request, creator_key.as_deref())
            .map_err(|e| join_error(name, e))?;

        let mut st = self.lock();
        st.joins.insert(
            name.to_string(),
            JoinRecord {
                group: name.to_string(),
                creator: creator.clone(),
                kind,
                mode,
                join_data: join_data.map(<[u8]>::to_vec),
                password: password.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Leave a managed group joined earlier. The join record is dropped
    /// even if the creator can no longer be reached.
    pub fn leave_group(&self, name: &str) -> Result<()> {
        let (record, target) = {
            let mut st = self.lock();
            let record = st
                .joins
                .remove(name)
                .ok_or_else(|| GroupError::NotJoined(name.to_string()))?;
            let target = st.peers.get(&record.creator).map(|peer| {
                (
                    st.transport.route(&peer.nics),
                    peer.public_key.clone(),
                )
            });
            (record, target)
        };
        let (route, creator_key) =
            target.ok_or_else(|| GroupError::UnknownPeer(record.creator.to_string()))?;
        let (_, addr) = route?;

        let request = ChannelRequest::Leave(LeaveRequest {
            node_id: self.node_id(),
            group: name.to_string(),
        });
        info!("Leaving group '{}' at {}", name, record.creator);
        self.connector
            .exchange(addr, &request, creator_key.as_deref())?;
        Ok(())
    }

    // ==================== Searches ====================

    /// Search a peer group with the default hop count, flood probability
    /// and TTL.
    pub fn start_search(&self, group: &str, param: &[u8]) -> Result<SearchId> {
        let options = self.default_search_options();
        self.start_search_with(group, param, options)
    }

    /// Search that is re-broadcast until [`stop_search`](Self::stop_search).
    pub fn start_persistent_search(&self, group: &str, param: &[u8]) -> Result<SearchId> {
        let options = SearchOptions {
            ttl_ms: -1,
            ..self.default_search_options()
        };
        self.start_search_with(group, param, options)
    }

    pub fn start_search_with(
        &self,
        group: &str,
        param: &[u8],
        options: SearchOptions,
    ) -> Result<SearchId> {
        check_param(param)?;
        self.lock().start_search(group, param, options)
    }

    pub fn stop_search(&self, search_id: &SearchId) -> Result<()> {
        let mut st = self.lock();
        st.searches
            .remove(search_id)
            .ok_or_else(|| GroupError::UnknownSearch(search_id.to_string()))?;
        info!("Stopped search {}", search_id);
        Ok(())
    }

    pub fn respond_to_search(&self, search_id: &SearchId, param: &[u8]) -> Result<()> {
        check_param(param)?;
        self.lock().respond_to_search(search_id, param)
    }

    /// Re-deliver every still-live search from other nodes, for an
    /// application whose answers may have changed.
    pub fn status_changed(&self) {
        self.lock().status_changed();
    }

    fn default_search_options(&self) -> SearchOptions {
        let st = self.lock();
        SearchOptions {
            hop_count: st.config.search_hop_count,
            flood_prob: st.config.search_flood_prob,
            ttl_ms: st.config.search_ttl_ms,
        }
    }

    // ==================== Persistence ====================

    /// Snapshot of identity, counters and local groups.
    pub fn settings_snapshot(&self) -> NodeSettings {
        let st = self.lock();
        let groups = st
            .groups
            .values()
            .map(|g| {
                let params = g.peer_params();
                GroupSettings {
                    name: g.name.clone(),
                    kind: g.kind(),
                    password: g.secret().map(|s| s.password.clone()),
                    data: params.map(|p| p.data.clone()).unwrap_or_default(),
                    hop_count: params.map_or(1, |p| p.hop_count),
                    flood_prob: params.map_or(100, |p| p.flood_prob),
                }
            })
            .collect();
        NodeSettings {
            port: st.config.port,
            node_id: st.node_id.clone(),
            node_name: st.node_name.clone(),
            info_seq: st.info_seq.last_taken(),
            group_data_seq: st.group_data_seq.last_taken(),
            public_key: st.keys.public_base64(),
            private_key: st.keys.secret_base64(),
            groups,
        }
    }

    /// Rebuild a node from a snapshot. `config.port` is replaced by the
    /// stored port and both counters resume after the stored values.
    pub fn restore(
        settings: &NodeSettings,
        mut config: EngineConfig,
        clock: Arc<dyn Clock>,
        connector: Arc<dyn ChannelConnector>,
    ) -> std::result::Result<Self, SettingsError> {
        let keys = NodeKeyPair::from_secret_base64(&settings.private_key)?;
        if keys.public_base64() != settings.public_key {
            return Err(SettingsError::KeyMismatch);
        }
        config.port = settings.port;
        let manager = Self::with_parts(
            settings.node_id.clone(),
            &settings.node_name,
            keys,
            config,
            clock,
            connector,
        );
        {
            let mut st = manager.lock();
            st.info_seq = SeqCounter::resume_after(settings.info_seq);
            st.group_data_seq = SeqCounter::resume_after(settings.group_data_seq);
            for group in &settings.groups {
                st.ensure_name_free(&group.name)?;
                let params = PeerGroupParams {
                    data: group.data.clone(),
                    hop_count: group.hop_count,
                    flood_prob: group.flood_prob,
                };
                let password = group.password.as_deref().ok_or(GroupError::InvalidPassword);
                let local = match group.kind {
                    GroupKind::PublicManaged => LocalGroup::public_managed(&group.name),
                    GroupKind::PrivateManaged => LocalGroup::private_managed(&group.name, password?)?,
                    GroupKind::PublicPeer => LocalGroup::public_peer(&group.name, params),
                    GroupKind::PrivatePeer => LocalGroup::private_peer(&group.name, password?, params)?,
                };
                st.groups.insert(group.name.clone(), local);
            }
            st.rebuild_info()?;
        }
        info!(
            "Restored node {} with {} groups",
            settings.node_id,
            settings.groups.len()
        );
        Ok(manager)
    }

    // ==================== Settings ====================

    pub fn config(&self) -> EngineConfig {
        self.lock().config.clone()
    }

    /// When disabled no PING or INFO is sent; searches still work.
    pub fn set_node_advertisement(&self, advertise: bool) {
        self.lock().config.advertise = advertise;
    }

    pub fn set_node_name(&self, name: &str) {
        let mut st = self.lock();
        st.node_name = name.to_string();
        st.refresh_info();
    }

    pub fn set_ping_interval(&self, interval_ms: u64) {
        let mut st = self.lock();
        st.config.ping_interval_ms = interval_ms;
        st.refresh_info();
    }

    pub fn set_ping_hop_count(&self, hop_count: u8) {
        let mut st = self.lock();
        st.config.ping_hop_count = hop_count;
        st.refresh_info();
    }

    pub fn set_ping_flood_probability(&self, flood_prob: u8) {
        let mut st = self.lock();
        st.config.ping_flood_prob = flood_prob;
        st.refresh_info();
    }

    pub fn set_info_interval(&self, interval_ms: u64) {
        self.lock().config.info_interval_ms = interval_ms;
    }

    pub fn set_node_timeout_factor(&self, factor: u8) {
        self.lock().config.node_timeout_factor = factor;
    }

    pub fn set_search_hop_count(&self, hop_count: u8) {
        self.lock().config.search_hop_count = hop_count;
    }

    pub fn set_search_flood_probability(&self, flood_prob: u8) {
        self.lock().config.search_flood_prob = flood_prob;
    }

    pub fn set_search_ttl(&self, ttl_ms: i32) {
        self.lock().config.search_ttl_ms = ttl_ms;
    }

    pub fn set_search_resend_interval(&self, interval_ms: u64) {
        self.lock().config.search_resend_interval_ms = interval_ms;
    }

    // ==================== Accessors ====================

    pub fn node_id(&self) -> NodeId {
        self.lock().node_id.clone()
    }

    pub fn node_name(&self) -> String {
        self.lock().node_name.clone()
    }

    pub fn public_key(&self) -> String {
        self.lock().keys.public_base64()
    }

    pub fn is_peer_alive(&self, node_id: &NodeId) -> bool {
        self.lock().peers.is_alive(node_id)
    }

    pub fn peer_info(&self, node_id: &NodeId) -> Option<Peer> {
        self.lock().peers.get(node_id).cloned()
    }

    pub fn peer_node_name(&self, node_id: &NodeId) -> Option<String> {
        self.lock().peers.get(node_id).map(|p| p.name.clone())
    }

    pub fn peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.lock().peers.live().cloned().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    pub fn local_group_info(&self, name: &str) -> Option<LocalGroup> {
        self.lock().groups.get(name).cloned()
    }

    /// Local groups of one kind, by name.
    pub fn local_groups(&self, kind: GroupKind) -> Vec<LocalGroup> {
        self.lock()
            .groups
            .values()
            .filter(|g| g.kind() == kind)
            .cloned()
            .collect()
    }

    /// Local groups, peer groups seen elsewhere, and remote managed groups
    /// keyed `name@creator`.
    pub fn groups(&self) -> BTreeMap<String, GroupListing> {
        self.lock().compiled_groups()
    }

    pub fn joined_groups(&self) -> Vec<JoinRecord> {
        self.lock().joins.values().cloned().collect()
    }

    pub fn searches(&self) -> Vec<SearchRecord> {
        self.lock().searches.values().cloned().collect()
    }

    pub fn active_nics(&self) -> Vec<Nic> {
        self.lock().transport.local_nics()
    }

    pub fn pending_acks(&self) -> usize {
        self.lock().transport.pending_acks()
    }

    /// Multi-line listing of peers, groups, joins and searches.
    pub fn dump_state(&self) -> String {
        self.lock().dump_state()
    }
}

impl ChannelHandler for GroupManager {
    fn open_request(&self, encrypted: &[u8]) -> crate::channel::Result<Vec<u8>> {
        Ok(self.lock().keys.decrypt(encrypted)?)
    }

    fn handle_join(&self, from: Ipv4Addr, request: &JoinRequest) -> std::result::Result<(), Rejection> {
        self.lock().handle_join(from, request)
    }

    fn handle_leave(
        &self,
        _from: Ipv4Addr,
        request: &LeaveRequest,
    ) -> std::result::Result<(), Rejection> {
        self.lock().handle_leave(request)
    }
}

fn check_param(param: &[u8]) -> Result<()> {
    if param.len() > MAX_PARAM_LEN {
        return Err(GroupError::ParamTooLarge {
            len: param.len(),
            max: MAX_PARAM_LEN,
        });
    }
    Ok(())
}

fn join_error(group: &str, e: ChannelError) -> GroupError {
    if e.is_bad_nonce() {
        GroupError::Authentication(group.to_string())
    } else {
        warn!("Join of '{}' failed: {}", group, e);
        GroupError::Channel(e)
    }
}

/// INFO message as this node currently advertises it.
pub(super) fn info_message(state: &EngineState, seq: u16) -> InfoMessage {
    InfoMessage {
        seq,
        ping_interval_ms: u32::try_from(state.config.ping_interval_ms).unwrap_or(u32::MAX),
        node_name: state.node_name.clone(),
        public_key: Some(state.keys.public_base64()),
        groups: state.groups.values().map(LocalGroup::advert).collect(),
    }
}
