//! Assembling a running node from config and saved state.

use crate::config::{DaemonConfig, GroupConfig, InterfaceConfig, JoinConfig, SearchConfig};
use crate::tcp_relay::TcpRelayInterface;
use crate::udp::{Routes, UdpInterface};
use anyhow::{Context, Result, bail};
use group_core::channel::TcpConnector;
use group_core::crypto::NodeKeyPair;
use group_core::transport::{InterfaceRegistry, InterfaceSpec};
use group_core::{
    EngineConfig, GroupError, GroupEvent, GroupManager, InterfaceId, InterfaceKind, NetworkInterface,
    Nic, NodeId, NodeSettings, PeerGroupOptions, Subscription, SystemClock,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MULTICAST_GROUP;

/// How long a configured join waits before trying again.
pub const JOIN_RETRY: Duration = Duration::from_secs(2);

/// Every interface kind this daemon can build.
pub fn interface_registry() -> InterfaceRegistry {
    let mut registry = InterfaceRegistry::new();
    registry.register(InterfaceKind::UdpBroadcast, |spec| {
        Ok(Box::new(UdpInterface::broadcast(spec)?) as Box<dyn NetworkInterface>)
    });
    registry.register(InterfaceKind::UdpMulticast, |spec| {
        Ok(Box::new(UdpInterface::multicast(spec)?) as Box<dyn NetworkInterface>)
    });
    registry.register(InterfaceKind::UdpMulticastNoRelay, |spec| {
        Ok(Box::new(UdpInterface::multicast(spec)?) as Box<dyn NetworkInterface>)
    });
    registry.register(InterfaceKind::TcpRelay, |spec| {
        Ok(Box::new(TcpRelayInterface::from_spec(spec)?) as Box<dyn NetworkInterface>)
    });
    registry
}

/// A fresh node, or the one saved in `saved`. A CLI node id only applies to
/// fresh nodes.
pub fn build_manager(
    config: &DaemonConfig,
    saved: Option<&NodeSettings>,
    node_id: Option<NodeId>,
) -> Result<GroupManager> {
    let engine = config.engine_config();
    let clock = Arc::new(SystemClock);
    let connector = Arc::new(TcpConnector::default());
    match saved {
        Some(settings) => {
            if let Some(id) = node_id.as_ref().filter(|id| **id != settings.node_id) {
                warn!("Ignoring node id {}, saved state is for {}", id, settings.node_id);
            }
            let manager = GroupManager::restore(settings, engine, clock, connector)
                .context("restoring saved node state")?;
            if manager.node_name() != config.node_name {
                manager.set_node_name(&config.node_name);
            }
            if settings.port != config.port {
                warn!("Using saved port {} instead of {}", settings.port, config.port);
            }
            Ok(manager)
        }
        None => {
            let id = node_id.unwrap_or_else(NodeId::generate);
            info!("Creating node {}", id);
            Ok(GroupManager::with_parts(
                id,
                &config.node_name,
                NodeKeyPair::generate(),
                engine,
                clock,
                connector,
            ))
        }
    }
}

/// What got attached: UDP routes for the shared receiver, the multicast
/// groups it must join, and the relay interface if any.
#[derive(Debug, Default)]
pub struct Attached {
    pub routes: Routes,
    pub multicast: Vec<(Ipv4Addr, Nic)>,
    pub relay: Option<InterfaceId>,
}

/// Build and attach every configured interface. Unknown kinds are fatal.
pub fn attach_interfaces(
    manager: &GroupManager,
    config: &DaemonConfig,
    engine: &EngineConfig,
) -> Result<Attached> {
    let registry = interface_registry();
    let interfaces = config.effective_interfaces();
    let nics = interfaces
        .iter()
        .map(InterfaceConfig::nic)
        .collect::<Result<Vec<_>, _>>()?;
    let local: Vec<Nic> = nics.iter().flatten().copied().collect();

    let mut attached = Attached::default();
    for (iface, nic) in interfaces.iter().zip(nics) {
        let spec = InterfaceSpec {
            kind: InterfaceKind::default(),
            nic,
            port: engine.port,
            multicast_group: iface.multicast_group,
            relay_nodes: if iface.is_relay() {
                config.remote_relays(&local)
            } else {
                Vec::new()
            },
        };
        if iface.is_relay() && spec.relay_nodes.is_empty() {
            warn!("No usable relay nodes, skipping tcp-relay interface");
            continue;
        }
        let built = registry
            .build_named(&iface.kind, spec)
            .with_context(|| format!("building {} interface", iface.kind))?;
        let kind = built.kind();
        let id = manager.add_interface(built);
        if let Some(nic) = nic {
            attached.routes.add(nic, id);
            if matches!(kind, InterfaceKind::UdpMulticast | InterfaceKind::UdpMulticastNoRelay) {
                let group = iface.multicast_group.unwrap_or(DEFAULT_MULTICAST_GROUP);
                attached.multicast.push((group, nic));
            }
        } else if kind == InterfaceKind::TcpRelay {
            attached.relay = Some(id);
        }
        debug!("Attached {} as {}", kind, id);
    }
    if attached.routes.is_empty() && attached.relay.is_none() {
        bail!("no usable network interfaces");
    }
    Ok(attached)
}

/// Create configured groups not already restored from state.
pub fn create_groups(manager: &GroupManager, groups: &[GroupConfig]) -> Result<()> {
    for group in groups {
        if manager.local_group_info(&group.name).is_some() {
            debug!("Group '{}' restored from state", group.name);
            continue;
        }
        let password = group.password.as_deref();
        if group.managed {
            manager.create_managed_group(&group.name, password)?;
        } else {
            let options = PeerGroupOptions {
                hop_count: group.hop_count,
                flood_prob: group.flood_prob,
            };
            let data = group.data.as_deref().map(str::as_bytes);
            manager.create_peer_group(&group.name, password, data, options)?;
        }
    }
    Ok(())
}

pub fn start_searches(manager: &GroupManager, searches: &[SearchConfig]) {
    for search in searches {
        match manager.start_persistent_search(&search.group, search.param.as_bytes()) {
            Ok(id) => info!("Started search {} in '{}'", id, search.group),
            Err(e) => warn!("Could not start search in '{}': {}", search.group, e),
        }
    }
}

/// Whether a failed join may succeed later, once more peers are known.
fn join_retryable(err: &GroupError) -> bool {
    matches!(
        err,
        GroupError::UnknownPeer(_) | GroupError::UnknownGroup(_) | GroupError::Channel(_)
    )
}

/// Keep trying a configured join until it succeeds or fails for good.
pub async fn run_join(manager: Arc<GroupManager>, join: JoinConfig) {
    let creator = match join.creator_id() {
        Ok(creator) => creator,
        Err(e) => {
            warn!("Skipping join of '{}': {}", join.group, e);
            return;
        }
    };
    loop {
        let attempt = {
            let manager = Arc::clone(&manager);
            let (join, creator) = (join.clone(), creator.clone());
            tokio::task::spawn_blocking(move || {
                manager.join_managed_group(
                    &join.group,
                    &creator,
                    join.password.as_deref(),
                    join.mode,
                    join.data.as_deref().map(str::as_bytes),
                )
            })
            .await
        };
        match attempt {
            Ok(Ok(())) | Ok(Err(GroupError::AlreadyJoined(_))) => {
                info!("Joined '{}' at {}", join.group, creator);
                return;
            }
            Ok(Err(e)) if join_retryable(&e) => {
                debug!("Join of '{}' not possible yet: {}", join.group, e);
            }
            Ok(Err(e)) => {
                warn!("Giving up on join of '{}': {}", join.group, e);
                return;
            }
            Err(e) => {
                warn!("Join task for '{}' failed: {}", join.group, e);
                return;
            }
        }
        tokio::time::sleep(JOIN_RETRY).await;
    }
}

/// Drive maintenance and retransmissions once per `period`.
pub async fn run_ticker(manager: Arc<GroupManager>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        manager.tick();
        let resent = manager.sweep_acks();
        if resent > 0 {
            debug!("Retransmitted {} reliable packet(s)", resent);
        }
    }
}

/// Log every engine event.
pub fn log_events(manager: &GroupManager) -> Subscription {
    manager.subscribe(|event, view| match event {
        GroupEvent::NewPeer { node_id } => {
            let name = view.peer(node_id).map(|p| p.name.as_str()).unwrap_or("?");
            info!("New peer {} ({})", node_id, name);
        }
        GroupEvent::DeadPeer { node_id } => info!("Peer {} timed out", node_id),
        GroupEvent::NewGroupMember { group, member, .. } => {
            info!("{} joined '{}'", member, group)
        }
        GroupEvent::GroupMemberLeft { group, member } => info!("{} left '{}'", member, group),
        GroupEvent::ConflictWithPrivatePeerGroup { group, node_id } => {
            warn!("Group '{}' conflicts with the one at {}", group, node_id)
        }
        other => debug!("Event: {:?}", other),
    })
}
