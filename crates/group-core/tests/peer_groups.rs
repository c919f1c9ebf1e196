//! Peer discovery and peer group membership across several nodes.

mod common;

use common::Cluster;
use group_core::membership::GroupOrigin;
use group_core::{GroupEvent, GroupKind, PeerGroupOptions};

fn opts() -> PeerGroupOptions {
    PeerGroupOptions::default()
}

// ==================== Discovery ====================

#[test]
fn test_nodes_discover_each_other() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    cluster.start_all();

    let (na, nb) = (cluster.node(a), cluster.node(b));
    assert!(na.manager.is_peer_alive(&nb.id()));
    assert!(nb.manager.is_peer_alive(&na.id()));
    assert_eq!(na.manager.peer_node_name(&nb.id()).as_deref(), Some("b"));
    assert!(na.saw(&GroupEvent::NewPeer { node_id: nb.id() }));

    let peer = na.manager.peer_info(&nb.id()).unwrap();
    assert_eq!(peer.addr, Some(nb.ip));
    assert_eq!(peer.public_key.as_deref(), Some(nb.manager.public_key().as_str()));
}

#[test]
fn test_public_peer_groups_match() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    let c = cluster.add_node("c");
    cluster.node(a).manager.create_peer_group("ops", None, Some(b"from-a"), opts()).unwrap();
    cluster.node(b).manager.create_peer_group("ops", None, Some(b"from-b"), opts()).unwrap();
    cluster.start_all();

    let (na, nb, nc) = (cluster.node(a), cluster.node(b), cluster.node(c));
    let ops = na.manager.local_group_info("ops").unwrap();
    assert_eq!(ops.members.len(), 1);
    assert_eq!(ops.members[&nb.id()].data.as_deref(), Some(&b"from-b"[..]));
    assert!(na.saw(&GroupEvent::NewGroupMember {
        group: "ops".into(),
        member: nb.id(),
        data: Some(b"from-b".to_vec()),
    }));
    assert!(nb.manager.local_group_info("ops").unwrap().members.contains_key(&na.id()));

    // c has no local "ops", it only sees the remote group
    let listing = nc.manager.groups();
    assert_eq!(listing["ops"].kind, GroupKind::PublicPeer);
    assert!(matches!(listing["ops"].origin, GroupOrigin::RemotePeer { .. }));
}

#[test]
fn test_group_created_after_discovery_matches_known_peers() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    cluster.node(a).manager.create_peer_group("ops", None, None, opts()).unwrap();
    cluster.start_all();

    cluster.node(b).manager.create_peer_group("ops", None, None, opts()).unwrap();
    cluster.pump();

    let (na, nb) = (cluster.node(a), cluster.node(b));
    // b matched a from its cached advert, a learned of b from b's new INFO
    assert!(nb.manager.local_group_info("ops").unwrap().members.contains_key(&na.id()));
    assert!(na.manager.local_group_info("ops").unwrap().members.contains_key(&nb.id()));
    assert!(na.saw(&GroupEvent::GroupListChanged { node_id: nb.id() }));
}

#[test]
fn test_removed_group_drops_member() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    for i in [a, b] {
        cluster.node(i).manager.create_peer_group("ops", None, None, opts()).unwrap();
    }
    cluster.start_all();

    cluster.node(b).manager.remove_group("ops").unwrap();
    cluster.pump();

    let (na, nb) = (cluster.node(a), cluster.node(b));
    assert!(na.manager.local_group_info("ops").unwrap().members.is_empty());
    assert!(na.saw(&GroupEvent::GroupMemberLeft {
        group: "ops".into(),
        member: nb.id(),
    }));
}

// ==================== Private peer groups ====================

#[test]
fn test_private_peer_group_requires_same_password() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    let c = cluster.add_node("c");
    cluster.node(a).manager.create_peer_group("ops", Some("s3cret"), Some(b"a"), opts()).unwrap();
    cluster.node(b).manager.create_peer_group("ops", Some("s3cret"), Some(b"bee"), opts()).unwrap();
    cluster.node(c).manager.create_peer_group("ops", Some("guess"), None, opts()).unwrap();
    cluster.start_all();

    let (na, nb, nc) = (cluster.node(a), cluster.node(b), cluster.node(c));
    let ops = na.manager.local_group_info("ops").unwrap();
    assert_eq!(ops.members.keys().cloned().collect::<Vec<_>>(), vec![nb.id()]);
    assert_eq!(ops.members[&nb.id()].data.as_deref(), Some(&b"bee"[..]));
    assert!(na.saw(&GroupEvent::ConflictWithPrivatePeerGroup {
        group: "ops".into(),
        node_id: nc.id(),
    }));
    assert!(nc.manager.local_group_info("ops").unwrap().members.is_empty());
}

#[test]
fn test_privacy_mismatch_is_a_conflict() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    cluster.node(a).manager.create_peer_group("ops", None, None, opts()).unwrap();
    cluster.node(b).manager.create_peer_group("ops", Some("pw"), None, opts()).unwrap();
    cluster.start_all();

    let (na, nb) = (cluster.node(a), cluster.node(b));
    assert!(na.saw(&GroupEvent::ConflictWithPrivatePeerGroup {
        group: "ops".into(),
        node_id: nb.id(),
    }));
    assert!(nb.saw(&GroupEvent::ConflictWithPrivatePeerGroup {
        group: "ops".into(),
        node_id: na.id(),
    }));
    assert!(na.manager.local_group_info("ops").unwrap().members.is_empty());
}

// ==================== Group data ====================

#[test]
fn test_group_data_update_reaches_members() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    for i in [a, b] {
        cluster.node(i).manager.create_peer_group("ops", None, Some(b"v1"), opts()).unwrap();
    }
    cluster.start_all();
    cluster.node(a).take_events();

    cluster.node(b).manager.update_peer_group_data("ops", b"v2", opts()).unwrap();
    cluster.pump();

    let (na, nb) = (cluster.node(a), cluster.node(b));
    assert_eq!(
        na.take_events(),
        vec![GroupEvent::PeerGroupDataChanged {
            group: "ops".into(),
            node_id: nb.id(),
            data: b"v2".to_vec(),
        }]
    );
    let member = &na.manager.local_group_info("ops").unwrap().members[&nb.id()];
    assert_eq!(member.data.as_deref(), Some(&b"v2"[..]));
}

#[test]
fn test_private_group_data_update_is_decrypted() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    for i in [a, b] {
        cluster.node(i).manager.create_peer_group("ops", Some("pw"), None, opts()).unwrap();
    }
    cluster.start_all();

    cluster.node(b).manager.update_peer_group_data("ops", b"secret-v2", opts()).unwrap();
    cluster.pump();

    let (na, nb) = (cluster.node(a), cluster.node(b));
    assert!(na.saw(&GroupEvent::PeerGroupDataChanged {
        group: "ops".into(),
        node_id: nb.id(),
        data: b"secret-v2".to_vec(),
    }));
}

// ==================== Timeouts ====================

#[test]
fn test_silent_peer_times_out_and_revives() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    for i in [a, b] {
        cluster.node(i).manager.create_peer_group("ops", None, None, opts()).unwrap();
    }
    cluster.start_all();
    let b_id = cluster.node(b).id();

    cluster.set_online(b, false);
    // ping interval 2 s times the timeout factor of 5
    cluster.advance(11_000);

    let na = cluster.node(a);
    assert!(!na.manager.is_peer_alive(&b_id));
    let events = na.take_events();
    let left = events
        .iter()
        .position(|e| *e == GroupEvent::GroupMemberLeft { group: "ops".into(), member: b_id.clone() })
        .unwrap();
    let dead = events
        .iter()
        .position(|e| *e == GroupEvent::DeadPeer { node_id: b_id.clone() })
        .unwrap();
    assert!(left < dead);
    assert!(na.manager.local_group_info("ops").unwrap().members.is_empty());

    cluster.set_online(b, true);
    cluster.advance(3_000);

    let na = cluster.node(a);
    assert!(na.manager.is_peer_alive(&b_id));
    assert!(na.saw(&GroupEvent::NewPeer { node_id: b_id.clone() }));
    assert!(na.manager.local_group_info("ops").unwrap().members.contains_key(&b_id));
}

#[test]
fn test_regular_pings_keep_peers_alive() {
    let mut cluster = Cluster::new();
    let a = cluster.add_node("a");
    let b = cluster.add_node("b");
    cluster.start_all();

    cluster.advance(30_000);
    assert!(cluster.node(a).manager.is_peer_alive(&cluster.node(b).id()));
    assert!(!cluster.node(a).events().iter().any(|e| matches!(e, GroupEvent::DeadPeer { .. })));
}
