//! Membership events and the bus that delivers them.
//!
//! Events are emitted synchronously while the engine lock is held, so
//! subscribers see them in the order the state changed. Each callback also
//! gets an [`EngineView`] for read-only queries (a dead peer is still in
//! the live table when its member-left events fire). Callbacks must not
//! call back into the `GroupManager`; that would deadlock.

use crate::membership::EngineView;
use crate::node_id::{NodeId, SearchId};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GroupEvent {
    /// A node was seen for the first time, or came back from the dead table.
    NewPeer {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    DeadPeer {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    /// A known peer advertised a different set of groups.
    GroupListChanged {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    NewGroupMember {
        group: String,
        member: NodeId,
        /// Join data (managed groups) or peer group data.
        data: Option<Vec<u8>>,
    },
    GroupMemberLeft {
        group: String,
        member: NodeId,
    },
    /// A remote node advertises a peer group with our name but the other
    /// privacy kind, or a private group whose password differs.
    ConflictWithPrivatePeerGroup {
        group: String,
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    PeerGroupDataChanged {
        group: String,
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        data: Vec<u8>,
    },
    PeerSearchRequestReceived {
        group: String,
        originator: NodeId,
        #[serde(rename = "searchId")]
        search_id: SearchId,
        param: Vec<u8>,
    },
    PeerSearchResultReceived {
        group: String,
        responder: NodeId,
        #[serde(rename = "searchId")]
        search_id: SearchId,
        param: Vec<u8>,
    },
    PersistentPeerSearchTerminated {
        group: String,
        originator: NodeId,
        #[serde(rename = "searchId")]
        search_id: SearchId,
    },
}

type Callback = Arc<dyn Fn(&GroupEvent, &EngineView<'_>) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&GroupEvent, &EngineView<'_>) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn emit(&self, event: &GroupEvent, view: &EngineView<'_>) {
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event, view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{EngineConfig, GroupManager};
    use std::sync::Mutex;

    fn new_peer(id: &str) -> GroupEvent {
        GroupEvent::NewPeer {
            node_id: id.parse().unwrap(),
        }
    }

    fn recorder(bus: &Arc<EventBus>) -> (Arc<Mutex<Vec<GroupEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = bus.subscribe(move |event, _| sink.lock().unwrap().push(event.clone()));
        (seen, sub)
    }

    // ==================== Delivery ====================

    #[test]
    fn test_emit_reaches_every_subscriber_in_order() {
        let manager = GroupManager::new("n", EngineConfig::default());
        let state = manager.lock();
        let bus = Arc::new(EventBus::new());
        let (first, _a) = recorder(&bus);
        let (second, _b) = recorder(&bus);

        bus.emit(&new_peer("x"), &state.view());
        bus.emit(&new_peer("y"), &state.view());

        let expected = vec![new_peer("x"), new_peer("y")];
        assert_eq!(*first.lock().unwrap(), expected);
        assert_eq!(*second.lock().unwrap(), expected);
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let manager = GroupManager::new("n", EngineConfig::default());
        let state = manager.lock();
        let bus = Arc::new(EventBus::new());
        let (seen, sub) = recorder(&bus);

        bus.emit(&new_peer("x"), &state.view());
        drop(sub);
        bus.emit(&new_peer("y"), &state.view());

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_callback_can_query_view() {
        let manager = GroupManager::new("viewer", EngineConfig::default());
        let state = manager.lock();
        let bus = Arc::new(EventBus::new());
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        let _sub = bus.subscribe(move |_, view| {
            sink.lock().unwrap().push(view.node_name().to_string());
        });

        bus.emit(&new_peer("x"), &state.view());
        assert_eq!(*names.lock().unwrap(), vec!["viewer".to_string()]);
    }

    // ==================== Serialization ====================

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&new_peer("node-a")).unwrap();
        assert_eq!(json, r#"{"type":"newPeer","nodeId":"node-a"}"#);
    }
}
