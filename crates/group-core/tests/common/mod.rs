//! Multi-node harness: every node sits on one in-memory /24 segment, joins
//! go through a shared in-memory channel, and time only moves when a test
//! says so.

#![allow(dead_code)]

use group_core::channel::ChannelHandler;
use group_core::channel::memory::MemoryConnector;
use group_core::transport::memory::MemoryHub;
use group_core::{
    EngineConfig, GroupEvent, GroupManager, InterfaceId, InterfaceKind, ManualClock, Nic, NodeId,
    Subscription,
};
use group_core::crypto::NodeKeyPair;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

pub const START_MS: u64 = 1_000_000;

pub struct Node {
    pub manager: Arc<GroupManager>,
    pub endpoint: usize,
    pub iface: InterfaceId,
    pub ip: Ipv4Addr,
    events: Arc<Mutex<Vec<GroupEvent>>>,
    _subscription: Subscription,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.manager.node_id()
    }

    pub fn events(&self) -> Vec<GroupEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events recorded since the last call.
    pub fn take_events(&self) -> Vec<GroupEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn saw(&self, event: &GroupEvent) -> bool {
        self.events.lock().unwrap().contains(event)
    }
}

pub struct Cluster {
    pub hub: MemoryHub,
    pub clock: ManualClock,
    pub connector: MemoryConnector,
    pub nodes: Vec<Node>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            hub: MemoryHub::new(),
            clock: ManualClock::new(START_MS),
            connector: MemoryConnector::new(),
            nodes: Vec::new(),
        }
    }

    /// Add a node (not yet started) and return its index.
    pub fn add_node(&mut self, name: &str) -> usize {
        self.add_node_with(name, EngineConfig::default())
    }

    pub fn add_node_with(&mut self, name: &str, config: EngineConfig) -> usize {
        let index = self.nodes.len();
        let ip = Ipv4Addr::new(10, 0, 0, index as u8 + 1);
        let manager = Arc::new(GroupManager::with_parts(
            format!("node-{name}").parse().unwrap(),
            name,
            NodeKeyPair::generate(),
            config,
            Arc::new(self.clock.clone()),
            Arc::new(self.connector.bound_to(ip)),
        ));

        let nic = Nic::new(ip, Ipv4Addr::new(255, 255, 255, 0));
        let iface = self.hub.attach(nic, InterfaceKind::UdpMulticastNoRelay);
        let endpoint = iface.endpoint();
        let iface = manager.add_interface(Box::new(iface));

        let handler: Arc<dyn ChannelHandler> = manager.clone();
        self.connector.register(ip, &handler);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = manager.subscribe(move |event, _| {
            sink.lock().unwrap().push(event.clone());
        });

        self.nodes.push(Node {
            manager,
            endpoint,
            iface,
            ip,
            events,
            _subscription: subscription,
        });
        index
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn start_all(&self) {
        for node in &self.nodes {
            node.manager.start().unwrap();
        }
        self.pump();
    }

    /// Deliver queued datagrams until the segment is quiet. Returns how many
    /// were delivered.
    pub fn pump(&self) -> usize {
        let mut total = 0;
        for _ in 0..100 {
            let mut moved = 0;
            for node in &self.nodes {
                for packet in self.hub.drain(node.endpoint) {
                    node.manager.handle_packet(node.iface, &packet);
                    moved += 1;
                }
            }
            if moved == 0 {
                break;
            }
            total += moved;
        }
        total
    }

    /// Step time in one-second ticks, running maintenance on every node.
    pub fn advance(&self, ms: u64) {
        let mut left = ms;
        while left > 0 {
            let step = left.min(1000);
            self.clock.advance(step);
            left -= step;
            for node in &self.nodes {
                node.manager.tick();
                node.manager.sweep_acks();
            }
            self.pump();
        }
    }

    pub fn set_online(&self, index: usize, online: bool) {
        self.hub.set_online(self.nodes[index].endpoint, online);
    }
}
