//! In-memory datagram fabric for tests.
//!
//! A [`MemoryHub`] is a shared segment of endpoints. Broadcasts reach every
//! other online endpoint on the sender's subnet; unicasts reach the one
//! endpoint with the destination IP. Delivered datagrams queue up in the
//! receiver's inbox until a test drains them.

use super::{InterfaceKind, NetworkInterface, Result, TransportError};
use crate::protocol::Nic;
use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct Endpoint {
    nic: Nic,
    inbox: VecDeque<Vec<u8>>,
    online: bool,
    sent: usize,
}

#[derive(Debug, Default)]
struct HubState {
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an endpoint bound to `nic`.
    pub fn attach(&self, nic: Nic, kind: InterfaceKind) -> MemoryInterface {
        let mut state = self.state();
        state.endpoints.push(Endpoint {
            nic,
            inbox: VecDeque::new(),
            online: true,
            sent: 0,
        });
        MemoryInterface {
            hub: self.clone(),
            endpoint: state.endpoints.len() - 1,
            nic,
            kind,
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.state().endpoints.len()
    }

    /// Take every datagram queued for `endpoint`.
    pub fn drain(&self, endpoint: usize) -> Vec<Vec<u8>> {
        self.state()
            .endpoints
            .get_mut(endpoint)
            .map(|e| e.inbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// An offline endpoint neither sends nor receives.
    pub fn set_online(&self, endpoint: usize, online: bool) {
        if let Some(e) = self.state().endpoints.get_mut(endpoint) {
            e.online = online;
            if !online {
                e.inbox.clear();
            }
        }
    }

    /// Datagrams this endpoint has handed to the hub.
    pub fn sent_count(&self, endpoint: usize) -> usize {
        self.state()
            .endpoints
            .get(endpoint)
            .map(|e| e.sent)
            .unwrap_or(0)
    }

    fn broadcast_from(&self, from: usize, packet: &[u8]) {
        let mut state = self.state();
        let Some(sender) = state.endpoints.get_mut(from) else {
            return;
        };
        if !sender.online {
            return;
        }
        sender.sent += 1;
        let sender_nic = sender.nic;
        for (i, e) in state.endpoints.iter_mut().enumerate() {
            if i != from && e.online && sender_nic.contains(e.nic.ip) {
                e.inbox.push_back(packet.to_vec());
            }
        }
    }

    fn unicast_from(&self, from: usize, addr: SocketAddrV4, packet: &[u8]) -> Result<()> {
        let mut state = self.state();
        match state.endpoints.get_mut(from) {
            Some(sender) if sender.online => sender.sent += 1,
            _ => return Ok(()),
        }
        let target = state
            .endpoints
            .iter_mut()
            .find(|e| e.nic.ip == *addr.ip())
            .ok_or_else(|| TransportError::Unreachable(addr.to_string()))?;
        if target.online {
            target.inbox.push_back(packet.to_vec());
        }
        Ok(())
    }
}

/// One endpoint of a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryInterface {
    hub: MemoryHub,
    endpoint: usize,
    nic: Nic,
    kind: InterfaceKind,
}

impl MemoryInterface {
    pub fn endpoint(&self) -> usize {
        self.endpoint
    }
}

impl NetworkInterface for MemoryInterface {
    fn kind(&self) -> InterfaceKind {
        self.kind
    }

    fn nic(&self) -> Option<Nic> {
        Some(self.nic)
    }

    fn broadcast(&self, packet: &[u8]) -> Result<()> {
        self.hub.broadcast_from(self.endpoint, packet);
        Ok(())
    }

    fn send_to(&self, addr: SocketAddrV4, packet: &[u8]) -> Result<()> {
        self.hub.unicast_from(self.endpoint, addr, packet)
    }
}
