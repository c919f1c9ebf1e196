//! Datagram transport.
//!
//! The [`Transport`] owns every attached [`NetworkInterface`], stamps
//! outgoing packets with sequence numbers, drops duplicate broadcasts,
//! relays floods and retransmits reliable unicasts until they are ACKed or
//! their TTL runs out. Concrete sockets live outside this crate; the
//! `test-support` feature adds an in-memory hub for multi-node tests.

mod ack;
mod dedup;
mod layer;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use ack::{AckCache, PendingAck, Resend};
pub use dedup::DedupCache;
pub use layer::{Delivery, DropReason, Inbound, Receipt, Transport, TransportConfig};

use crate::protocol::{CodecError, Nic};
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("No route to {0}")]
    Unreachable(String),
    #[error("No network interfaces attached")]
    NoInterfaces,
    #[error("Unknown interface kind '{0}'")]
    UnknownInterfaceKind(String),
    #[error("Interface kind '{0}' is not supported")]
    UnsupportedInterfaceKind(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Index of an interface inside a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub usize);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterfaceKind {
    UdpBroadcast,
    UdpMulticast,
    #[default]
    UdpMulticastNoRelay,
    TcpRelay,
}

/// Where a relayed broadcast goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPolicy {
    /// Shared broadcast media: every interface, including the arrival one.
    AllInterfaces,
    /// Bridging media: every interface except the one it arrived on.
    AllButArrival,
}

impl InterfaceKind {
    pub fn relay_policy(self) -> RelayPolicy {
        match self {
            InterfaceKind::UdpBroadcast | InterfaceKind::UdpMulticast => {
                RelayPolicy::AllInterfaces
            }
            InterfaceKind::UdpMulticastNoRelay | InterfaceKind::TcpRelay => {
                RelayPolicy::AllButArrival
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InterfaceKind::UdpBroadcast => "udp-broadcast",
            InterfaceKind::UdpMulticast => "udp-multicast",
            InterfaceKind::UdpMulticastNoRelay => "udp-multicast-norelay",
            InterfaceKind::TcpRelay => "tcp-relay",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "udp-broadcast" => Ok(InterfaceKind::UdpBroadcast),
            "udp-multicast" => Ok(InterfaceKind::UdpMulticast),
            "udp-multicast-norelay" => Ok(InterfaceKind::UdpMulticastNoRelay),
            "tcp-relay" => Ok(InterfaceKind::TcpRelay),
            "cross-layer" => Err(TransportError::UnsupportedInterfaceKind(s.to_string())),
            other => Err(TransportError::UnknownInterfaceKind(other.to_string())),
        }
    }
}

/// A datagram substrate the transport can send through.
///
/// Receiving is driven from outside: whoever owns the socket hands inbound
/// datagrams to the engine along with the [`InterfaceId`] they arrived on.
pub trait NetworkInterface: Send {
    fn kind(&self) -> InterfaceKind;

    /// Address and netmask this interface is bound to. Virtual interfaces
    /// (relays) return `None` and are never chosen for subnet routing.
    fn nic(&self) -> Option<Nic>;

    fn broadcast(&self, packet: &[u8]) -> Result<()>;

    fn send_to(&self, addr: SocketAddrV4, packet: &[u8]) -> Result<()>;
}

/// Everything a factory needs to build one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub kind: InterfaceKind,
    pub nic: Option<Nic>,
    pub port: u16,
    pub multicast_group: Option<Ipv4Addr>,
    pub relay_nodes: Vec<SocketAddrV4>,
}

pub type InterfaceFactory =
    Box<dyn Fn(&InterfaceSpec) -> Result<Box<dyn NetworkInterface>> + Send + Sync>;

/// Interface constructors keyed by kind, filled in at startup.
#[derive(Default)]
pub struct InterfaceRegistry {
    factories: HashMap<InterfaceKind, InterfaceFactory>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: InterfaceKind,
        factory: impl Fn(&InterfaceSpec) -> Result<Box<dyn NetworkInterface>> + Send + Sync + 'static,
    ) {
        self.factories.insert(kind, Box::new(factory));
    }

    pub fn is_registered(&self, kind: InterfaceKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn build(&self, spec: &InterfaceSpec) -> Result<Box<dyn NetworkInterface>> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| TransportError::UnknownInterfaceKind(spec.kind.to_string()))?;
        factory(spec)
    }

    /// Parse a configured kind name and build the interface.
    pub fn build_named(
        &self,
        name: &str,
        mut spec: InterfaceSpec,
    ) -> Result<Box<dyn NetworkInterface>> {
        spec.kind = name.parse()?;
        self.build(&spec)
    }
}
