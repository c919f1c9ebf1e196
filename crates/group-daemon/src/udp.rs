//! UDP broadcast and multicast interfaces.
//!
//! Every interface sends from its own socket bound to its NIC address, while
//! all of them receive on one socket bound to the shared port. Inbound
//! datagrams are attributed to the interface whose subnet holds the source.

use group_core::transport::{InterfaceSpec, Result, TransportError};
use group_core::{GroupManager, InterfaceId, InterfaceKind, Nic, NetworkInterface};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::DEFAULT_MULTICAST_GROUP;

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = 65_535;

pub struct UdpInterface {
    kind: InterfaceKind,
    nic: Nic,
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl UdpInterface {
    /// Directed broadcast on the NIC's subnet.
    pub fn broadcast(spec: &InterfaceSpec) -> Result<Self> {
        let nic = require_nic(spec)?;
        let socket = UdpSocket::bind(SocketAddrV4::new(nic.ip, 0))?;
        socket.set_broadcast(true)?;
        let target = SocketAddrV4::new(broadcast_address(&nic), spec.port);
        info!("UDP broadcast interface on {} -> {}", nic.ip, target);
        Ok(Self {
            kind: spec.kind,
            nic,
            socket,
            target,
        })
    }

    /// Multicast to the configured group, one hop.
    pub fn multicast(spec: &InterfaceSpec) -> Result<Self> {
        let nic = require_nic(spec)?;
        let group = spec.multicast_group.unwrap_or(DEFAULT_MULTICAST_GROUP);
        let socket = UdpSocket::bind(SocketAddrV4::new(nic.ip, 0))?;
        socket.set_multicast_ttl_v4(1)?;
        socket.set_multicast_loop_v4(false)?;
        let target = SocketAddrV4::new(group, spec.port);
        info!("UDP multicast interface on {} -> {} ({})", nic.ip, target, spec.kind);
        Ok(Self {
            kind: spec.kind,
            nic,
            socket,
            target,
        })
    }
}

impl NetworkInterface for UdpInterface {
    fn kind(&self) -> InterfaceKind {
        self.kind
    }

    fn nic(&self) -> Option<Nic> {
        Some(self.nic)
    }

    fn broadcast(&self, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, self.target)?;
        Ok(())
    }

    fn send_to(&self, addr: SocketAddrV4, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, addr)?;
        Ok(())
    }
}

fn require_nic(spec: &InterfaceSpec) -> Result<Nic> {
    spec.nic.ok_or_else(|| {
        TransportError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} interface needs an address", spec.kind),
        ))
    })
}

pub fn broadcast_address(nic: &Nic) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(nic.ip) | !u32::from(nic.netmask))
}

/// Bind the shared receive socket and join the multicast groups of every
/// multicast interface.
pub fn bind_receiver(port: u16, multicast: &[(Ipv4Addr, Nic)]) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    socket.set_broadcast(true)?;
    for (group, nic) in multicast {
        socket.join_multicast_v4(group, &nic.ip)?;
        debug!("Joined multicast group {} on {}", group, nic.ip);
    }
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Maps a datagram's source to the interface it arrived on.
#[derive(Debug, Clone, Default)]
pub struct Routes {
    entries: Vec<(Nic, InterfaceId)>,
}

impl Routes {
    pub fn add(&mut self, nic: Nic, iface: InterfaceId) {
        self.entries.push((nic, iface));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The interface on the source's subnet, else the first one.
    pub fn lookup(&self, from: Ipv4Addr) -> Option<InterfaceId> {
        self.entries
            .iter()
            .find(|(nic, _)| nic.contains(from))
            .or_else(|| self.entries.first())
            .map(|(_, iface)| *iface)
    }
}

/// Feed every datagram from the shared socket into the engine.
pub async fn run_receiver(socket: UdpSocket, routes: Routes, manager: Arc<GroupManager>) {
    let socket = match tokio::net::UdpSocket::from_std(socket) {
        Ok(socket) => socket,
        Err(e) => {
            error!("Failed to register UDP socket: {}", e);
            return;
        }
    };
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!("UDP receive failed: {}", e);
                continue;
            }
        };
        let SocketAddr::V4(from) = from else {
            continue;
        };
        match routes.lookup(*from.ip()) {
            Some(iface) => manager.handle_packet(iface, &buf[..len]),
            None => debug!("No interface for datagram from {}", from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nic(a: u8, b: u8, c: u8, d: u8, prefix_mask: [u8; 4]) -> Nic {
        Nic::new(Ipv4Addr::new(a, b, c, d), Ipv4Addr::from(prefix_mask))
    }

    #[test]
    fn test_broadcast_address() {
        assert_eq!(
            broadcast_address(&nic(192, 168, 1, 20, [255, 255, 255, 0])),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(
            broadcast_address(&nic(10, 4, 0, 1, [255, 255, 0, 0])),
            Ipv4Addr::new(10, 4, 255, 255)
        );
    }

    #[test]
    fn test_routes_pick_subnet_then_first() {
        let mut routes = Routes::default();
        assert_eq!(routes.lookup(Ipv4Addr::new(10, 0, 0, 9)), None);

        routes.add(nic(10, 0, 0, 1, [255, 255, 255, 0]), InterfaceId(0));
        routes.add(nic(172, 16, 0, 1, [255, 255, 0, 0]), InterfaceId(1));
        assert_eq!(routes.lookup(Ipv4Addr::new(172, 16, 8, 8)), Some(InterfaceId(1)));
        assert_eq!(routes.lookup(Ipv4Addr::new(10, 0, 0, 9)), Some(InterfaceId(0)));
        assert_eq!(routes.lookup(Ipv4Addr::new(8, 8, 8, 8)), Some(InterfaceId(0)));
    }

    #[test]
    fn test_interface_needs_address() {
        let spec = InterfaceSpec {
            kind: InterfaceKind::UdpBroadcast,
            nic: None,
            port: 8500,
            multicast_group: None,
            relay_nodes: Vec::new(),
        };
        assert!(UdpInterface::broadcast(&spec).is_err());
    }

    #[test]
    fn test_loopback_broadcast_interface_sends() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        let spec = InterfaceSpec {
            kind: InterfaceKind::UdpBroadcast,
            nic: Some(nic(127, 0, 0, 1, [255, 0, 0, 0])),
            port,
            multicast_group: None,
            relay_nodes: Vec::new(),
        };
        let iface = UdpInterface::broadcast(&spec).unwrap();
        iface
            .send_to(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), b"hello")
            .unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(iface.nic().unwrap().ip, Ipv4Addr::LOCALHOST);
    }
}
