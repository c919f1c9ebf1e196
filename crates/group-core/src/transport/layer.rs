use super::ack::AckCache;
use super::dedup::DedupCache;
use super::{InterfaceId, NetworkInterface, RelayPolicy, Result, TransportError};
use crate::node_id::NodeId;
use crate::protocol::packet::set_hop_count;
use crate::protocol::{
    CodecError, MAX_PACKET_SIZE, MsgType, Nic, PacketHeader, PacketType, decode_packet,
    encode_packet, validate_message,
};
use rand::Rng;
use std::net::SocketAddrV4;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// UDP port shared by every node.
    pub port: u16,
    /// Minimum spacing between retransmission sweeps (default: 1s)
    pub ack_sweep_interval_ms: u64,
    /// TTL for reliable sends that don't pick one (default: 10s)
    pub default_reliable_ttl_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 8500,
            ack_sweep_interval_ms: 1000,
            default_reliable_ttl_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Unreliable,
    /// Retransmit until ACKed or `ttl_ms` has elapsed.
    Reliable { ttl_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(CodecError),
    /// Our own broadcast echoed back by a relay.
    OwnPacket,
    /// Broadcast already seen (or older than one already seen).
    Duplicate,
}

/// A packet that should be dispatched to the membership engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound<'a> {
    pub header: PacketHeader,
    pub body: &'a [u8],
    pub arrival: InterfaceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt<'a> {
    Deliver(Inbound<'a>),
    /// An ACK. `pending` is false if nothing was waiting for it.
    Acked { seq: u16, pending: bool },
    Dropped(DropReason),
}

pub struct Transport {
    node_id: NodeId,
    config: TransportConfig,
    interfaces: Vec<Box<dyn NetworkInterface>>,
    next_seq: u16,
    dedup: DedupCache,
    acks: AckCache,
    last_ack_sweep_ms: u64,
}

impl Transport {
    pub fn new(node_id: NodeId, config: TransportConfig) -> Self {
        Self {
            node_id,
            config,
            interfaces: Vec::new(),
            next_seq: rand::random(),
            dedup: DedupCache::new(),
            acks: AckCache::new(),
            last_ack_sweep_ms: 0,
        }
    }

    pub fn add_interface(&mut self, iface: Box<dyn NetworkInterface>) -> InterfaceId {
        self.interfaces.push(iface);
        InterfaceId(self.interfaces.len() - 1)
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// NICs of every interface bound to a real address.
    pub fn local_nics(&self) -> Vec<Nic> {
        let mut nics: Vec<Nic> = Vec::new();
        for nic in self.interfaces.iter().filter_map(|i| i.nic()) {
            if !nics.contains(&nic) {
                nics.push(nic);
            }
        }
        nics
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    /// Forget dedup history for a sender that has gone away.
    pub fn forget_sender(&mut self, sender: &NodeId) {
        self.dedup.forget(sender);
    }

    fn take_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    fn header(
        &self,
        packet_type: PacketType,
        seq: u16,
        msg_type: u8,
        hop_count: u8,
        flood_prob: u8,
        include_nics: bool,
    ) -> PacketHeader {
        PacketHeader {
            packet_type,
            seq,
            msg_type,
            sender: self.node_id.clone(),
            orig_hop_count: hop_count,
            hop_count,
            flood_prob,
            nics: if include_nics {
                self.local_nics()
            } else {
                Vec::new()
            },
        }
    }

    /// Fail if a broadcast body of `body_len` bytes would not fit in one
    /// datagram.
    pub fn check_fits(&self, body_len: usize, include_nics: bool) -> Result<()> {
        let header = self.header(PacketType::Broadcast, 0, 0, 0, 0, include_nics);
        let total = encode_packet(&header, &[])?.len() + body_len;
        if total > MAX_PACKET_SIZE {
            return Err(CodecError::PacketTooLarge(total).into());
        }
        Ok(())
    }

    /// Flood a message out of every interface. Returns the packet sequence
    /// number.
    pub fn broadcast(
        &mut self,
        msg_type: MsgType,
        body: &[u8],
        hop_count: u8,
        flood_prob: u8,
        include_nics: bool,
    ) -> Result<u16> {
        if self.interfaces.is_empty() {
            return Err(TransportError::NoInterfaces);
        }
        let seq = self.take_seq();
        let header = self.header(
            PacketType::Broadcast,
            seq,
            msg_type.as_u8(),
            hop_count,
            flood_prob,
            include_nics,
        );
        let packet = encode_packet(&header, body)?;
        // Relayed copies of our own flood must not count as new
        self.dedup.observe(&self.node_id, msg_type.as_u8(), seq);

        let mut delivered = 0;
        for (i, iface) in self.interfaces.iter().enumerate() {
            match iface.broadcast(&packet) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast of {:?} on if{} failed: {}", msg_type, i, e),
            }
        }
        if delivered == 0 {
            return Err(TransportError::SendFailed(format!(
                "{msg_type:?} broadcast failed on every interface"
            )));
        }
        Ok(seq)
    }

    /// Pick the interface and address used to reach a node advertising
    /// `dest_nics`: the first of its NICs sharing a subnet with one of ours,
    /// otherwise its first NIC through our first interface.
    pub fn route(&self, dest_nics: &[Nic]) -> Result<(InterfaceId, SocketAddrV4)> {
        if self.interfaces.is_empty() {
            return Err(TransportError::NoInterfaces);
        }
        let port = self.config.port;
        for peer_nic in dest_nics {
            for (i, iface) in self.interfaces.iter().enumerate() {
                if iface.nic().is_some_and(|local| local.contains(peer_nic.ip)) {
                    return Ok((InterfaceId(i), SocketAddrV4::new(peer_nic.ip, port)));
                }
            }
        }
        dest_nics
            .first()
            .map(|nic| (InterfaceId(0), SocketAddrV4::new(nic.ip, port)))
            .ok_or_else(|| TransportError::Unreachable("node advertised no interfaces".into()))
    }

    /// Send a message to node `to`, reachable at `dest_nics`. Returns the
    /// packet sequence number.
    pub fn send_unicast(
        &mut self,
        to: &NodeId,
        dest_nics: &[Nic],
        msg_type: MsgType,
        body: &[u8],
        delivery: Delivery,
        now_ms: u64,
    ) -> Result<u16> {
        let (iface, dest) = self.route(dest_nics)?;
        let packet_type = match delivery {
            Delivery::Unreliable => PacketType::UnicastUnreliable,
            Delivery::Reliable { .. } => PacketType::UnicastReliable,
        };
        let seq = self.take_seq();
        // Reliable sends always carry our NICs so the receiver can ACK
        let include_nics = matches!(delivery, Delivery::Reliable { .. });
        let header = self.header(packet_type, seq, msg_type.as_u8(), 1, 0, include_nics);
        let packet = encode_packet(&header, body)?;

        let sent = self.interfaces[iface.0].send_to(dest, &packet);
        match delivery {
            Delivery::Unreliable => sent?,
            Delivery::Reliable { ttl_ms } => {
                if let Err(e) = sent {
                    warn!("Reliable {:?} to {} failed, will retry: {}", msg_type, dest, e);
                }
                self.acks.insert(to.clone(), seq, iface, dest, packet, now_ms, ttl_ms);
            }
        }
        Ok(seq)
    }

    /// Reliable delivery with the configured default TTL.
    pub fn default_reliable(&self) -> Delivery {
        Delivery::Reliable {
            ttl_ms: self.config.default_reliable_ttl_ms,
        }
    }

    /// Classify an inbound datagram.
    ///
    /// ACKs are consumed here. Reliable unicasts are ACKed before being
    /// handed back for dispatch.
    pub fn receive<'a>(&mut self, arrival: InterfaceId, packet: &'a [u8]) -> Receipt<'a> {
        let (header, body) = match decode_packet(packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Dropping malformed packet on {}: {}", arrival, e);
                return Receipt::Dropped(DropReason::Malformed(e));
            }
        };

        if header.packet_type == PacketType::Ack {
            let pending = self.acks.acknowledge(&header.sender, header.seq);
            return Receipt::Acked {
                seq: header.seq,
                pending,
            };
        }

        if header.sender == self.node_id {
            return Receipt::Dropped(DropReason::OwnPacket);
        }

        // A damaged copy must not mark its sequence number as seen
        if let Err(e) = MsgType::from_u8(header.msg_type).and_then(|t| validate_message(t, body)) {
            debug!(
                "Dropping invalid message {} from {} on {}: {}",
                header.msg_type, header.sender, arrival, e
            );
            return Receipt::Dropped(DropReason::Malformed(e));
        }

        if header.packet_type == PacketType::Broadcast
            && !self
                .dedup
                .observe(&header.sender, header.msg_type, header.seq)
        {
            return Receipt::Dropped(DropReason::Duplicate);
        }

        if header.packet_type == PacketType::UnicastReliable && !header.nics.is_empty() {
            self.send_ack(&header);
        }

        Receipt::Deliver(Inbound {
            header,
            body,
            arrival,
        })
    }

    fn send_ack(&mut self, to: &PacketHeader) {
        let header = PacketHeader {
            packet_type: PacketType::Ack,
            seq: to.seq,
            msg_type: to.msg_type,
            sender: self.node_id.clone(),
            orig_hop_count: 1,
            hop_count: 1,
            flood_prob: 0,
            nics: Vec::new(),
        };
        let result = self
            .route(&to.nics)
            .and_then(|(iface, dest)| {
                let packet = encode_packet(&header, &[])?;
                self.interfaces[iface.0].send_to(dest, &packet)
            });
        if let Err(e) = result {
            warn!("Failed to ACK seq {} from {}: {}", to.seq, to.sender, e);
        }
    }

    /// Re-flood a delivered broadcast if it has hops left and wins the
    /// flood-probability draw. Returns true if it was sent.
    pub fn relay(&mut self, inbound: &Inbound<'_>, packet: &[u8]) -> bool {
        let header = &inbound.header;
        if header.packet_type != PacketType::Broadcast || header.hop_count <= 1 {
            return false;
        }
        let draw: u8 = rand::rng().random_range(0..100);
        if header.flood_prob <= draw {
            return false;
        }

        let mut copy = packet.to_vec();
        if set_hop_count(&mut copy, header.hop_count - 1).is_err() {
            return false;
        }

        let policy = self
            .interfaces
            .get(inbound.arrival.0)
            .map(|i| i.kind().relay_policy())
            .unwrap_or(RelayPolicy::AllInterfaces);

        for (i, iface) in self.interfaces.iter().enumerate() {
            if policy == RelayPolicy::AllButArrival && i == inbound.arrival.0 {
                continue;
            }
            if let Err(e) = iface.broadcast(&copy) {
                warn!("Relay of seq {} from {} on if{} failed: {}", header.seq, header.sender, i, e);
            }
        }
        debug!(
            "Relayed seq {} from {} with {} hops left",
            header.seq,
            header.sender,
            header.hop_count - 1
        );
        true
    }

    /// Retransmit unACKed reliable packets and drop expired ones. Does
    /// nothing if the last sweep was less than the sweep interval ago.
    /// Returns how many packets were resent.
    pub fn sweep_acks(&mut self, now_ms: u64) -> usize {
        if now_ms.saturating_sub(self.last_ack_sweep_ms) < self.config.ack_sweep_interval_ms {
            return 0;
        }
        self.last_ack_sweep_ms = now_ms;

        let (resends, expired) = self.acks.sweep(now_ms);
        if expired > 0 {
            debug!("Gave up on {} unacknowledged packets", expired);
        }
        for resend in &resends {
            if let Some(iface) = self.interfaces.get(resend.iface.0) {
                if let Err(e) = iface.send_to(resend.dest, &resend.packet) {
                    warn!("Retransmit of seq {} to {} failed: {}", resend.seq, resend.dest, e);
                }
            }
        }
        resends.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InterfaceKind;
    use crate::node_id::SearchId;
    use crate::protocol::{InfoMessage, SearchReplyMessage};
    use crate::transport::memory::MemoryHub;
    use std::net::Ipv4Addr;

    fn nic(last: u8) -> Nic {
        Nic::new(
            Ipv4Addr::new(10, 0, 0, last),
            Ipv4Addr::new(255, 255, 255, 0),
        )
    }

    fn node(hub: &MemoryHub, name: &str, last: u8, kind: InterfaceKind) -> (Transport, usize) {
        let mut t = Transport::new(name.parse().unwrap(), TransportConfig::default());
        let iface = hub.attach(nic(last), kind);
        let endpoint = iface.endpoint();
        t.add_interface(Box::new(iface));
        (t, endpoint)
    }

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    fn delivered(receipt: &Receipt<'_>) -> bool {
        matches!(receipt, Receipt::Deliver(_))
    }

    fn reply_body() -> Vec<u8> {
        SearchReplyMessage {
            search_id: SearchId::generate(),
            param: b"r".to_vec(),
        }
        .encode()
        .unwrap()
    }

    // ==================== Broadcast & dedup ====================

    #[test]
    fn test_broadcast_delivered_once() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);

        a.broadcast(MsgType::Ping, &[], 1, 100, false).unwrap();
        let packets = hub.drain(b_ep);
        assert_eq!(packets.len(), 1);

        assert!(delivered(&b.receive(InterfaceId(0), &packets[0])));
        assert_eq!(
            b.receive(InterfaceId(0), &packets[0]),
            Receipt::Dropped(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_own_packet_dropped() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (_b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        a.broadcast(MsgType::Info, &[0], 3, 100, true).unwrap();
        let packets = hub.drain(b_ep);
        assert_eq!(
            a.receive(InterfaceId(0), &packets[0]),
            Receipt::Dropped(DropReason::OwnPacket)
        );
    }

    #[test]
    fn test_malformed_dropped() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        assert!(matches!(
            a.receive(InterfaceId(0), &[1, 2, 3]),
            Receipt::Dropped(DropReason::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_body_does_not_mark_seq_seen() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        let body = InfoMessage {
            seq: 7,
            ping_interval_ms: 2000,
            node_name: "alpha".into(),
            public_key: None,
            groups: Vec::new(),
        }
        .encode()
        .unwrap();
        a.broadcast(MsgType::Info, &body, 1, 100, true).unwrap();
        let packets = hub.drain(b_ep);
        let intact = &packets[0];

        let cut = &intact[..intact.len() - 3];
        assert!(matches!(
            b.receive(InterfaceId(0), cut),
            Receipt::Dropped(DropReason::Malformed(_))
        ));
        assert!(delivered(&b.receive(InterfaceId(0), intact)));
    }

    #[test]
    fn test_unknown_message_type_dropped() {
        let hub = MemoryHub::new();
        let (mut b, _) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        let header = PacketHeader {
            packet_type: PacketType::Broadcast,
            seq: 1,
            msg_type: 3,
            sender: "a".parse().unwrap(),
            orig_hop_count: 1,
            hop_count: 1,
            flood_prob: 0,
            nics: Vec::new(),
        };
        let packet = encode_packet(&header, &[]).unwrap();
        assert_eq!(
            b.receive(InterfaceId(0), &packet),
            Receipt::Dropped(DropReason::Malformed(CodecError::UnknownMessageType(3)))
        );
    }

    #[test]
    fn test_broadcast_without_interfaces() {
        let mut t = Transport::new("a".parse().unwrap(), TransportConfig::default());
        assert!(matches!(
            t.broadcast(MsgType::Ping, &[], 1, 100, false),
            Err(TransportError::NoInterfaces)
        ));
    }

    #[test]
    fn test_broadcast_carries_nics_when_asked() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (_b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        a.broadcast(MsgType::Info, &[], 1, 100, true).unwrap();
        a.broadcast(MsgType::Ping, &[], 1, 100, false).unwrap();
        let packets = hub.drain(b_ep);
        let (with, _) = decode_packet(&packets[0]).unwrap();
        let (without, _) = decode_packet(&packets[1]).unwrap();
        assert_eq!(with.nics, vec![nic(1)]);
        assert!(without.nics.is_empty());
    }

    // ==================== Relay ====================

    #[test]
    fn test_relay_decrements_hop_count() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        let (_c, c_ep) = node(&hub, "c", 3, InterfaceKind::UdpBroadcast);

        a.broadcast(MsgType::Ping, &[], 3, 100, false).unwrap();
        hub.drain(c_ep);
        let packets = hub.drain(b_ep);
        let Receipt::Deliver(inbound) = b.receive(InterfaceId(0), &packets[0]) else {
            panic!("expected delivery");
        };
        assert!(b.relay(&inbound, &packets[0]));

        let relayed = hub.drain(c_ep);
        assert_eq!(relayed.len(), 1);
        let (header, _) = decode_packet(&relayed[0]).unwrap();
        assert_eq!(header.hop_count, 2);
        assert_eq!(header.orig_hop_count, 3);
        assert_eq!(header.sender.as_str(), "a");
    }

    #[test]
    fn test_no_relay_on_last_hop() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        a.broadcast(MsgType::Ping, &[], 1, 100, false).unwrap();
        let packets = hub.drain(b_ep);
        let Receipt::Deliver(inbound) = b.receive(InterfaceId(0), &packets[0]) else {
            panic!("expected delivery");
        };
        assert!(!b.relay(&inbound, &packets[0]));
    }

    #[test]
    fn test_zero_flood_probability_never_relays() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        a.broadcast(MsgType::Ping, &[], 5, 0, false).unwrap();
        let packets = hub.drain(b_ep);
        let Receipt::Deliver(inbound) = b.receive(InterfaceId(0), &packets[0]) else {
            panic!("expected delivery");
        };
        for _ in 0..50 {
            assert!(!b.relay(&inbound, &packets[0]));
        }
    }

    #[test]
    fn test_norelay_kind_skips_arrival_interface() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpMulticastNoRelay);
        let (_c, c_ep) = node(&hub, "c", 3, InterfaceKind::UdpBroadcast);

        a.broadcast(MsgType::Ping, &[], 3, 100, false).unwrap();
        hub.drain(c_ep);
        let packets = hub.drain(b_ep);
        let Receipt::Deliver(inbound) = b.receive(InterfaceId(0), &packets[0]) else {
            panic!("expected delivery");
        };
        // b's only interface is the arrival one, so nothing goes out
        assert!(b.relay(&inbound, &packets[0]));
        assert!(hub.drain(c_ep).is_empty());
    }

    // ==================== Reliable unicast ====================

    #[test]
    fn test_reliable_unicast_acked() {
        let hub = MemoryHub::new();
        let (mut a, a_ep) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);

        let seq = a
            .send_unicast(&id("b"), &[nic(2)], MsgType::PeerSearchReply, &reply_body(), a.default_reliable(), 0)
            .unwrap();
        assert_eq!(a.pending_acks(), 1);

        let packets = hub.drain(b_ep);
        assert!(delivered(&b.receive(InterfaceId(0), &packets[0])));

        let acks = hub.drain(a_ep);
        assert_eq!(acks.len(), 1);
        assert_eq!(
            a.receive(InterfaceId(0), &acks[0]),
            Receipt::Acked { seq, pending: true }
        );
        assert_eq!(a.pending_acks(), 0);
    }

    #[test]
    fn test_ack_from_wrong_node_keeps_retrying() {
        let hub = MemoryHub::new();
        let (mut a, a_ep) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (_b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        let (mut c, c_ep) = node(&hub, "c", 3, InterfaceKind::UdpBroadcast);

        let to_b = a
            .send_unicast(&id("b"), &[nic(2)], MsgType::PeerSearchReply, &reply_body(), a.default_reliable(), 0)
            .unwrap();
        let to_c = a
            .send_unicast(&id("c"), &[nic(3)], MsgType::PeerSearchReply, &reply_body(), a.default_reliable(), 0)
            .unwrap();

        // c receives the copy meant for b and ACKs that seq itself
        let stray = hub.drain(b_ep);
        assert!(delivered(&c.receive(InterfaceId(0), &stray[0])));
        let acks = hub.drain(a_ep);
        assert_eq!(
            a.receive(InterfaceId(0), &acks[0]),
            Receipt::Acked { seq: to_b, pending: false }
        );
        assert_eq!(a.pending_acks(), 2);

        let own = hub.drain(c_ep);
        assert!(delivered(&c.receive(InterfaceId(0), &own[0])));
        let acks = hub.drain(a_ep);
        assert_eq!(
            a.receive(InterfaceId(0), &acks[0]),
            Receipt::Acked { seq: to_c, pending: true }
        );
        assert_eq!(a.pending_acks(), 1);
    }

    #[test]
    fn test_reliable_unicast_retries_then_gives_up() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (_b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);

        a.send_unicast(
            &id("b"),
            &[nic(2)],
            MsgType::PeerSearchReply,
            &reply_body(),
            Delivery::Reliable { ttl_ms: 3_500 },
            0,
        )
        .unwrap();
        assert_eq!(hub.drain(b_ep).len(), 1);

        // sweeps inside the interval do nothing
        assert_eq!(a.sweep_acks(500), 0);

        assert_eq!(a.sweep_acks(1_000), 1);
        assert_eq!(a.sweep_acks(2_000), 1);
        assert_eq!(a.sweep_acks(3_000), 1);
        assert_eq!(hub.drain(b_ep).len(), 3);

        assert_eq!(a.sweep_acks(4_000), 0);
        assert_eq!(a.pending_acks(), 0);
        assert!(hub.drain(b_ep).is_empty());
    }

    #[test]
    fn test_unreliable_unicast_not_cached_or_acked() {
        let hub = MemoryHub::new();
        let (mut a, a_ep) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        a.send_unicast(&id("b"), &[nic(2)], MsgType::PeerSearchReply, &reply_body(), Delivery::Unreliable, 0)
            .unwrap();
        assert_eq!(a.pending_acks(), 0);
        let packets = hub.drain(b_ep);
        assert!(delivered(&b.receive(InterfaceId(0), &packets[0])));
        assert!(hub.drain(a_ep).is_empty());
    }

    #[test]
    fn test_unicast_not_deduplicated() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        a.send_unicast(&id("b"), &[nic(2)], MsgType::PeerSearchReply, &reply_body(), Delivery::Unreliable, 0)
            .unwrap();
        let packets = hub.drain(b_ep);
        assert!(delivered(&b.receive(InterfaceId(0), &packets[0])));
        assert!(delivered(&b.receive(InterfaceId(0), &packets[0])));
    }

    // ==================== Routing ====================

    #[test]
    fn test_route_prefers_shared_subnet() {
        let hub = MemoryHub::new();
        let mut t = Transport::new("a".parse().unwrap(), TransportConfig::default());
        t.add_interface(Box::new(hub.attach(
            Nic::new(Ipv4Addr::new(192, 168, 5, 1), Ipv4Addr::new(255, 255, 255, 0)),
            InterfaceKind::UdpBroadcast,
        )));
        t.add_interface(Box::new(hub.attach(nic(1), InterfaceKind::UdpBroadcast)));

        let far = Nic::new(Ipv4Addr::new(172, 16, 0, 9), Ipv4Addr::new(255, 255, 0, 0));
        let (iface, addr) = t.route(&[far, nic(7)]).unwrap();
        assert_eq!(iface, InterfaceId(1));
        assert_eq!(addr, SocketAddrV4::new(nic(7).ip, 8500));
    }

    #[test]
    fn test_route_falls_back_to_first_interface() {
        let hub = MemoryHub::new();
        let (t, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let far = Nic::new(Ipv4Addr::new(172, 16, 0, 9), Ipv4Addr::new(255, 255, 0, 0));
        let (iface, addr) = t.route(&[far]).unwrap();
        assert_eq!(iface, InterfaceId(0));
        assert_eq!(*addr.ip(), far.ip);
    }

    #[test]
    fn test_route_without_peer_nics() {
        let hub = MemoryHub::new();
        let (t, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        assert!(matches!(t.route(&[]), Err(TransportError::Unreachable(_))));
    }

    #[test]
    fn test_forget_sender_accepts_restarted_counter() {
        let hub = MemoryHub::new();
        let (mut a, _) = node(&hub, "a", 1, InterfaceKind::UdpBroadcast);
        let (mut b, b_ep) = node(&hub, "b", 2, InterfaceKind::UdpBroadcast);
        a.broadcast(MsgType::Ping, &[], 1, 100, false).unwrap();
        let first = hub.drain(b_ep);
        assert!(delivered(&b.receive(InterfaceId(0), &first[0])));

        b.forget_sender(&"a".parse().unwrap());
        assert!(delivered(&b.receive(InterfaceId(0), &first[0])));
    }
}
