//! Packet header codec.
//!
//! Layout:
//! `signature:u32 | packetType:u8 | seq:u16 | msgType:u8 | senderId[64] |
//! origHopCount:u8 | hopCount:u8 | floodProb:u8 | nicCount:u8 |
//! nicCount × (ip[4] | netmask[4]) | payload`

use super::wire::{Reader, Writer};
use super::{CodecError, MAX_PACKET_SIZE, PACKET_SIGNATURE, Result};
use crate::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Offset of the sequence number within a packet.
pub const SEQ_OFFSET: usize = 5;
/// Offset of the remaining hop count within a packet.
pub const HOP_COUNT_OFFSET: usize = 73;
/// Size of the header without any NIC entries.
pub const BASE_HEADER_LEN: usize = 76;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Broadcast,
    UnicastReliable,
    UnicastUnreliable,
    Ack,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        match self {
            PacketType::Broadcast => 1,
            PacketType::UnicastReliable => 2,
            PacketType::UnicastUnreliable => 3,
            PacketType::Ack => 4,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketType::Broadcast),
            2 => Ok(PacketType::UnicastReliable),
            3 => Ok(PacketType::UnicastUnreliable),
            4 => Ok(PacketType::Ack),
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }
}

/// One advertised network interface: IPv4 address plus netmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nic {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl Nic {
    pub fn new(ip: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self { ip, netmask }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip) & u32::from(self.netmask))
    }

    /// Whether `addr` falls inside this interface's subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(addr) & mask == u32::from(self.ip) & mask
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub seq: u16,
    /// Raw message type byte. ACKs echo the type of the packet they confirm.
    pub msg_type: u8,
    pub sender: NodeId,
    pub orig_hop_count: u8,
    pub hop_count: u8,
    pub flood_prob: u8,
    pub nics: Vec<Nic>,
}

/// Serialize a header and payload into one datagram.
pub fn encode_packet(header: &PacketHeader, payload: &[u8]) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.u32(PACKET_SIGNATURE);
    w.u8(header.packet_type.as_u8());
    w.u16(header.seq);
    w.u8(header.msg_type);
    w.id_slot("sender", header.sender.as_str())?;
    w.u8(header.orig_hop_count);
    w.u8(header.hop_count);
    w.u8(header.flood_prob);
    w.nics(&header.nics)?;
    w.bytes(payload);

    let buf = w.into_inner();
    if buf.len() > MAX_PACKET_SIZE {
        return Err(CodecError::PacketTooLarge(buf.len()));
    }
    Ok(buf)
}

/// Split a datagram into its header and message body.
pub fn decode_packet(buf: &[u8]) -> Result<(PacketHeader, &[u8])> {
    if buf.len() > MAX_PACKET_SIZE {
        return Err(CodecError::PacketTooLarge(buf.len()));
    }
    let mut r = Reader::new(buf);
    let signature = r.u32()?;
    if signature != PACKET_SIGNATURE {
        return Err(CodecError::BadSignature(signature));
    }
    let packet_type = PacketType::from_u8(r.u8()?)?;
    let seq = r.u16()?;
    let msg_type = r.u8()?;
    let sender = r.node_id()?;
    let orig_hop_count = r.u8()?;
    let hop_count = r.u8()?;
    let flood_prob = r.u8()?;
    let nics = r.nics()?;

    let header = PacketHeader {
        packet_type,
        seq,
        msg_type,
        sender,
        orig_hop_count,
        hop_count,
        flood_prob,
        nics,
    };
    Ok((header, r.rest()))
}

/// Overwrite the hop count of an encoded packet in place.
pub fn set_hop_count(buf: &mut [u8], hop_count: u8) -> Result<()> {
    match buf.get_mut(HOP_COUNT_OFFSET) {
        Some(b) => {
            *b = hop_count;
            Ok(())
        }
        None => Err(CodecError::Truncated {
            offset: HOP_COUNT_OFFSET,
            needed: 1,
        }),
    }
}
