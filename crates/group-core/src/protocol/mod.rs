//! Binary wire protocol.
//!
//! Every datagram is a packet header followed by one message body:
//! - [`packet`]: the fixed header (signature, packet type, sequence number,
//!   sender slot, hop/flood parameters, NIC list)
//! - [`message`]: the six message bodies (PING, INFO, GROUP_DATA and the
//!   three search messages)
//! - [`validate`]: structural walk that rejects truncated or malformed bodies
//!   before anything else reads them
//! - [`seq`]: wraparound-aware sequence number freshness
//!
//! All integers are big-endian. Nothing here holds state or does I/O.

pub mod message;
pub mod packet;
pub mod seq;
pub mod validate;
mod wire;

pub use message::{
    GroupAdvert, GroupDataMessage, GroupKind, InfoMessage, Message, PeerSearchMessage,
    PrivateSearchMessage, SearchReplyMessage, set_search_ttl,
};
pub use packet::{Nic, PacketHeader, PacketType, decode_packet, encode_packet, set_hop_count};
pub use seq::{SeqCounter, is_fresher};
pub use validate::validate_message;

use thiserror::Error;

/// Largest datagram the protocol allows.
pub const MAX_PACKET_SIZE: usize = 65535;

/// Constant first four bytes of every packet.
pub const PACKET_SIGNATURE: u32 = 0xAC00_AC00;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Buffer truncated: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("Bad packet signature {0:#010x}")]
    BadSignature(u32),
    #[error("Unknown packet type {0}")]
    UnknownPacketType(u8),
    #[error("Unknown message type {0:#04x}")]
    UnknownMessageType(u8),
    #[error("String field at offset {0} is not NUL-terminated")]
    MissingTerminator(usize),
    #[error("String field at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),
    #[error("Identifier slot at offset {0} is empty or malformed")]
    InvalidIdentifier(usize),
    #[error("Unknown group kind {0} in advertisement")]
    UnknownGroupKind(u8),
    #[error("Field {field} is {len} bytes, at most {max} allowed")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("Packet is {0} bytes, at most 65535 allowed")]
    PacketTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Message type byte carried in the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Ping,
    Info,
    GroupData,
    PeerSearch,
    PeerSearchPpg,
    PeerSearchReply,
}

impl MsgType {
    pub fn as_u8(self) -> u8 {
        match self {
            MsgType::Ping => 1,
            MsgType::Info => 2,
            MsgType::GroupData => 4,
            MsgType::PeerSearch => 0x50,
            MsgType::PeerSearchPpg => 0x51,
            MsgType::PeerSearchReply => 0x52,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MsgType::Ping),
            2 => Ok(MsgType::Info),
            4 => Ok(MsgType::GroupData),
            0x50 => Ok(MsgType::PeerSearch),
            0x51 => Ok(MsgType::PeerSearchPpg),
            0x52 => Ok(MsgType::PeerSearchReply),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_type_codes() {
        assert_eq!(MsgType::Ping.as_u8(), 1);
        assert_eq!(MsgType::Info.as_u8(), 2);
        assert_eq!(MsgType::GroupData.as_u8(), 4);
        assert_eq!(MsgType::PeerSearch.as_u8(), 0x50);
        assert_eq!(MsgType::PeerSearchPpg.as_u8(), 0x51);
        assert_eq!(MsgType::PeerSearchReply.as_u8(), 0x52);
    }

    #[test]
    fn test_msg_type_from_u8() {
        for t in [
            MsgType::Ping,
            MsgType::Info,
            MsgType::GroupData,
            MsgType::PeerSearch,
            MsgType::PeerSearchPpg,
            MsgType::PeerSearchReply,
        ] {
            assert_eq!(MsgType::from_u8(t.as_u8()), Ok(t));
        }
        assert_eq!(MsgType::from_u8(3), Err(CodecError::UnknownMessageType(3)));
    }
}
