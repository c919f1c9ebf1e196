//! Message body codecs.
//!
//! C-strings are `len:u16 | bytes | NUL`; an optional public key with
//! `len == 0` is absent and carries no NUL. Blobs are `len:u16 | bytes`.

use super::packet::Nic;
use super::validate::validate_message;
use super::wire::{Reader, Writer};
use super::{CodecError, MsgType, Result};
use crate::node_id::{ID_SLOT_LEN, NodeId, SearchId};
use serde::{Deserialize, Serialize};

/// The four group flavours, also used as the INFO group-entry tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupKind {
    PublicManaged,
    PrivateManaged,
    PublicPeer,
    PrivatePeer,
}

impl GroupKind {
    pub fn as_u8(self) -> u8 {
        match self {
            GroupKind::PublicManaged => 1,
            GroupKind::PrivateManaged => 2,
            GroupKind::PublicPeer => 3,
            GroupKind::PrivatePeer => 4,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(GroupKind::PublicManaged),
            2 => Ok(GroupKind::PrivateManaged),
            3 => Ok(GroupKind::PublicPeer),
            4 => Ok(GroupKind::PrivatePeer),
            other => Err(CodecError::UnknownGroupKind(other)),
        }
    }

    pub fn is_managed(self) -> bool {
        matches!(self, GroupKind::PublicManaged | GroupKind::PrivateManaged)
    }

    pub fn is_private(self) -> bool {
        matches!(self, GroupKind::PrivateManaged | GroupKind::PrivatePeer)
    }
}

/// One group entry inside an INFO message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAdvert {
    PublicManaged {
        name: String,
    },
    PrivateManaged {
        name: String,
        encrypted_nonce: String,
    },
    PublicPeer {
        name: String,
        data: Vec<u8>,
    },
    PrivatePeer {
        name: String,
        encrypted_group_name: String,
        encrypted_nonce: String,
        unencrypted_len: u16,
        encrypted_data: Vec<u8>,
    },
}

impl GroupAdvert {
    pub fn name(&self) -> &str {
        match self {
            GroupAdvert::PublicManaged { name }
            | GroupAdvert::PrivateManaged { name, .. }
            | GroupAdvert::PublicPeer { name, .. }
            | GroupAdvert::PrivatePeer { name, .. } => name,
        }
    }

    pub fn kind(&self) -> GroupKind {
        match self {
            GroupAdvert::PublicManaged { .. } => GroupKind::PublicManaged,
            GroupAdvert::PrivateManaged { .. } => GroupKind::PrivateManaged,
            GroupAdvert::PublicPeer { .. } => GroupKind::PublicPeer,
            GroupAdvert::PrivatePeer { .. } => GroupKind::PrivatePeer,
        }
    }

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.u8(self.kind().as_u8());
        w.cstr("group name", self.name())?;
        match self {
            GroupAdvert::PublicManaged { .. } => {}
            GroupAdvert::PrivateManaged {
                encrypted_nonce, ..
            } => w.cstr("encrypted nonce", encrypted_nonce)?,
            GroupAdvert::PublicPeer { data, .. } => w.blob("group data", data)?,
            GroupAdvert::PrivatePeer {
                encrypted_group_name,
                encrypted_nonce,
                unencrypted_len,
                encrypted_data,
                ..
            } => {
                w.cstr("encrypted group name", encrypted_group_name)?;
                w.cstr("encrypted nonce", encrypted_nonce)?;
                w.u16(*unencrypted_len);
                w.blob("encrypted group data", encrypted_data)?;
            }
        }
        Ok(())
    }

    fn read(kind: GroupKind, r: &mut Reader<'_>) -> Result<Self> {
        let name = r.cstr()?;
        Ok(match kind {
            GroupKind::PublicManaged => GroupAdvert::PublicManaged { name },
            GroupKind::PrivateManaged => GroupAdvert::PrivateManaged {
                name,
                encrypted_nonce: r.cstr()?,
            },
            GroupKind::PublicPeer => GroupAdvert::PublicPeer {
                name,
                data: r.blob()?,
            },
            GroupKind::PrivatePeer => GroupAdvert::PrivatePeer {
                name,
                encrypted_group_name: r.cstr()?,
                encrypted_nonce: r.cstr()?,
                unencrypted_len: r.u16()?,
                encrypted_data: r.blob()?,
            },
        })
    }
}

/// Full node advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMessage {
    pub seq: u16,
    pub ping_interval_ms: u32,
    pub node_name: String,
    pub public_key: Option<String>,
    pub groups: Vec<GroupAdvert>,
}

impl InfoMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        w.u16(self.seq);
        w.u32(self.ping_interval_ms);
        w.cstr("node name", &self.node_name)?;
        w.opt_cstr("public key", self.public_key.as_deref())?;
        for group in &self.groups {
            group.write(&mut w)?;
        }
        w.u8(0);
        Ok(w.into_inner())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let seq = r.u16()?;
        let ping_interval_ms = r.u32()?;
        let node_name = r.cstr()?;
        let public_key = r.opt_cstr()?;
        let mut groups = Vec::new();
        loop {
            match r.u8()? {
                0 => break,
                tag => groups.push(GroupAdvert::read(GroupKind::from_u8(tag)?, r)?),
            }
        }
        Ok(Self {
            seq,
            ping_interval_ms,
            node_name,
            public_key,
            groups,
        })
    }
}

/// Peer group data update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDataMessage {
    pub seq: u16,
    pub group_name: String,
    /// Plaintext length; ciphertext for private groups is longer.
    pub unencrypted_len: u16,
    pub data: Vec<u8>,
}

impl GroupDataMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        w.u16(self.seq);
        w.cstr("group name", &self.group_name)?;
        w.u16(self.unencrypted_len);
        w.blob("group data", &self.data)?;
        Ok(w.into_inner())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            seq: r.u16()?,
            group_name: r.cstr()?,
            unencrypted_len: r.u16()?,
            data: r.blob()?,
        })
    }
}

/// Search request addressed to a public peer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSearchMessage {
    pub originator: NodeId,
    pub nics: Vec<Nic>,
    pub ttl: i32,
    pub search_id: SearchId,
    pub public_key: Option<String>,
    pub group_name: String,
    pub param: Vec<u8>,
}

impl PeerSearchMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        write_search_prefix(
            &mut w,
            &self.originator,
            &self.nics,
            self.ttl,
            &self.search_id,
            self.public_key.as_deref(),
            &self.group_name,
        )?;
        w.blob("search param", &self.param)?;
        Ok(w.into_inner())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            originator: r.node_id()?,
            nics: r.nics()?,
            ttl: r.i32()?,
            search_id: r.search_id()?,
            public_key: r.opt_cstr()?,
            group_name: r.cstr()?,
            param: r.blob()?,
        })
    }
}

/// Search request addressed to a private peer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateSearchMessage {
    pub originator: NodeId,
    pub nics: Vec<Nic>,
    pub ttl: i32,
    pub search_id: SearchId,
    pub public_key: Option<String>,
    pub group_name: String,
    pub encrypted_group_name: String,
    pub unencrypted_len: u16,
    pub encrypted_param: Vec<u8>,
}

impl PrivateSearchMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        write_search_prefix(
            &mut w,
            &self.originator,
            &self.nics,
            self.ttl,
            &self.search_id,
            self.public_key.as_deref(),
            &self.group_name,
        )?;
        w.cstr("encrypted group name", &self.encrypted_group_name)?;
        w.u16(self.unencrypted_len);
        w.blob("encrypted search param", &self.encrypted_param)?;
        Ok(w.into_inner())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            originator: r.node_id()?,
            nics: r.nics()?,
            ttl: r.i32()?,
            search_id: r.search_id()?,
            public_key: r.opt_cstr()?,
            group_name: r.cstr()?,
            encrypted_group_name: r.cstr()?,
            unencrypted_len: r.u16()?,
            encrypted_param: r.blob()?,
        })
    }
}

fn write_search_prefix(
    w: &mut Writer,
    originator: &NodeId,
    nics: &[Nic],
    ttl: i32,
    search_id: &SearchId,
    public_key: Option<&str>,
    group_name: &str,
) -> Result<()> {
    w.id_slot("originator", originator.as_str())?;
    w.nics(nics)?;
    w.i32(ttl);
    w.id_slot("search id", search_id.as_str())?;
    w.opt_cstr("public key", public_key)?;
    w.cstr("group name", group_name)
}

/// Reply to a search, encrypted for the searcher when its key is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReplyMessage {
    pub search_id: SearchId,
    pub param: Vec<u8>,
}

impl SearchReplyMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        w.id_slot("search id", self.search_id.as_str())?;
        w.blob("reply param", &self.param)?;
        Ok(w.into_inner())
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            search_id: r.search_id()?,
            param: r.blob()?,
        })
    }
}

/// Any decoded message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    Info(InfoMessage),
    GroupData(GroupDataMessage),
    PeerSearch(PeerSearchMessage),
    PeerSearchPpg(PrivateSearchMessage),
    PeerSearchReply(SearchReplyMessage),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Ping => MsgType::Ping,
            Message::Info(_) => MsgType::Info,
            Message::GroupData(_) => MsgType::GroupData,
            Message::PeerSearch(_) => MsgType::PeerSearch,
            Message::PeerSearchPpg(_) => MsgType::PeerSearchPpg,
            Message::PeerSearchReply(_) => MsgType::PeerSearchReply,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Message::Ping => Ok(Vec::new()),
            Message::Info(m) => m.encode(),
            Message::GroupData(m) => m.encode(),
            Message::PeerSearch(m) => m.encode(),
            Message::PeerSearchPpg(m) => m.encode(),
            Message::PeerSearchReply(m) => m.encode(),
        }
    }

    /// Validate and decode a body of the given type.
    pub fn decode(msg_type: MsgType, body: &[u8]) -> Result<Self> {
        validate_message(msg_type, body)?;
        let mut r = Reader::new(body);
        let message = match msg_type {
            MsgType::Ping => Message::Ping,
            MsgType::Info => Message::Info(InfoMessage::read(&mut r)?),
            MsgType::GroupData => Message::GroupData(GroupDataMessage::read(&mut r)?),
            MsgType::PeerSearch => Message::PeerSearch(PeerSearchMessage::read(&mut r)?),
            MsgType::PeerSearchPpg => Message::PeerSearchPpg(PrivateSearchMessage::read(&mut r)?),
            MsgType::PeerSearchReply => {
                Message::PeerSearchReply(SearchReplyMessage::read(&mut r)?)
            }
        };
        r.finish()?;
        Ok(message)
    }
}

/// Rewrite the TTL field of an encoded PEER_SEARCH or PEER_SEARCH_PPG body.
pub fn set_search_ttl(body: &mut [u8], ttl: i32) -> Result<()> {
    let nic_count_at = ID_SLOT_LEN;
    let nic_count = *body.get(nic_count_at).ok_or(CodecError::Truncated {
        offset: nic_count_at,
        needed: 1,
    })? as usize;
    let ttl_at = nic_count_at + 1 + nic_count * 8;
    let field = body.get_mut(ttl_at..ttl_at + 4).ok_or(CodecError::Truncated {
        offset: ttl_at,
        needed: 4,
    })?;
    field.copy_from_slice(&ttl.to_be_bytes());
    Ok(())
}
