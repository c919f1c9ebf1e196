//! Membership engine.
//!
//! [`GroupManager`] tracks peers and their advertised groups, owns this
//! node's groups, runs the PING/INFO cycle and answers searches. All state
//! sits behind one mutex together with the [`Transport`](crate::transport::Transport),
//! so inbound handlers and API calls never interleave.

mod advert;
mod config;
mod engine;
mod groups;
mod handlers;
mod maintenance;
mod peers;
mod search;

pub use config::EngineConfig;
pub use engine::{EngineView, GroupManager, PeerGroupOptions, SearchOptions};
pub use groups::{
    GroupListing, GroupOrigin, GroupSecret, JoinMode, JoinRecord, LocalGroup, LocalGroupDetail,
    MAX_GROUP_NAME_LEN, Member, PeerGroupParams, validate_group_name, validate_password,
};
pub use peers::{GroupDiff, Peer, PeerTable, diff_groups};
pub use search::SearchRecord;

use crate::channel::ChannelError;
use crate::crypto::CryptoError;
use crate::protocol::CodecError;
use crate::transport::TransportError;
use thiserror::Error;

/// Largest search or reply parameter accepted from the application.
pub const MAX_PARAM_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("Invalid group name '{0}'")]
    InvalidGroupName(String),
    #[error("Invalid password")]
    InvalidPassword,
    #[error("Group '{0}' already exists")]
    DuplicateGroup(String),
    #[error("Group '{0}' not found")]
    UnknownGroup(String),
    #[error("Unknown peer {0}")]
    UnknownPeer(String),
    #[error("Unknown search {0}")]
    UnknownSearch(String),
    #[error("Already joined group '{0}'")]
    AlreadyJoined(String),
    #[error("Have not joined group '{0}'")]
    NotJoined(String),
    #[error("Group '{0}' is the wrong kind for this operation")]
    WrongGroupKind(String),
    #[error("Not a member of group '{0}'")]
    NotAMember(String),
    #[error("Parameter of {len} bytes exceeds {max}")]
    ParamTooLarge { len: usize, max: usize },
    #[error("Authentication failed for group '{0}'")]
    Authentication(String),
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, GroupError>;
