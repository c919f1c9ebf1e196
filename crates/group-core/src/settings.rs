//! Node settings that survive a restart.
//!
//! A [`NodeSettings`] snapshot carries the node identity, its key pair,
//! both sequence counters and the groups it created. Restoring it resumes
//! the counters past the stored values so peers keep accepting our INFO
//! and GROUP_DATA messages as fresh.

use crate::crypto::CryptoError;
use crate::membership::GroupError;
use crate::node_id::NodeId;
use crate::protocol::GroupKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Stored public key does not match the private key")]
    KeyMismatch,
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Cannot recreate group: {0}")]
    Group(#[from] GroupError),
    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One group this node created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSettings {
    pub name: String,
    pub kind: GroupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Peer group data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(default = "default_hop_count")]
    pub hop_count: u8,
    #[serde(default = "default_flood_prob")]
    pub flood_prob: u8,
}

fn default_hop_count() -> u8 {
    1
}

fn default_flood_prob() -> u8 {
    100
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSettings {
    pub port: u16,
    pub node_id: NodeId,
    pub node_name: String,
    /// Last INFO sequence number sent.
    pub info_seq: u16,
    /// Last GROUP_DATA sequence number sent.
    pub group_data_seq: u16,
    pub public_key: String,
    pub private_key: String,
    #[serde(default)]
    pub groups: Vec<GroupSettings>,
}

impl NodeSettings {
    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }
}
