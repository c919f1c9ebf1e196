//! Local groups and join records.
//!
//! A [`LocalGroup`] is the common part (name and members) plus a
//! [`LocalGroupDetail`] carrying what each of the four kinds needs. Groups
//! live in one map keyed by name, which is what makes names unique across
//! all kinds.

use super::{GroupError, Result};
use crate::crypto::{GroupKey, generate_nonce};
use crate::node_id::NodeId;
use crate::protocol::{CodecError, GroupAdvert, GroupKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

pub const MAX_GROUP_NAME_LEN: usize = 255;

/// Peer group data travels with a 16-bit length.
pub const MAX_GROUP_DATA_LEN: usize = u16::MAX as usize;

pub fn validate_group_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_GROUP_NAME_LEN || name.chars().any(char::is_whitespace)
    {
        return Err(GroupError::InvalidGroupName(name.to_string()));
    }
    Ok(())
}

/// Plaintext length of peer group data as carried on the wire.
pub fn group_data_len(data: &[u8]) -> Result<u16> {
    u16::try_from(data.len()).map_err(|_| {
        GroupError::Codec(CodecError::FieldTooLong {
            field: "group data",
            len: data.len(),
            max: MAX_GROUP_DATA_LEN,
        })
    })
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(GroupError::InvalidPassword);
    }
    Ok(())
}

/// One member of a local group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub node_id: NodeId,
    pub addr: Option<Ipv4Addr>,
    pub port: u16,
    pub public_key: Option<String>,
    /// Join data for managed groups, the member's group data for peer groups.
    pub data: Option<Vec<u8>>,
}

/// Password material of a private group.
#[derive(Clone)]
pub struct GroupSecret {
    pub password: String,
    pub key: GroupKey,
    /// Fresh every run; proves password knowledge to joiners.
    pub nonce: String,
    pub encrypted_nonce: String,
}

impl GroupSecret {
    pub fn new(password: &str) -> Result<Self> {
        validate_password(password)?;
        let key = GroupKey::derive(password);
        let nonce = generate_nonce();
        let encrypted_nonce = key.encrypt_token(&nonce)?;
        Ok(Self {
            password: password.to_string(),
            key,
            nonce,
            encrypted_nonce,
        })
    }
}

impl fmt::Debug for GroupSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSecret")
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}

/// Dissemination settings and data of a peer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerGroupParams {
    pub data: Vec<u8>,
    pub hop_count: u8,
    pub flood_prob: u8,
}

#[derive(Debug, Clone)]
pub enum LocalGroupDetail {
    PublicManaged,
    PrivateManaged {
        secret: GroupSecret,
    },
    PublicPeer {
        params: PeerGroupParams,
    },
    PrivatePeer {
        secret: GroupSecret,
        params: PeerGroupParams,
        /// Group name encrypted under the group key.
        encrypted_group_name: String,
        /// `params.data` encrypted under the group key, empty when there is no data.
        encrypted_data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct LocalGroup {
    pub name: String,
    pub members: BTreeMap<NodeId, Member>,
    pub detail: LocalGroupDetail,
}

impl LocalGroup {
    pub fn public_managed(name: &str) -> Self {
        Self::with_detail(name, LocalGroupDetail::PublicManaged)
    }

    pub fn private_managed(name: &str, password: &str) -> Result<Self> {
        Ok(Self::with_detail(
            name,
            LocalGroupDetail::PrivateManaged {
                secret: GroupSecret::new(password)?,
            },
        ))
    }

    pub fn public_peer(name: &str, params: PeerGroupParams) -> Self {
        Self::with_detail(name, LocalGroupDetail::PublicPeer { params })
    }

    pub fn private_peer(name: &str, password: &str, params: PeerGroupParams) -> Result<Self> {
        group_data_len(&params.data)?;
        let secret = GroupSecret::new(password)?;
        let encrypted_group_name = secret.key.encrypt_token(name)?;
        let encrypted_data = seal_data(&secret.key, &params.data)?;
        Ok(Self::with_detail(
            name,
            LocalGroupDetail::PrivatePeer {
                secret,
                params,
                encrypted_group_name,
                encrypted_data,
            },
        ))
    }

    fn with_detail(name: &str, detail: LocalGroupDetail) -> Self {
        Self {
            name: name.to_string(),
            members: BTreeMap::new(),
            detail,
        }
    }

    pub fn kind(&self) -> GroupKind {
        match self.detail {
            LocalGroupDetail::PublicManaged => GroupKind::PublicManaged,
            LocalGroupDetail::PrivateManaged { .. } => GroupKind::PrivateManaged,
            LocalGroupDetail::PublicPeer { .. } => GroupKind::PublicPeer,
            LocalGroupDetail::PrivatePeer { .. } => GroupKind::PrivatePeer,
        }
    }

    pub fn secret(&self) -> Option<&GroupSecret> {
        match &self.detail {
            LocalGroupDetail::PrivateManaged { secret }
            | LocalGroupDetail::PrivatePeer { secret, .. } => Some(secret),
            _ => None,
        }
    }

    pub fn peer_params(&self) -> Option<&PeerGroupParams> {
        match &self.detail {
            LocalGroupDetail::PublicPeer { params } | LocalGroupDetail::PrivatePeer { params, .. } => {
                Some(params)
            }
            _ => None,
        }
    }

    /// Replace a peer group's data, re-encrypting it for private groups.
    pub fn set_peer_data(&mut self, data: Vec<u8>, hop_count: u8, flood_prob: u8) -> Result<()> {
        group_data_len(&data)?;
        match &mut self.detail {
            LocalGroupDetail::PublicPeer { params } => {
                *params = PeerGroupParams {
                    data,
                    hop_count,
                    flood_prob,
                };
            }
            LocalGroupDetail::PrivatePeer {
                secret,
                params,
                encrypted_data,
                ..
            } => {
                *encrypted_data = seal_data(&secret.key, &data)?;
                *params = PeerGroupParams {
                    data,
                    hop_count,
                    flood_prob,
                };
            }
            _ => return Err(GroupError::WrongGroupKind(self.name.clone())),
        }
        Ok(())
    }

    /// The entry this group contributes to our INFO message.
    pub fn advert(&self) -> GroupAdvert {
        let name = self.name.clone();
        match &self.detail {
            LocalGroupDetail::PublicManaged => GroupAdvert::PublicManaged { name },
            LocalGroupDetail::PrivateManaged { secret } => GroupAdvert::PrivateManaged {
                name,
                encrypted_nonce: secret.encrypted_nonce.clone(),
            },
            LocalGroupDetail::PublicPeer { params } => GroupAdvert::PublicPeer {
                name,
                data: params.data.clone(),
            },
            LocalGroupDetail::PrivatePeer {
                secret,
                params,
                encrypted_group_name,
                encrypted_data,
            } => GroupAdvert::PrivatePeer {
                name,
                encrypted_group_name: encrypted_group_name.clone(),
                encrypted_nonce: secret.encrypted_nonce.clone(),
                unencrypted_len: u16::try_from(params.data.len()).unwrap_or(u16::MAX),
                encrypted_data: encrypted_data.clone(),
            },
        }
    }

    pub fn has_member(&self, node_id: &NodeId) -> bool {
        self.members.contains_key(node_id)
    }
}

fn seal_data(key: &GroupKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    Ok(key.encrypt(data)?)
}

/// Decrypt private peer group data and cut it to its advertised length.
pub fn open_data(key: &GroupKey, encrypted: &[u8], unencrypted_len: u16) -> Option<Vec<u8>> {
    if encrypted.is_empty() {
        return Some(Vec::new());
    }
    let mut plain = key.decrypt(encrypted).ok()?;
    plain.truncate(unencrypted_len as usize);
    Some(plain)
}

/// What happens to a managed-group join when the creator disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinMode {
    /// Dropped for good when the creator times out.
    #[default]
    OneTimeOnly,
    /// Kept across creator outages.
    Persistent,
}

/// A managed group we joined at another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub group: String,
    pub creator: NodeId,
    pub kind: GroupKind,
    pub mode: JoinMode,
    pub join_data: Option<Vec<u8>>,
    pub password: Option<String>,
}

/// Where an entry in the compiled group list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOrigin {
    Local,
    /// A peer group advertised by a peer, not defined here.
    RemotePeer { creator: NodeId },
    /// A managed group advertised by its creator.
    RemoteManaged { creator: NodeId, joined: bool },
}

/// One entry of [`GroupManager::groups`](super::GroupManager::groups).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupListing {
    pub name: String,
    pub kind: GroupKind,
    pub origin: GroupOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(data: &[u8]) -> PeerGroupParams {
        PeerGroupParams {
            data: data.to_vec(),
            hop_count: 2,
            flood_prob: 100,
        }
    }

    // ==================== Names ====================

    #[test]
    fn test_group_name_rules() {
        assert!(validate_group_name("ops").is_ok());
        assert!(validate_group_name("ops-team_2").is_ok());
        assert!(validate_group_name("").is_err());
        assert!(validate_group_name("two words").is_err());
        assert!(validate_group_name("tab\there").is_err());
        assert!(validate_group_name(&"x".repeat(256)).is_err());
        assert!(validate_group_name(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn test_empty_password_rejected() {
        assert!(matches!(
            LocalGroup::private_managed("vault", ""),
            Err(GroupError::InvalidPassword)
        ));
    }

    // ==================== Adverts ====================

    #[test]
    fn test_private_peer_advert_proves_password() {
        let group = LocalGroup::private_peer("red", "pw", params(b"hello")).unwrap();
        let GroupAdvert::PrivatePeer {
            encrypted_group_name,
            encrypted_nonce,
            unencrypted_len,
            encrypted_data,
            ..
        } = group.advert()
        else {
            panic!("wrong advert kind");
        };

        let key = GroupKey::derive("pw");
        assert!(key.token_matches(&encrypted_group_name, "red"));
        assert_eq!(
            key.decrypt_token(&encrypted_nonce).unwrap(),
            group.secret().unwrap().nonce
        );
        assert_eq!(
            open_data(&key, &encrypted_data, unencrypted_len).unwrap(),
            b"hello"
        );
        assert!(open_data(&GroupKey::derive("other"), &encrypted_data, unencrypted_len).is_none());
    }

    #[test]
    fn test_empty_private_data_stays_empty() {
        let group = LocalGroup::private_peer("red", "pw", params(b"")).unwrap();
        match group.advert() {
            GroupAdvert::PrivatePeer { encrypted_data, .. } => assert!(encrypted_data.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nonce_differs_per_group() {
        let a = LocalGroup::private_managed("a", "pw").unwrap();
        let b = LocalGroup::private_managed("b", "pw").unwrap();
        assert_ne!(a.secret().unwrap().nonce, b.secret().unwrap().nonce);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(LocalGroup::public_managed("a").kind(), GroupKind::PublicManaged);
        assert_eq!(
            LocalGroup::public_peer("b", params(b"")).kind(),
            GroupKind::PublicPeer
        );
        assert!(LocalGroup::public_managed("a").peer_params().is_none());
    }

    // ==================== Data updates ====================

    #[test]
    fn test_set_peer_data_reencrypts() {
        let mut group = LocalGroup::private_peer("red", "pw", params(b"v1")).unwrap();
        group.set_peer_data(b"version two".to_vec(), 4, 50).unwrap();
        let p = group.peer_params().unwrap();
        assert_eq!((p.hop_count, p.flood_prob), (4, 50));
        match group.advert() {
            GroupAdvert::PrivatePeer {
                encrypted_data,
                unencrypted_len,
                ..
            } => assert_eq!(
                open_data(&GroupKey::derive("pw"), &encrypted_data, unencrypted_len).unwrap(),
                b"version two"
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_peer_data_on_managed_group() {
        let mut group = LocalGroup::public_managed("lobby");
        assert!(matches!(
            group.set_peer_data(vec![1], 1, 100),
            Err(GroupError::WrongGroupKind(_))
        ));
    }

    #[test]
    fn test_secret_debug_hides_password() {
        let secret = GroupSecret::new("hunter2").unwrap();
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
