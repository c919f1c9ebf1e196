//! Node and search identifiers.
//!
//! Both travel on the wire in fixed 64-byte, NUL-padded slots, so an
//! identifier is any non-empty string of at most 64 bytes that contains no
//! NUL and no whitespace. Freshly generated identifiers are UUID v4 strings.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Size of the fixed identifier slot in packets and message bodies.
pub const ID_SLOT_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeIdError {
    #[error("Identifier cannot be empty")]
    Empty,
    #[error("Identifier is {0} bytes, at most 64 allowed")]
    TooLong(usize),
    #[error("Identifier contains a NUL or whitespace character")]
    InvalidCharacter,
}

fn validate(s: &str) -> Result<(), NodeIdError> {
    if s.is_empty() {
        return Err(NodeIdError::Empty);
    }
    if s.len() > ID_SLOT_LEN {
        return Err(NodeIdError::TooLong(s.len()));
    }
    if s.chars().any(|c| c == '\0' || c.is_whitespace()) {
        return Err(NodeIdError::InvalidCharacter);
    }
    Ok(())
}

/// Unique identifier of a node in the group fabric.
///
/// # Examples
/// ```
/// use group_core::NodeId;
///
/// let id = NodeId::generate();
/// assert_eq!(id.as_str().len(), 36);
///
/// let parsed: NodeId = "node-a".parse().unwrap();
/// assert_eq!(parsed.to_string(), "node-a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a new random node ID (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of a peer search request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchId(String);

impl SearchId {
    /// Generate a new random search ID (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for SearchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl FromStr for SearchId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)?;
        Ok(Self(s.to_string()))
    }
}

// Serialize as plain strings so persisted state and logs stay readable
impl serde::Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for SearchId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for SearchId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_uuid() {
        let id = NodeId::generate();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_generate_unique() {
        assert_ne!(NodeId::generate(), NodeId::generate());
        assert_ne!(SearchId::generate(), SearchId::generate());
    }

    #[test]
    fn test_parse_and_display() {
        let id: NodeId = "alpha-01".parse().unwrap();
        assert_eq!(id.to_string(), "alpha-01");
        assert_eq!(id.as_str(), "alpha-01");
    }

    #[test]
    fn test_max_length_accepted() {
        let s = "x".repeat(ID_SLOT_LEN);
        assert!(s.parse::<NodeId>().is_ok());
    }

    #[test]
    fn test_reject_too_long() {
        let s = "x".repeat(ID_SLOT_LEN + 1);
        assert_eq!(s.parse::<NodeId>(), Err(NodeIdError::TooLong(65)));
    }

    #[test]
    fn test_reject_empty() {
        assert_eq!("".parse::<NodeId>(), Err(NodeIdError::Empty));
        assert_eq!("".parse::<SearchId>(), Err(NodeIdError::Empty));
    }

    #[test]
    fn test_reject_whitespace_and_nul() {
        assert_eq!("a b".parse::<NodeId>(), Err(NodeIdError::InvalidCharacter));
        assert_eq!("a\0b".parse::<NodeId>(), Err(NodeIdError::InvalidCharacter));
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = NodeId::generate();
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(json, format!("\"{}\"", original));
        let parsed: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        assert!(serde_json::from_str::<SearchId>("\"has space\"").is_err());
    }
}
