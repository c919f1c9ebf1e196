use super::{ChannelError, Result};
use crate::node_id::NodeId;
use crate::protocol::GroupKind;
use std::io::{Cursor, Read, Write};

const MAX_LINE_LEN: usize = 4096;
const MAX_BLOCK_LEN: usize = 64 * 1024;

pub(crate) const ENCRYPTED_BLOCK: &str = "EncryptedBlock";
pub(crate) const UNENCRYPTED_BLOCK: &str = "UnencryptedBlock";
pub(crate) const OK: &str = "OK";
pub(crate) const ERROR_PREFIX: &str = "ERROR ";
pub(crate) const GOODBYE: &str = "GoodBye";

const PUBLIC_MANAGED: &str = "PublicManagedGroup";
const PRIVATE_MANAGED: &str = "PrivateManagedGroup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// `PublicManaged` or `PrivateManaged`.
    pub kind: GroupKind,
    pub node_id: NodeId,
    pub group: String,
    pub join_data: Option<Vec<u8>>,
    pub public_key: Option<String>,
    /// Group nonce recovered with the password, private groups only.
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRequest {
    pub node_id: NodeId,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    Join(JoinRequest),
    Leave(LeaveRequest),
}

/// Why a creator refused a request. Sent back as `ERROR <token>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoSuchGroup,
    UnknownPeer,
    BadNonce,
    NotMember,
    Malformed,
}

impl Rejection {
    pub fn token(self) -> &'static str {
        match self {
            Rejection::NoSuchGroup => "NoSuchGroup",
            Rejection::UnknownPeer => "UnknownPeer",
            Rejection::BadNonce => "BadNonce",
            Rejection::NotMember => "NotMember",
            Rejection::Malformed => "Malformed",
        }
    }
}

// ==================== Framing ====================

pub(crate) fn write_line<W: Write>(w: &mut W, line: &str) -> Result<()> {
    w.write_all(line.as_bytes())?;
    w.write_all(b"\n")?;
    Ok(())
}

/// Read one line byte by byte so nothing past the newline is consumed.
pub(crate) fn read_line<R: Read>(r: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if r.read(&mut byte)? == 0 {
            if bytes.is_empty() {
                return Err(ChannelError::Protocol("connection closed".into()));
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        bytes.push(byte[0]);
        if bytes.len() > MAX_LINE_LEN {
            return Err(ChannelError::Protocol("line too long".into()));
        }
    }
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(|_| ChannelError::Protocol("line is not UTF-8".into()))
}

pub(crate) fn write_block<W: Write>(w: &mut W, block: &[u8]) -> Result<()> {
    let len = u32::try_from(block.len())
        .map_err(|_| ChannelError::Protocol("block too large".into()))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(block)?;
    Ok(())
}

pub(crate) fn read_block<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_BLOCK_LEN {
        return Err(ChannelError::Protocol(format!("block of {len} bytes too large")));
    }
    let mut block = vec![0u8; len];
    r.read_exact(&mut block)?;
    Ok(block)
}

fn expect_line<R: Read>(r: &mut R, expected: &str) -> Result<()> {
    let line = read_line(r)?;
    if line != expected {
        return Err(ChannelError::Protocol(format!(
            "expected '{expected}', got '{line}'"
        )));
    }
    Ok(())
}

fn keyed_value<R: Read>(r: &mut R, key: &str) -> Result<String> {
    let line = read_line(r)?;
    line.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(' '))
        .map(str::to_string)
        .ok_or_else(|| ChannelError::Protocol(format!("expected '{key} <value>', got '{line}'")))
}

// ==================== Requests ====================

pub fn encode_request(request: &ChannelRequest) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match request {
        ChannelRequest::Join(join) => {
            let kind = match join.kind {
                GroupKind::PublicManaged => PUBLIC_MANAGED,
                GroupKind::PrivateManaged => PRIVATE_MANAGED,
                other => {
                    return Err(ChannelError::Protocol(format!(
                        "cannot join a {other:?} group"
                    )));
                }
            };
            write_line(&mut out, &format!("JOIN {kind}"))?;
            write_line(&mut out, &format!("UUID {}", join.node_id))?;
            write_line(&mut out, &format!("GroupName {}", join.group))?;
            write_line(&mut out, "JoinDataLength")?;
            let data = join.join_data.as_deref().unwrap_or_default();
            write_block(&mut out, &(data.len() as u32).to_be_bytes())?;
            if !data.is_empty() {
                write_line(&mut out, "JoinData")?;
                write_block(&mut out, data)?;
            }
            write_line(&mut out, "PublicKey")?;
            write_block(&mut out, join.public_key.as_deref().unwrap_or_default().as_bytes())?;
            if let Some(nonce) = &join.nonce {
                write_line(&mut out, &format!("Nonce {nonce}"))?;
            }
        }
        ChannelRequest::Leave(leave) => {
            write_line(&mut out, "LEAVE Group")?;
            write_line(&mut out, &format!("UUID {}", leave.node_id))?;
            write_line(&mut out, &format!("GroupName {}", leave.group))?;
        }
    }
    Ok(out)
}

pub fn parse_request(body: &[u8]) -> Result<ChannelRequest> {
    let mut r = Cursor::new(body);
    let command = read_line(&mut r)?;
    let request = match command.as_str() {
        "LEAVE Group" => ChannelRequest::Leave(LeaveRequest {
            node_id: parse_node_id(&keyed_value(&mut r, "UUID")?)?,
            group: keyed_value(&mut r, "GroupName")?,
        }),
        _ => {
            let kind = match command.strip_prefix("JOIN ") {
                Some(PUBLIC_MANAGED) => GroupKind::PublicManaged,
                Some(PRIVATE_MANAGED) => GroupKind::PrivateManaged,
                _ => {
                    return Err(ChannelError::Protocol(format!(
                        "unknown command '{command}'"
                    )));
                }
            };
            let node_id = parse_node_id(&keyed_value(&mut r, "UUID")?)?;
            let group = keyed_value(&mut r, "GroupName")?;

            expect_line(&mut r, "JoinDataLength")?;
            let len_block = read_block(&mut r)?;
            let len_bytes: [u8; 4] = len_block
                .as_slice()
                .try_into()
                .map_err(|_| ChannelError::Protocol("bad JoinDataLength block".into()))?;
            let join_data = match u32::from_be_bytes(len_bytes) {
                0 => None,
                len => {
                    expect_line(&mut r, "JoinData")?;
                    let data = read_block(&mut r)?;
                    if data.len() != len as usize {
                        return Err(ChannelError::Protocol("JoinData length mismatch".into()));
                    }
                    Some(data)
                }
            };

            expect_line(&mut r, "PublicKey")?;
            let key = read_block(&mut r)?;
            let public_key = if key.is_empty() {
                None
            } else {
                Some(
                    String::from_utf8(key)
                        .map_err(|_| ChannelError::Protocol("public key is not UTF-8".into()))?,
                )
            };

            let nonce = match kind {
                GroupKind::PrivateManaged => Some(keyed_value(&mut r, "Nonce")?),
                _ => None,
            };
            ChannelRequest::Join(JoinRequest {
                kind,
                node_id,
                group,
                join_data,
                public_key,
                nonce,
            })
        }
    };
    if (r.position() as usize) != body.len() {
        return Err(ChannelError::Protocol("trailing bytes after request".into()));
    }
    Ok(request)
}

fn parse_node_id(s: &str) -> Result<NodeId> {
    s.parse()
        .map_err(|e| ChannelError::Protocol(format!("bad UUID '{s}': {e}")))
}
