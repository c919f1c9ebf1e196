//! Structural validation of message bodies.
//!
//! Walks every variable-length field of a body and fails as soon as a
//! declared length would run past the end, a C-string lacks its NUL, or
//! bytes are left over. Runs before any field is interpreted.

use super::message::GroupKind;
use super::wire::Reader;
use super::{CodecError, MsgType, Result};
use crate::node_id::ID_SLOT_LEN;

pub fn validate_message(msg_type: MsgType, body: &[u8]) -> Result<()> {
    let mut r = Reader::new(body);
    match msg_type {
        MsgType::Ping => {}
        MsgType::Info => {
            r.take(2 + 4)?;
            skip_cstr(&mut r)?;
            skip_opt_cstr(&mut r)?;
            loop {
                let tag = r.u8()?;
                if tag == 0 {
                    break;
                }
                skip_cstr(&mut r)?;
                match GroupKind::from_u8(tag)? {
                    GroupKind::PublicManaged => {}
                    GroupKind::PrivateManaged => skip_cstr(&mut r)?,
                    GroupKind::PublicPeer => skip_blob(&mut r)?,
                    GroupKind::PrivatePeer => {
                        skip_cstr(&mut r)?;
                        skip_cstr(&mut r)?;
                        r.take(2)?;
                        skip_blob(&mut r)?;
                    }
                }
            }
        }
        MsgType::GroupData => {
            r.take(2)?;
            skip_cstr(&mut r)?;
            r.take(2)?;
            skip_blob(&mut r)?;
        }
        MsgType::PeerSearch | MsgType::PeerSearchPpg => {
            r.take(ID_SLOT_LEN)?;
            let nic_count = r.u8()? as usize;
            r.take(nic_count * 8)?;
            r.take(4 + ID_SLOT_LEN)?;
            skip_opt_cstr(&mut r)?;
            skip_cstr(&mut r)?;
            if msg_type == MsgType::PeerSearchPpg {
                skip_cstr(&mut r)?;
                r.take(2)?;
            }
            skip_blob(&mut r)?;
        }
        MsgType::PeerSearchReply => {
            r.take(ID_SLOT_LEN)?;
            skip_blob(&mut r)?;
        }
    }
    r.finish()
}

fn skip_cstr(r: &mut Reader<'_>) -> Result<()> {
    let len = r.u16()? as usize;
    r.take(len)?;
    expect_nul(r)
}

fn skip_opt_cstr(r: &mut Reader<'_>) -> Result<()> {
    let len = r.u16()? as usize;
    if len > 0 {
        r.take(len)?;
        expect_nul(r)?;
    }
    Ok(())
}

fn expect_nul(r: &mut Reader<'_>) -> Result<()> {
    let at = r.position();
    match r.u8()? {
        0 => Ok(()),
        _ => Err(CodecError::MissingTerminator(at)),
    }
}

fn skip_blob(r: &mut Reader<'_>) -> Result<()> {
    let len = r.u16()? as usize;
    r.take(len)?;
    Ok(())
}
