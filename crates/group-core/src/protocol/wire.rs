//! Cursor-style primitives shared by the packet and message codecs.

use super::packet::Nic;
use super::{CodecError, Result};
use crate::node_id::{ID_SLOT_LEN, NodeId, SearchId};
use std::net::Ipv4Addr;

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Everything not read yet.
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Fixed 64-byte identifier slot, NUL-padded.
    pub(crate) fn id_slot(&mut self) -> Result<String> {
        let start = self.pos;
        let slot = self.take(ID_SLOT_LEN)?;
        let end = slot.iter().position(|&b| b == 0).unwrap_or(ID_SLOT_LEN);
        std::str::from_utf8(&slot[..end])
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8(start))
    }

    pub(crate) fn node_id(&mut self) -> Result<NodeId> {
        let start = self.pos;
        self.id_slot()?
            .parse()
            .map_err(|_| CodecError::InvalidIdentifier(start))
    }

    pub(crate) fn search_id(&mut self) -> Result<SearchId> {
        let start = self.pos;
        self.id_slot()?
            .parse()
            .map_err(|_| CodecError::InvalidIdentifier(start))
    }

    /// `len:u16 | bytes[len] | NUL`.
    pub(crate) fn cstr(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        self.cstr_body(len)
    }

    /// Like [`cstr`](Self::cstr) but `len == 0` means absent and carries no NUL.
    pub(crate) fn opt_cstr(&mut self) -> Result<Option<String>> {
        let len = self.u16()? as usize;
        if len == 0 {
            return Ok(None);
        }
        self.cstr_body(len).map(Some)
    }

    fn cstr_body(&mut self, len: usize) -> Result<String> {
        let start = self.pos;
        let bytes = self.take(len)?;
        let nul_at = self.pos;
        if self.u8()? != 0 {
            return Err(CodecError::MissingTerminator(nul_at));
        }
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8(start))
    }

    /// `len:u16 | bytes[len]`.
    pub(crate) fn blob(&mut self) -> Result<Vec<u8>> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// `count:u8 | count × (ip[4] | mask[4])`.
    pub(crate) fn nics(&mut self) -> Result<Vec<Nic>> {
        let count = self.u8()? as usize;
        let mut nics = Vec::with_capacity(count);
        for _ in 0..count {
            let b = self.take(8)?;
            nics.push(Nic {
                ip: Ipv4Addr::new(b[0], b[1], b[2], b[3]),
                netmask: Ipv4Addr::new(b[4], b[5], b[6], b[7]),
            });
        }
        Ok(nics)
    }

    pub(crate) fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

#[derive(Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub(crate) fn id_slot(&mut self, field: &'static str, id: &str) -> Result<()> {
        let bytes = id.as_bytes();
        if bytes.len() > ID_SLOT_LEN {
            return Err(CodecError::FieldTooLong {
                field,
                len: bytes.len(),
                max: ID_SLOT_LEN,
            });
        }
        self.buf.extend_from_slice(bytes);
        self.buf
            .resize(self.buf.len() + ID_SLOT_LEN - bytes.len(), 0);
        Ok(())
    }

    pub(crate) fn cstr(&mut self, field: &'static str, s: &str) -> Result<()> {
        let len = checked_len(field, s.len())?;
        self.u16(len);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    pub(crate) fn opt_cstr(&mut self, field: &'static str, s: Option<&str>) -> Result<()> {
        match s {
            Some(s) if !s.is_empty() => self.cstr(field, s),
            _ => {
                self.u16(0);
                Ok(())
            }
        }
    }

    pub(crate) fn blob(&mut self, field: &'static str, data: &[u8]) -> Result<()> {
        let len = checked_len(field, data.len())?;
        self.u16(len);
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub(crate) fn nics(&mut self, nics: &[Nic]) -> Result<()> {
        if nics.len() > u8::MAX as usize {
            return Err(CodecError::FieldTooLong {
                field: "nics",
                len: nics.len(),
                max: u8::MAX as usize,
            });
        }
        self.u8(nics.len() as u8);
        for nic in nics {
            self.buf.extend_from_slice(&nic.ip.octets());
            self.buf.extend_from_slice(&nic.netmask.octets());
        }
        Ok(())
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) fn checked_len(field: &'static str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| CodecError::FieldTooLong {
        field,
        len,
        max: u16::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cstr_layout() {
        let mut w = Writer::new();
        w.cstr("name", "ab").unwrap();
        assert_eq!(w.into_inner(), vec![0, 2, b'a', b'b', 0]);
    }

    #[test]
    fn test_empty_cstr_keeps_terminator() {
        let mut w = Writer::new();
        w.cstr("name", "").unwrap();
        let buf = w.into_inner();
        assert_eq!(buf, vec![0, 0, 0]);
        assert_eq!(Reader::new(&buf).cstr().unwrap(), "");
    }

    #[test]
    fn test_absent_opt_cstr_has_no_terminator() {
        let mut w = Writer::new();
        w.opt_cstr("key", None).unwrap();
        let buf = w.into_inner();
        assert_eq!(buf, vec![0, 0]);
        let mut r = Reader::new(&buf);
        assert_eq!(r.opt_cstr().unwrap(), None);
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_cstr_missing_terminator() {
        let buf = [0, 1, b'x', b'y'];
        assert_eq!(
            Reader::new(&buf).cstr(),
            Err(CodecError::MissingTerminator(3))
        );
    }

    #[test]
    fn test_id_slot_padding() {
        let mut w = Writer::new();
        w.id_slot("sender", "node-1").unwrap();
        let buf = w.into_inner();
        assert_eq!(buf.len(), ID_SLOT_LEN);
        assert!(buf[6..].iter().all(|&b| b == 0));
        assert_eq!(Reader::new(&buf).id_slot().unwrap(), "node-1");
    }

    #[test]
    fn test_empty_id_slot_rejected_as_node_id() {
        let buf = [0u8; ID_SLOT_LEN];
        assert_eq!(
            Reader::new(&buf).node_id(),
            Err(CodecError::InvalidIdentifier(0))
        );
    }

    #[test]
    fn test_id_slot_too_long() {
        let mut w = Writer::new();
        let long = "z".repeat(ID_SLOT_LEN + 1);
        assert!(matches!(
            w.id_slot("sender", &long),
            Err(CodecError::FieldTooLong { field: "sender", .. })
        ));
    }

    #[test]
    fn test_take_past_end() {
        let mut r = Reader::new(&[1, 2]);
        assert_eq!(
            r.u32(),
            Err(CodecError::Truncated {
                offset: 0,
                needed: 4
            })
        );
    }

    #[test]
    fn test_signed_ttl_roundtrip() {
        let mut w = Writer::new();
        w.i32(-1);
        let buf = w.into_inner();
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(Reader::new(&buf).i32().unwrap(), -1);
    }

    #[test]
    fn test_trailing_bytes() {
        let mut r = Reader::new(&[7, 8, 9]);
        r.u8().unwrap();
        assert_eq!(r.finish(), Err(CodecError::TrailingBytes(2)));
    }
}
