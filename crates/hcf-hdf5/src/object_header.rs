//! Object headers, versions 1 and 2, with continuation blocks.

use std::collections::HashSet;

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::{lookup3, verify};
use crate::cursor::{bytes_for, slice, Cursor, Sizes};
use crate::error::Hdf5Error;
use crate::messages::{MSG_CONTINUATION, MSG_NIL};

/// Upper bound on continuation blocks followed for one header.
const MAX_CONTINUATIONS: usize = 4096;

/// Message flag: the body lives in another object or the shared heap.
pub const FLAG_SHARED: u8 = 0x02;
/// Message flag: readers that do not know the type must fail.
pub const FLAG_FAIL_IF_UNKNOWN: u8 = 0x80;

/// One header message, borrowing its body from the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderMessage<'a> {
    pub kind: u16,
    pub flags: u8,
    pub body: &'a [u8],
}

/// All messages of one object, in stored order, continuations followed.
#[derive(Debug, Clone)]
pub struct ObjectHeader<'a> {
    pub address: u64,
    pub version: u8,
    pub messages: Vec<HeaderMessage<'a>>,
}

impl<'a> ObjectHeader<'a> {
    /// Parse the header at file position `pos`. `base` is added to the
    /// continuation addresses stored inside it.
    pub fn parse(data: &'a [u8], pos: usize, base: u64, sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut blocks = Blocks {
            data,
            base,
            sizes,
            messages: Vec::new(),
            pending: Vec::new(),
        };
        let version;

        if slice(data, pos, 4)? == b"OHDR" {
            version = 2;
            let mut c = Cursor::new(data, pos + 4, sizes);
            let v = c.u8()?;
            if v != 2 {
                return Err(Hdf5Error::UnsupportedVersion {
                    what: "object header",
                    version: v,
                });
            }
            let flags = c.u8()?;
            if flags & 0x20 != 0 {
                c.skip(16)?;
            }
            if flags & 0x10 != 0 {
                c.skip(4)?;
            }
            let chunk_len = c.uint(1 << (flags & 0x03))? as usize;
            let start = c.position();
            let end = start
                .checked_add(chunk_len)
                .ok_or_else(|| Hdf5Error::corrupt("object header size overflows"))?;
            verify(data, pos, end - pos, "object header")?;
            let creation_order = flags & 0x04 != 0;
            blocks.read_v2(start, end, creation_order)?;

            let mut seen = HashSet::new();
            while let Some((at, len)) = blocks.pending.pop() {
                if !seen.insert(at) || seen.len() > MAX_CONTINUATIONS {
                    return Err(Hdf5Error::corrupt("object header continuation loop"));
                }
                if len < 8 {
                    return Err(Hdf5Error::corrupt("continuation block too short"));
                }
                Cursor::new(data, at, sizes).magic(b"OCHK", "continuation block")?;
                verify(data, at, len - 4, "continuation block")?;
                blocks.read_v2(at + 4, at + len - 4, creation_order)?;
            }
        } else {
            let mut c = Cursor::new(data, pos, sizes);
            version = c.u8()?;
            if version != 1 {
                return Err(Hdf5Error::UnsupportedVersion {
                    what: "object header",
                    version,
                });
            }
            c.skip(1)?;
            let _count = c.u16()?;
            let _refs = c.u32()?;
            let chunk_len = c.u32()? as usize;
            // The message area starts 8-byte aligned after the 12-byte prefix.
            let start = pos + 16;
            let end = start
                .checked_add(chunk_len)
                .ok_or_else(|| Hdf5Error::corrupt("object header size overflows"))?;
            blocks.read_v1(start, end)?;

            let mut seen = HashSet::new();
            while let Some((at, len)) = blocks.pending.pop() {
                if !seen.insert(at) || seen.len() > MAX_CONTINUATIONS {
                    return Err(Hdf5Error::corrupt("object header continuation loop"));
                }
                let end = at
                    .checked_add(len)
                    .ok_or_else(|| Hdf5Error::corrupt("continuation block overflows"))?;
                blocks.read_v1(at, end)?;
            }
        }
        Ok(ObjectHeader {
            address: pos as u64,
            version,
            messages: blocks.messages,
        })
    }

    /// First message of `kind`.
    pub fn find(&self, kind: u16) -> Option<&HeaderMessage<'a>> {
        self.messages.iter().find(|m| m.kind == kind)
    }

    /// Every message of `kind`, in order.
    pub fn all(&self, kind: u16) -> impl Iterator<Item = &HeaderMessage<'a>> + '_ {
        self.messages.iter().filter(move |m| m.kind == kind)
    }

    pub fn has(&self, kind: u16) -> bool {
        self.find(kind).is_some()
    }
}

/// Messages gathered so far and continuation blocks still to read.
struct Blocks<'a> {
    data: &'a [u8],
    base: u64,
    sizes: Sizes,
    messages: Vec<HeaderMessage<'a>>,
    pending: Vec<(usize, usize)>,
}

impl<'a> Blocks<'a> {
    fn read_v1(&mut self, start: usize, end: usize) -> Result<(), Hdf5Error> {
        slice(self.data, start, end.saturating_sub(start))?;
        let mut c = Cursor::new(self.data, start, self.sizes);
        while c.position() + 8 <= end {
            let kind = c.u16()?;
            let size = c.u16()? as usize;
            let flags = c.u8()?;
            c.skip(3)?;
            if c.position() + size > end {
                return Err(Hdf5Error::corrupt("header message runs past its block"));
            }
            let body = c.bytes(size)?;
            self.push(kind, flags, body)?;
        }
        Ok(())
    }

    fn read_v2(&mut self, start: usize, end: usize, creation_order: bool) -> Result<(), Hdf5Error> {
        let header_len = if creation_order { 6 } else { 4 };
        let mut c = Cursor::new(self.data, start, self.sizes);
        // Fewer bytes than a message header at the end of a block are a gap.
        while c.position() + header_len <= end {
            let kind = u16::from(c.u8()?);
            let size = c.u16()? as usize;
            let flags = c.u8()?;
            if creation_order {
                c.skip(2)?;
            }
            if c.position() + size > end {
                return Err(Hdf5Error::corrupt("header message runs past its block"));
            }
            let body = c.bytes(size)?;
            self.push(kind, flags, body)?;
        }
        Ok(())
    }

    fn push(&mut self, kind: u16, flags: u8, body: &'a [u8]) -> Result<(), Hdf5Error> {
        match kind {
            MSG_NIL => {}
            MSG_CONTINUATION => {
                let mut c = Cursor::new(body, 0, self.sizes);
                let addr = c.address()?;
                let len = c.length()?;
                let at = addr
                    .checked_add(self.base)
                    .and_then(|a| usize::try_from(a).ok())
                    .ok_or_else(|| Hdf5Error::corrupt("continuation address out of range"))?;
                let len = usize::try_from(len)
                    .map_err(|_| Hdf5Error::corrupt("continuation length out of range"))?;
                self.pending.push((at, len));
            }
            _ => self.messages.push(HeaderMessage { kind, flags, body }),
        }
        Ok(())
    }
}

/// Encode a version 2 object header: no timestamps, no creation order.
pub fn encode_v2(messages: &[(u8, Vec<u8>)]) -> Result<Vec<u8>, Hdf5Error> {
    let mut body = Vec::new();
    for (kind, payload) in messages {
        let size = u16::try_from(payload.len()).map_err(|_| {
            Hdf5Error::TooLarge(format!(
                "header message of type {kind:#04x} is {} bytes",
                payload.len()
            ))
        })?;
        body.push(*kind);
        body.extend_from_slice(&size.to_le_bytes());
        body.push(0);
        body.extend_from_slice(payload);
    }
    let width = match bytes_for(body.len() as u64) {
        1 => 0u8,
        2 => 1,
        3 | 4 => 2,
        _ => 3,
    };
    let mut out = Vec::with_capacity(body.len() + 16);
    out.extend_from_slice(b"OHDR");
    out.push(2);
    out.push(width);
    let len = body.len() as u64;
    out.extend_from_slice(&len.to_le_bytes()[..1 << width]);
    out.extend_from_slice(&body);
    let sum = lookup3(&out);
    let mut tail = [0u8; 4];
    LittleEndian::write_u32(&mut tail, sum);
    out.extend_from_slice(&tail);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MSG_ATTRIBUTE, MSG_DATASPACE};

    #[test]
    fn v2_roundtrip() {
        let encoded = encode_v2(&[(1, vec![2, 0, 0, 0]), (0x0c, vec![7; 300])]).unwrap();
        assert_eq!(&encoded[..4], b"OHDR");
        assert_eq!(encoded[5], 1, "two-byte chunk size");
        let oh = ObjectHeader::parse(&encoded, 0, 0, Sizes::WIDE).unwrap();
        assert_eq!(oh.version, 2);
        assert_eq!(oh.messages.len(), 2);
        assert_eq!(oh.find(MSG_DATASPACE).unwrap().body, &[2, 0, 0, 0]);
        assert_eq!(oh.all(MSG_ATTRIBUTE).count(), 1);
    }

    #[test]
    fn v2_checksum_is_checked() {
        let mut encoded = encode_v2(&[(1, vec![2, 0, 0, 0])]).unwrap();
        encoded[9] ^= 0xff;
        assert!(matches!(
            ObjectHeader::parse(&encoded, 0, 0, Sizes::WIDE),
            Err(Hdf5Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn oversized_message_is_refused() {
        let err = encode_v2(&[(0x0c, vec![0; 70_000])]).unwrap_err();
        assert!(matches!(err, Hdf5Error::TooLarge(_)));
    }

    fn v1_message(kind: u16, body: &[u8]) -> Vec<u8> {
        let mut m = kind.to_le_bytes().to_vec();
        m.extend_from_slice(&(body.len() as u16).to_le_bytes());
        m.extend_from_slice(&[0, 0, 0, 0]);
        m.extend_from_slice(body);
        m
    }

    #[test]
    fn v1_with_continuation() {
        // Header at 0 with a dataspace message and a continuation to 64.
        let mut cont = 64u64.to_le_bytes().to_vec();
        cont.extend_from_slice(&16u64.to_le_bytes());
        let mut msgs = v1_message(MSG_DATASPACE, &[1, 0, 0, 0, 0, 0, 0, 0]);
        msgs.extend(v1_message(MSG_CONTINUATION, &cont));

        let mut data = vec![1, 0];
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(msgs.len() as u32).to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend(msgs);
        data.resize(64, 0);
        data.extend(v1_message(MSG_ATTRIBUTE, &[9; 8]));

        let oh = ObjectHeader::parse(&data, 0, 0, Sizes::WIDE).unwrap();
        assert_eq!(oh.version, 1);
        let kinds: Vec<u16> = oh.messages.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MSG_DATASPACE, MSG_ATTRIBUTE]);
    }

    #[test]
    fn continuation_loop_is_an_error() {
        // The only message continues into the message area it sits in.
        let mut cont = 16u64.to_le_bytes().to_vec();
        cont.extend_from_slice(&24u64.to_le_bytes());
        let msgs = v1_message(MSG_CONTINUATION, &cont);
        let mut data = vec![1, 0];
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(msgs.len() as u32).to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend(msgs);
        let err = ObjectHeader::parse(&data, 0, 0, Sizes::WIDE).unwrap_err();
        assert!(matches!(err, Hdf5Error::Corrupt(ref m) if m.contains("loop")));
    }
}
