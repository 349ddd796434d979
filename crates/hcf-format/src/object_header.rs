//! Object header parsing.
//!
//! ```text
//! "OHDR" version(1) flags(1) message_bytes(4)
//! { type(1) flags(1) size(4) data(size) }*
//! crc32c(4)
//! ```

use crate::cursor::{ensure_len, Cursor};
use crate::error::FormatError;
use crate::message_type::MessageType;

/// OHDR signature for object headers.
pub const OHDR_SIGNATURE: [u8; 4] = [b'O', b'H', b'D', b'R'];

/// Current object header version.
pub const OHDR_VERSION: u8 = 1;

/// Message flag: the reader must understand this message type.
pub const MSG_FLAG_MUST_UNDERSTAND: u8 = 0x08;

/// A single parsed header message.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMessage {
    /// The message type.
    pub msg_type: MessageType,
    /// Message flags byte.
    pub flags: u8,
    /// Raw message data bytes.
    pub data: Vec<u8>,
}

/// Parsed object header.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHeader {
    /// Address the header was parsed from.
    pub address: u64,
    /// Header version.
    pub version: u8,
    /// Header flags.
    pub flags: u8,
    /// All non-NIL messages, in stored order.
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    /// Parse an object header at `address` in `data`.
    pub fn parse(data: &[u8], address: u64) -> Result<ObjectHeader, FormatError> {
        let offset = usize::try_from(address).map_err(|_| FormatError::UnexpectedEof {
            expected: usize::MAX,
            available: data.len(),
        })?;
        ensure_len(data, offset, 10)?;
        if data[offset..offset + 4] != OHDR_SIGNATURE {
            return Err(FormatError::InvalidObjectHeaderSignature(address));
        }

        let mut c = Cursor::new(data, offset + 4);
        let version = c.u8()?;
        if version != OHDR_VERSION {
            return Err(FormatError::InvalidObjectHeaderVersion(version));
        }
        let flags = c.u8()?;
        let message_bytes = c.u32()? as usize;
        let msg_start = c.position();
        ensure_len(data, msg_start, message_bytes + 4)?;
        let msg_end = msg_start + message_bytes;

        let stored = {
            let mut tail = Cursor::new(data, msg_end);
            tail.u32()?
        };
        let computed = crc32c::crc32c(&data[offset..msg_end]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                expected: stored,
                computed,
            });
        }

        let block = &data[..msg_end];
        let mut c = Cursor::new(block, msg_start);
        let mut messages = Vec::new();
        while c.remaining() > 0 {
            let msg_type = MessageType::from_u8(c.u8()?);
            let msg_flags = c.u8()?;
            let size = c.u32()? as usize;
            let body = c.bytes(size)?;

            match msg_type {
                MessageType::Nil => continue,
                MessageType::Unknown(id) => {
                    if msg_flags & MSG_FLAG_MUST_UNDERSTAND != 0 {
                        return Err(FormatError::UnsupportedMessage(id));
                    }
                    continue;
                }
                _ => {}
            }

            messages.push(HeaderMessage {
                msg_type,
                flags: msg_flags,
                data: body.to_vec(),
            });
        }

        Ok(ObjectHeader {
            address,
            version,
            flags,
            messages,
        })
    }

    /// First message of the given type.
    pub fn find(&self, msg_type: MessageType) -> Option<&HeaderMessage> {
        self.messages.iter().find(|m| m.msg_type == msg_type)
    }

    /// All messages of the given type, in stored order.
    pub fn find_all(&self, msg_type: MessageType) -> impl Iterator<Item = &HeaderMessage> {
        self.messages.iter().filter(move |m| m.msg_type == msg_type)
    }

    /// Whether a message of the given type is present.
    pub fn has(&self, msg_type: MessageType) -> bool {
        self.find(msg_type).is_some()
    }

    /// Data of the first message of the given type, or `MissingMessage`.
    pub fn require(&self, msg_type: MessageType, name: &'static str) -> Result<&[u8], FormatError> {
        self.find(msg_type)
            .map(|m| m.data.as_slice())
            .ok_or(FormatError::MissingMessage(name))
    }
}
