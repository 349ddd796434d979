//! Link (0x06) and LinkInfo (0x02) messages.
//!
//! A group header carries one LinkInfo message with its child count and one
//! Link message per child, in child order.
//!
//! ```text
//! Link:     version(1) flags(1) name_len(2) name address(8)
//! LinkInfo: version(1) flags(1) child_count(8)
//! ```

use crate::cursor::{put_name, Cursor};
use crate::error::FormatError;

/// A hard link from a group to a child object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    /// Child name within the group.
    pub name: String,
    /// Address of the child's object header.
    pub address: u64,
}

impl LinkMessage {
    pub fn parse(data: &[u8]) -> Result<LinkMessage, FormatError> {
        let mut c = Cursor::new(data, 0);
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedMessageVersion {
                message: "link",
                version,
            });
        }
        let _flags = c.u8()?;
        let name = c.name()?;
        let address = c.u64()?;
        Ok(LinkMessage { name, address })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + self.name.len());
        buf.push(1);
        buf.push(0);
        put_name(&mut buf, &self.name);
        buf.extend_from_slice(&self.address.to_le_bytes());
        buf
    }
}

/// Marks an object header as a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    /// Number of Link messages that follow.
    pub child_count: u64,
}

impl LinkInfo {
    pub fn parse(data: &[u8]) -> Result<LinkInfo, FormatError> {
        let mut c = Cursor::new(data, 0);
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedMessageVersion {
                message: "link info",
                version,
            });
        }
        let _flags = c.u8()?;
        let child_count = c.u64()?;
        Ok(LinkInfo { child_count })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(10);
        buf.push(1);
        buf.push(0);
        buf.extend_from_slice(&self.child_count.to_le_bytes());
        buf
    }
}
