//! Dataspace message (type 0x01).
//!
//! ```text
//! version(1) rank(1) flags(1) reserved(1) dims(8 * rank)
//! ```
//!
//! Rank 0 is a scalar holding exactly one element.

use crate::cursor::Cursor;
use crate::error::FormatError;

/// Largest rank a dataspace may declare.
pub const MAX_RANK: u8 = 32;

/// Parsed dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    /// Current dimension sizes; empty for a scalar.
    pub dimensions: Vec<u64>,
}

impl Dataspace {
    /// A rank-0 dataspace.
    pub fn scalar() -> Self {
        Self { dimensions: Vec::new() }
    }

    /// A dataspace with the given extents.
    pub fn simple(dimensions: &[u64]) -> Self {
        Self { dimensions: dimensions.to_vec() }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Total element count, `None` on overflow.
    pub fn num_elements(&self) -> Option<u64> {
        self.dimensions
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
    }

    /// Parse a dataspace message from raw message bytes.
    pub fn parse(data: &[u8]) -> Result<Dataspace, FormatError> {
        let mut c = Cursor::new(data, 0);
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedMessageVersion {
                message: "dataspace",
                version,
            });
        }
        let rank = c.u8()?;
        if rank > MAX_RANK {
            return Err(FormatError::InvalidData(format!("rank {rank} exceeds {MAX_RANK}")));
        }
        let _flags = c.u8()?;
        let _reserved = c.u8()?;
        let mut dimensions = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            dimensions.push(c.u64()?);
        }
        Ok(Dataspace { dimensions })
    }

    /// Serialize to message bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 8 * self.dimensions.len());
        buf.push(1);
        buf.push(self.dimensions.len() as u8);
        buf.push(0);
        buf.push(0);
        for d in &self.dimensions {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        buf
    }
}
