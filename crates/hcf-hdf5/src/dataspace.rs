//! Dataspace message (0x0001).

use crate::cursor::{Cursor, Sizes};
use crate::error::Hdf5Error;
use crate::UNDEF_ADDR;

/// Shape of a dataset or attribute. An empty `dims` is a scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub dims: Vec<u64>,
    /// `None` when equal to `dims`. Unlimited entries are [`UNDEF_ADDR`].
    pub max_dims: Option<Vec<u64>>,
}

impl Dataspace {
    pub fn simple(dims: &[u64]) -> Self {
        Dataspace {
            dims: dims.to_vec(),
            max_dims: None,
        }
    }

    pub fn element_count(&self) -> Option<u64> {
        self.dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
    }

    /// Maximum extent, `dims` when none is stored.
    pub fn max_extent(&self) -> &[u64] {
        self.max_dims.as_deref().unwrap_or(&self.dims)
    }

    /// First unlimited dimension.
    pub fn unlimited_dim(&self) -> Option<usize> {
        self.max_dims
            .as_ref()
            .and_then(|m| m.iter().position(|&d| d == UNDEF_ADDR))
    }

    pub fn parse(body: &[u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        let version = c.u8()?;
        let rank = c.u8()? as usize;
        let flags = c.u8()?;
        match version {
            1 => {
                c.skip(5)?;
            }
            2 => match c.u8()? {
                0 | 1 => {}
                2 => return Err(Hdf5Error::unsupported("null dataspace")),
                other => return Err(Hdf5Error::corrupt(format!("dataspace type {other}"))),
            },
            v => {
                return Err(Hdf5Error::UnsupportedVersion {
                    what: "dataspace",
                    version: v,
                })
            }
        }
        if rank > 32 {
            return Err(Hdf5Error::corrupt(format!("dataspace rank {rank}")));
        }
        let dims = (0..rank).map(|_| c.length()).collect::<Result<Vec<_>, _>>()?;
        let max_dims = if flags & 1 != 0 {
            let max = (0..rank)
                .map(|_| {
                    c.length().map(|m| {
                        // Unlimited is all ones at the file's length width.
                        let width = sizes.length as u32 * 8;
                        if width < 64 && m == (1u64 << width) - 1 {
                            UNDEF_ADDR
                        } else {
                            m
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            (max != dims).then_some(max)
        } else {
            None
        };
        Ok(Dataspace { dims, max_dims })
    }

    /// Version 2 encoding with 8-byte lengths; max dims are not stored.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.dims.len() * 8);
        let kind = if self.dims.is_empty() { 0 } else { 1 };
        out.extend_from_slice(&[2, self.dims.len() as u8, 0, kind]);
        for d in &self.dims {
            out.extend_from_slice(&d.to_le_bytes());
        }
        out
    }
}
