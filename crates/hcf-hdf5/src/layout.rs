//! Data layout message (0x0008), versions 1 to 4.

use crate::cursor::{Cursor, Sizes};
use crate::error::Hdf5Error;

/// Layout v4 flag: partial edge chunks are stored unfiltered.
pub const DONT_FILTER_PARTIAL_EDGES: u8 = 0x01;
/// Layout v4 single-chunk flag: the chunk is filtered.
const SINGLE_FILTERED: u8 = 0x02;

/// How a chunked dataset finds its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkIndex {
    BTreeV1,
    /// The only chunk; `filtered` holds its stored size and filter mask.
    Single { filtered: Option<(u64, u32)> },
    /// Unfiltered chunks at consecutive addresses.
    Implicit,
    FixedArray,
    ExtensibleArray,
    BTreeV2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Compact(Vec<u8>),
    Contiguous {
        address: u64,
        size: u64,
    },
    Chunked {
        /// Chunk extent per dataset dimension.
        dims: Vec<u64>,
        element_size: u32,
        index: ChunkIndex,
        /// Address of the index structure, or of the data itself for the
        /// single and implicit indexes.
        address: u64,
        flags: u8,
    },
}

impl Layout {
    pub fn parse(body: &[u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        let version = c.u8()?;
        match version {
            1 | 2 => Self::parse_v1(&mut c),
            3 | 4 => {
                let class = c.u8()?;
                match class {
                    0 => {
                        let size = c.u16()? as usize;
                        Ok(Layout::Compact(c.bytes(size)?.to_vec()))
                    }
                    1 => Ok(Layout::Contiguous {
                        address: c.address()?,
                        size: c.length()?,
                    }),
                    2 if version == 3 => {
                        let rank = c.u8()? as usize;
                        let address = c.address()?;
                        let dims = (0..rank)
                            .map(|_| c.u32().map(u64::from))
                            .collect::<Result<Vec<_>, _>>()?;
                        chunked(dims, ChunkIndex::BTreeV1, address, 0)
                    }
                    2 => Self::parse_v4_chunked(&mut c),
                    3 => Err(Hdf5Error::unsupported("virtual dataset")),
                    other => Err(Hdf5Error::corrupt(format!("layout class {other}"))),
                }
            }
            v => Err(Hdf5Error::UnsupportedVersion {
                what: "data layout",
                version: v,
            }),
        }
    }

    fn parse_v1(c: &mut Cursor<'_>) -> Result<Self, Hdf5Error> {
        let rank = c.u8()? as usize;
        let class = c.u8()?;
        c.skip(5)?;
        let address = if class == 0 { None } else { Some(c.address()?) };
        let dims = (0..rank)
            .map(|_| c.u32().map(u64::from))
            .collect::<Result<Vec<_>, _>>()?;
        match (class, address) {
            (0, _) => {
                let size = c.u32()? as usize;
                Ok(Layout::Compact(c.bytes(size)?.to_vec()))
            }
            (1, Some(address)) => {
                let size = dims
                    .iter()
                    .try_fold(1u64, |acc, &d| acc.checked_mul(d))
                    .ok_or_else(|| Hdf5Error::corrupt("contiguous size overflows"))?;
                Ok(Layout::Contiguous { address, size })
            }
            (2, Some(address)) => chunked(dims, ChunkIndex::BTreeV1, address, 0),
            (other, _) => Err(Hdf5Error::corrupt(format!("layout class {other}"))),
        }
    }

    fn parse_v4_chunked(c: &mut Cursor<'_>) -> Result<Self, Hdf5Error> {
        let flags = c.u8()?;
        let rank = c.u8()? as usize;
        let width = c.u8()? as usize;
        let dims = (0..rank)
            .map(|_| c.uint(width))
            .collect::<Result<Vec<_>, _>>()?;
        let index = match c.u8()? {
            1 => {
                let filtered = if flags & SINGLE_FILTERED != 0 {
                    Some((c.length()?, c.u32()?))
                } else {
                    None
                };
                ChunkIndex::Single { filtered }
            }
            2 => ChunkIndex::Implicit,
            3 => {
                c.skip(1)?;
                ChunkIndex::FixedArray
            }
            4 => {
                c.skip(5)?;
                ChunkIndex::ExtensibleArray
            }
            5 => {
                c.skip(6)?;
                ChunkIndex::BTreeV2
            }
            other => return Err(Hdf5Error::corrupt(format!("chunk index type {other}"))),
        };
        let address = c.address()?;
        chunked(dims, index, address, flags)
    }

    /// Version 3 contiguous layout. Zero-sized data has no address.
    pub fn encode_contiguous(address: u64, size: u64) -> Vec<u8> {
        let mut out = vec![3, 1];
        out.extend_from_slice(&address.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out
    }

    /// Version 4 chunked layout with 8-byte dimension fields, indexed by
    /// a single chunk or a fixed array.
    pub fn encode_chunked(
        chunk_dims: &[u64],
        element_size: u32,
        index: ChunkIndex,
        address: u64,
    ) -> Result<Vec<u8>, Hdf5Error> {
        let mut flags = 0u8;
        if let ChunkIndex::Single { filtered: Some(_) } = index {
            flags |= SINGLE_FILTERED;
        }
        let mut out = vec![4, 2, flags, (chunk_dims.len() + 1) as u8, 8];
        for d in chunk_dims {
            out.extend_from_slice(&d.to_le_bytes());
        }
        out.extend_from_slice(&u64::from(element_size).to_le_bytes());
        match index {
            ChunkIndex::Single { filtered } => {
                out.push(1);
                if let Some((size, mask)) = filtered {
                    out.extend_from_slice(&size.to_le_bytes());
                    out.extend_from_slice(&mask.to_le_bytes());
                }
            }
            ChunkIndex::FixedArray => {
                out.push(3);
                out.push(crate::fixed_array::PAGE_BITS);
            }
            other => {
                return Err(Hdf5Error::unsupported(format!("writing a {other:?} chunk index")))
            }
        }
        out.extend_from_slice(&address.to_le_bytes());
        Ok(out)
    }
}

/// Split off the trailing element-size dimension.
fn chunked(mut dims: Vec<u64>, index: ChunkIndex, address: u64, flags: u8) -> Result<Layout, Hdf5Error> {
    let element_size = dims
        .pop()
        .ok_or_else(|| Hdf5Error::corrupt("chunked layout without dimensions"))?;
    if dims.is_empty() || dims.contains(&0) {
        return Err(Hdf5Error::corrupt(format!("chunk dimensions {dims:?}")));
    }
    let element_size = u32::try_from(element_size)
        .map_err(|_| Hdf5Error::corrupt(format!("chunk element size {element_size}")))?;
    Ok(Layout::Chunked {
        dims,
        element_size,
        index,
        address,
        flags,
    })
}
