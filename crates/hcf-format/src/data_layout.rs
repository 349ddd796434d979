//! Data layout message (type 0x08) and the chunk index block.
//!
//! ```text
//! Contiguous: version(1) class=1 address(8) size(8)
//! Chunked:    version(1) class=2 rank(1) chunk_dims(8 * rank)
//!             index_address(8) chunk_count(8)
//! ```
//!
//! Chunks are row blocks along the first dimension, so each chunk covers a
//! contiguous range of elements in row-major order. The chunk index lists
//! them in element order:
//!
//! ```text
//! "HCIX" version(1) reserved(3) count(8)
//! { start_element(8) element_count(8) address(8) stored_size(8) raw_size(8) filter_mask(4) }*
//! crc32c(4)
//! ```

use crate::cursor::{ensure_len, Cursor};
use crate::error::FormatError;

pub const LAYOUT_CONTIGUOUS: u8 = 1;
pub const LAYOUT_CHUNKED: u8 = 2;

/// Chunk index signature.
pub const CHUNK_INDEX_SIGNATURE: [u8; 4] = [b'H', b'C', b'I', b'X'];

const CHUNK_ENTRY_SIZE: usize = 44;

/// Parsed data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Raw element bytes in one run.
    Contiguous { address: u64, size: u64 },
    /// Filtered chunks located through a chunk index.
    Chunked {
        /// Chunk extent per dimension.
        chunk_dims: Vec<u64>,
        /// Address of the chunk index block.
        index_address: u64,
        /// Number of chunks in the index.
        chunk_count: u64,
    },
}

impl DataLayout {
    pub fn parse(data: &[u8]) -> Result<DataLayout, FormatError> {
        let mut c = Cursor::new(data, 0);
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedMessageVersion {
                message: "data layout",
                version,
            });
        }
        match c.u8()? {
            LAYOUT_CONTIGUOUS => {
                let address = c.u64()?;
                let size = c.u64()?;
                Ok(DataLayout::Contiguous { address, size })
            }
            LAYOUT_CHUNKED => {
                let rank = c.u8()? as usize;
                let mut chunk_dims = Vec::with_capacity(rank);
                for _ in 0..rank {
                    chunk_dims.push(c.u64()?);
                }
                let index_address = c.u64()?;
                let chunk_count = c.u64()?;
                Ok(DataLayout::Chunked {
                    chunk_dims,
                    index_address,
                    chunk_count,
                })
            }
            other => Err(FormatError::UnsupportedLayout(other)),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(1);
        match self {
            DataLayout::Contiguous { address, size } => {
                buf.push(LAYOUT_CONTIGUOUS);
                buf.extend_from_slice(&address.to_le_bytes());
                buf.extend_from_slice(&size.to_le_bytes());
            }
            DataLayout::Chunked {
                chunk_dims,
                index_address,
                chunk_count,
            } => {
                buf.push(LAYOUT_CHUNKED);
                buf.push(chunk_dims.len() as u8);
                for d in chunk_dims {
                    buf.extend_from_slice(&d.to_le_bytes());
                }
                buf.extend_from_slice(&index_address.to_le_bytes());
                buf.extend_from_slice(&chunk_count.to_le_bytes());
            }
        }
        buf
    }
}

/// One entry in a chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Index of the first element (row-major) covered by the chunk.
    pub start_element: u64,
    /// Number of elements in the chunk.
    pub element_count: u64,
    /// File address of the stored bytes.
    pub address: u64,
    /// Stored (filtered) size in bytes.
    pub stored_size: u64,
    /// Unfiltered size in bytes.
    pub raw_size: u64,
    /// Bit `i` set means filter `i` was skipped for this chunk.
    pub filter_mask: u32,
}

/// Serialize a chunk index block.
pub fn serialize_chunk_index(entries: &[ChunkEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + entries.len() * CHUNK_ENTRY_SIZE + 4);
    buf.extend_from_slice(&CHUNK_INDEX_SIGNATURE);
    buf.push(1);
    buf.extend_from_slice(&[0, 0, 0]);
    buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for e in entries {
        buf.extend_from_slice(&e.start_element.to_le_bytes());
        buf.extend_from_slice(&e.element_count.to_le_bytes());
        buf.extend_from_slice(&e.address.to_le_bytes());
        buf.extend_from_slice(&e.stored_size.to_le_bytes());
        buf.extend_from_slice(&e.raw_size.to_le_bytes());
        buf.extend_from_slice(&e.filter_mask.to_le_bytes());
    }
    let checksum = crc32c::crc32c(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

/// Parse the chunk index block at `address`, expecting `expected_count` entries.
pub fn parse_chunk_index(
    data: &[u8],
    address: u64,
    expected_count: u64,
) -> Result<Vec<ChunkEntry>, FormatError> {
    let offset = address as usize;
    ensure_len(data, offset, 16)?;
    if data[offset..offset + 4] != CHUNK_INDEX_SIGNATURE {
        return Err(FormatError::CorruptChunkIndex(format!(
            "bad signature at {address:#x}"
        )));
    }
    let mut c = Cursor::new(data, offset + 4);
    let version = c.u8()?;
    if version != 1 {
        return Err(FormatError::UnsupportedMessageVersion {
            message: "chunk index",
            version,
        });
    }
    c.bytes(3)?;
    let count = c.u64()?;
    if count != expected_count {
        return Err(FormatError::CorruptChunkIndex(format!(
            "layout declares {expected_count} chunks, index holds {count}"
        )));
    }
    let body = usize::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(CHUNK_ENTRY_SIZE))
        .ok_or_else(|| FormatError::CorruptChunkIndex(format!("chunk count {count} too large")))?;
    ensure_len(data, c.position(), body + 4)?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(ChunkEntry {
            start_element: c.u64()?,
            element_count: c.u64()?,
            address: c.u64()?,
            stored_size: c.u64()?,
            raw_size: c.u64()?,
            filter_mask: c.u32()?,
        });
    }
    let checksum_pos = c.position();
    let stored = c.u32()?;
    let computed = crc32c::crc32c(&data[offset..checksum_pos]);
    if stored != computed {
        return Err(FormatError::ChecksumMismatch {
            expected: stored,
            computed,
        });
    }
    Ok(entries)
}
