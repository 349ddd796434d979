//! HCF superblock: the fixed 40-byte block at offset 0.
//!
//! ```text
//! signature(8) version(1) offset_size(1) length_size(1) flags(1)
//! root_address(8) eof_address(8) object_count(8) crc32c(4)
//! ```
//!
//! Writers emit a zeroed placeholder first and overwrite it on finalize, so a
//! file that was never finalized fails signature detection.

use byteorder::{ByteOrder, LittleEndian};

use crate::cursor::{ensure_len, Cursor};
use crate::error::FormatError;
use crate::signature::{check_signature, HCF_SIGNATURE};

/// Size of the serialized superblock in bytes.
pub const SUPERBLOCK_SIZE: usize = 40;

/// Current superblock version.
pub const SUPERBLOCK_VERSION: u8 = 1;

/// Parsed HCF superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Superblock version.
    pub version: u8,
    /// Size of file addresses in bytes (always 8).
    pub offset_size: u8,
    /// Size of lengths in bytes (always 8).
    pub length_size: u8,
    /// Reserved flag bits.
    pub flags: u8,
    /// Address of the root group's object header.
    pub root_group_address: u64,
    /// End-of-file address recorded by the writer.
    pub eof_address: u64,
    /// Number of objects (groups and datasets, root included).
    pub object_count: u64,
}

impl Superblock {
    /// Parse the superblock at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Superblock, FormatError> {
        ensure_len(data, 0, SUPERBLOCK_SIZE).map_err(|_| {
            if data.len() >= 8 && data[..8] == [0u8; 8] {
                FormatError::NotFinalized
            } else {
                FormatError::SignatureNotFound
            }
        })?;
        if data[..8] == [0u8; 8] {
            return Err(FormatError::NotFinalized);
        }
        check_signature(data)?;

        let mut c = Cursor::new(data, 8);
        let version = c.u8()?;
        if version != SUPERBLOCK_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let offset_size = c.u8()?;
        if offset_size != 8 {
            return Err(FormatError::InvalidOffsetSize(offset_size));
        }
        let length_size = c.u8()?;
        if length_size != 8 {
            return Err(FormatError::InvalidLengthSize(length_size));
        }
        let flags = c.u8()?;
        let root_group_address = c.u64()?;
        let eof_address = c.u64()?;
        let object_count = c.u64()?;

        let checksum_pos = c.position();
        let stored = c.u32()?;
        let computed = crc32c::crc32c(&data[..checksum_pos]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                expected: stored,
                computed,
            });
        }

        if eof_address > data.len() as u64 {
            return Err(FormatError::UnexpectedEof {
                expected: eof_address as usize,
                available: data.len(),
            });
        }

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            flags,
            root_group_address,
            eof_address,
            object_count,
        })
    }

    /// Build a superblock for a freshly written file.
    pub fn new(root_group_address: u64, eof_address: u64, object_count: u64) -> Self {
        Self {
            version: SUPERBLOCK_VERSION,
            offset_size: 8,
            length_size: 8,
            flags: 0,
            root_group_address,
            eof_address,
            object_count,
        }
    }

    /// Serialize to exactly [`SUPERBLOCK_SIZE`] bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE);
        buf.extend_from_slice(&HCF_SIGNATURE);
        buf.push(self.version);
        buf.push(self.offset_size);
        buf.push(self.length_size);
        buf.push(self.flags);
        let mut fields = [0u8; 24];
        LittleEndian::write_u64(&mut fields[0..8], self.root_group_address);
        LittleEndian::write_u64(&mut fields[8..16], self.eof_address);
        LittleEndian::write_u64(&mut fields[16..24], self.object_count);
        buf.extend_from_slice(&fields);
        let checksum = crc32c::crc32c(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with(sb: &Superblock, total_len: usize) -> Vec<u8> {
        let mut data = sb.serialize();
        data.resize(total_len, 0);
        data
    }

    #[test]
    fn roundtrip() {
        let sb = Superblock::new(40, 128, 3);
        let data = file_with(&sb, 128);
        assert_eq!(data[..SUPERBLOCK_SIZE].len(), SUPERBLOCK_SIZE);
        assert_eq!(Superblock::parse(&data).unwrap(), sb);
    }

    #[test]
    fn placeholder_is_not_finalized() {
        let data = vec![0u8; 64];
        assert_eq!(Superblock::parse(&data), Err(FormatError::NotFinalized));
    }

    #[test]
    fn corrupted_field_fails_checksum() {
        let sb = Superblock::new(40, 128, 3);
        let mut data = file_with(&sb, 128);
        data[20] ^= 0xFF;
        assert!(matches!(
            Superblock::parse(&data),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_file_detected() {
        let sb = Superblock::new(40, 4096, 1);
        let data = file_with(&sb, 100);
        assert!(matches!(
            Superblock::parse(&data),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn random_bytes_have_no_signature() {
        let data: Vec<u8> = (0..64).map(|i| i as u8 + 1).collect();
        assert_eq!(Superblock::parse(&data), Err(FormatError::SignatureNotFound));
    }

    #[test]
    fn unsupported_version() {
        let sb = Superblock::new(40, 64, 1);
        let mut data = file_with(&sb, 64);
        data[8] = 9;
        assert_eq!(Superblock::parse(&data), Err(FormatError::UnsupportedVersion(9)));
    }
}
