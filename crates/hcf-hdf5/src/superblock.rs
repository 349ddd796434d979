//! Superblock versions 0 to 3.

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::{lookup3, verify};
use crate::cursor::{Cursor, Sizes};
use crate::error::Hdf5Error;
use crate::UNDEF_ADDR;

/// File signature at the start of the superblock.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

/// Size of the version 2/3 superblock with 8-byte offsets.
pub const SUPERBLOCK_V3_SIZE: usize = 48;

/// Parsed superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub version: u8,
    pub sizes: Sizes,
    /// Absolute offset that stored addresses are relative to.
    pub base_address: u64,
    pub eof_address: u64,
    /// Object header of the root group.
    pub root_address: u64,
}

/// Offset of the signature: 0, 512, 1024, 2048, ...
pub fn locate(data: &[u8]) -> Option<usize> {
    let mut at = 0usize;
    loop {
        let end = at.checked_add(HDF5_SIGNATURE.len())?;
        if end > data.len() {
            return None;
        }
        if data[at..end] == HDF5_SIGNATURE {
            return Some(at);
        }
        at = if at == 0 { 512 } else { at.checked_mul(2)? };
    }
}

/// Whether `data` carries an HDF5 superblock signature.
pub fn is_hdf5(data: &[u8]) -> bool {
    locate(data).is_some()
}

fn check_sizes(offset: u8, length: u8) -> Result<Sizes, Hdf5Error> {
    if !matches!(offset, 2 | 4 | 8) || !matches!(length, 2 | 4 | 8) {
        return Err(Hdf5Error::corrupt(format!(
            "offset size {offset}, length size {length}"
        )));
    }
    Ok(Sizes { offset, length })
}

impl Superblock {
    pub fn parse(data: &[u8]) -> Result<Self, Hdf5Error> {
        let start = locate(data).ok_or(Hdf5Error::SignatureNotFound)?;
        let version = *data
            .get(start + 8)
            .ok_or(Hdf5Error::SignatureNotFound)?;
        let mut c = Cursor::new(data, start + 9, Sizes::WIDE);

        let (sizes, eof_address, root_address) = match version {
            0 | 1 => {
                c.skip(4)?; // free-space, root symbol table, reserved, shared header versions
                let sizes = check_sizes(c.u8()?, c.u8()?)?;
                c.skip(1)?;
                c.skip(4)?; // group leaf and internal K
                c.skip(4)?; // consistency flags
                if version == 1 {
                    c.skip(4)?; // indexed storage K and reserved
                }
                let mut c = Cursor::new(data, c.position(), sizes);
                c.address()?; // base address
                c.address()?; // free-space info
                let eof = c.address()?;
                c.address()?; // driver info
                c.address()?; // root link name offset
                let root = c.address()?;
                (sizes, eof, root)
            }
            2 | 3 => {
                let sizes = check_sizes(c.u8()?, c.u8()?)?;
                c.skip(1)?; // consistency flags
                let mut c = Cursor::new(data, c.position(), sizes);
                c.address()?; // base address
                c.address()?; // superblock extension
                let eof = c.address()?;
                let root = c.address()?;
                verify(data, start, c.position() - start, "superblock")?;
                (sizes, eof, root)
            }
            v => {
                return Err(Hdf5Error::UnsupportedVersion {
                    what: "superblock",
                    version: v,
                })
            }
        };

        if root_address == UNDEF_ADDR {
            return Err(Hdf5Error::corrupt("root group address is undefined"));
        }
        // The library rebases a file whose superblock moved behind a user
        // block, so addresses are taken relative to the signature.
        Ok(Superblock {
            version,
            sizes,
            base_address: start as u64,
            eof_address,
            root_address,
        })
    }

    /// Version 3 superblock at offset 0 with 8-byte fields.
    pub fn encode_v3(eof_address: u64, root_address: u64) -> [u8; SUPERBLOCK_V3_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_V3_SIZE];
        buf[..8].copy_from_slice(&HDF5_SIGNATURE);
        buf[8] = 3;
        buf[9] = 8;
        buf[10] = 8;
        buf[11] = 0;
        LittleEndian::write_u64(&mut buf[12..20], 0);
        LittleEndian::write_u64(&mut buf[20..28], UNDEF_ADDR);
        LittleEndian::write_u64(&mut buf[28..36], eof_address);
        LittleEndian::write_u64(&mut buf[36..44], root_address);
        let sum = lookup3(&buf[..44]);
        LittleEndian::write_u32(&mut buf[44..48], sum);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Version 0 superblock with 8-byte fields and a root symbol table entry.
    fn v0_superblock(root: u64, eof: u64) -> Vec<u8> {
        let mut d = HDF5_SIGNATURE.to_vec();
        d.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        d.extend_from_slice(&4u16.to_le_bytes());
        d.extend_from_slice(&16u16.to_le_bytes());
        d.extend_from_slice(&0u32.to_le_bytes());
        d.extend_from_slice(&0u64.to_le_bytes());
        d.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        d.extend_from_slice(&eof.to_le_bytes());
        d.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        d.extend_from_slice(&0u64.to_le_bytes());
        d.extend_from_slice(&root.to_le_bytes());
        d.extend_from_slice(&[0u8; 24]);
        d
    }

    #[test]
    fn v3_roundtrip() {
        let sb = Superblock::encode_v3(4096, 48);
        let parsed = Superblock::parse(&sb).unwrap();
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.sizes, Sizes::WIDE);
        assert_eq!(parsed.eof_address, 4096);
        assert_eq!(parsed.root_address, 48);
        assert_eq!(parsed.base_address, 0);
    }

    #[test]
    fn v3_checksum_is_checked() {
        let mut sb = Superblock::encode_v3(4096, 48);
        sb[36] ^= 0x40;
        assert!(matches!(
            Superblock::parse(&sb),
            Err(Hdf5Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn v0_behind_user_block() {
        let mut data = vec![0u8; 512];
        data.extend_from_slice(&v0_superblock(96, 2048));
        let parsed = Superblock::parse(&data).unwrap();
        assert_eq!(parsed.version, 0);
        assert_eq!(parsed.base_address, 512);
        assert_eq!(parsed.root_address, 96);
        assert_eq!(parsed.eof_address, 2048);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            Superblock::parse(b"not an hdf5 file at all"),
            Err(Hdf5Error::SignatureNotFound)
        ));
        assert!(!is_hdf5(&[0u8; 2048]));
        let mut sb = Superblock::encode_v3(0, 48).to_vec();
        sb[8] = 7;
        assert!(matches!(
            Superblock::parse(&sb),
            Err(Hdf5Error::UnsupportedVersion { version: 7, .. })
        ));
    }
}
