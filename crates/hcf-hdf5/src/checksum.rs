//! Metadata checksum: Bob Jenkins' lookup3 `hashlittle`, as used by the
//! HDF5 library for every checksummed metadata block.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Hdf5Error;

fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

/// `hashlittle(data, initval)`.
pub fn hash_little(data: &[u8], initval: u32) -> u32 {
    let mut a = 0xdead_beef_u32
        .wrapping_add(data.len() as u32)
        .wrapping_add(initval);
    let mut b = a;
    let mut c = a;

    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(LittleEndian::read_u32(&rest[0..4]));
        b = b.wrapping_add(LittleEndian::read_u32(&rest[4..8]));
        c = c.wrapping_add(LittleEndian::read_u32(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }
    if rest.is_empty() {
        return c;
    }
    // Missing tail bytes add nothing, so a zero-padded block is equivalent.
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(LittleEndian::read_u32(&tail[0..4]));
    b = b.wrapping_add(LittleEndian::read_u32(&tail[4..8]));
    c = c.wrapping_add(LittleEndian::read_u32(&tail[8..12]));
    final_mix(&mut a, &mut b, &mut c);
    c
}

/// Checksum of a metadata block.
pub fn lookup3(data: &[u8]) -> u32 {
    hash_little(data, 0)
}

/// Check the 4-byte checksum stored right after `block`.
pub fn verify(
    data: &[u8],
    start: usize,
    len: usize,
    what: &'static str,
) -> Result<(), Hdf5Error> {
    let end = start
        .checked_add(len)
        .and_then(|e| e.checked_add(4))
        .filter(|&e| e <= data.len())
        .ok_or(Hdf5Error::UnexpectedEof {
            offset: start as u64,
            needed: len as u64 + 4,
            available: data.len() as u64,
        })?;
    let stored = LittleEndian::read_u32(&data[end - 4..end]);
    let computed = lookup3(&data[start..end - 4]);
    if stored != computed {
        return Err(Hdf5Error::ChecksumMismatch {
            what,
            address: start as u64,
            stored,
            computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_values() {
        assert_eq!(hash_little(b"", 0), 0xdead_beef);
        assert_eq!(hash_little(b"", 0xdead_beef), 0xbd5b_7dde);
        assert_eq!(hash_little(b"Four score and seven years ago", 0), 0x1777_0551);
        assert_eq!(hash_little(b"Four score and seven years ago", 1), 0xcd62_8161);
    }

    #[test]
    fn verify_detects_flips() {
        let mut block = b"OHDR\x02\x00payload".to_vec();
        let sum = lookup3(&block);
        block.extend_from_slice(&sum.to_le_bytes());
        assert!(verify(&block, 0, block.len() - 4, "object header").is_ok());
        block[6] ^= 1;
        let err = verify(&block, 0, block.len() - 4, "object header").unwrap_err();
        assert!(matches!(err, Hdf5Error::ChecksumMismatch { .. }));
        assert!(matches!(
            verify(&block, 0, block.len(), "object header"),
            Err(Hdf5Error::UnexpectedEof { .. })
        ));
    }
}
