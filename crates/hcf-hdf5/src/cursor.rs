//! Bounds-checked little-endian reads with file-specific field widths.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Hdf5Error;
use crate::UNDEF_ADDR;

/// Widths of addresses and lengths, fixed per file by the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    pub offset: u8,
    pub length: u8,
}

impl Sizes {
    /// What the writer uses.
    pub const WIDE: Sizes = Sizes {
        offset: 8,
        length: 8,
    };
}

impl Default for Sizes {
    fn default() -> Self {
        Sizes::WIDE
    }
}

fn eof(offset: usize, needed: usize, available: usize) -> Hdf5Error {
    Hdf5Error::UnexpectedEof {
        offset: offset as u64,
        needed: needed as u64,
        available: available as u64,
    }
}

/// `data[start..start + len]`, or an EOF error.
pub fn slice(data: &[u8], start: usize, len: usize) -> Result<&[u8], Hdf5Error> {
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| eof(start, len, data.len()))
}

/// Little-endian unsigned integer of 1 to 8 bytes.
pub fn read_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Bytes needed to hold `value`; at least one.
pub fn bytes_for(value: u64) -> u8 {
    ((64 - value.leading_zeros()).max(1)).div_ceil(8) as u8
}

/// Forward-only reader over a byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    sizes: Sizes,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8], pos: usize, sizes: Sizes) -> Self {
        Self { data, pos, sizes }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn sizes(&self) -> Sizes {
        self.sizes
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Everything after the current position, without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], Hdf5Error> {
        let out = slice(self.data, self.pos, n)?;
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Hdf5Error> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, Hdf5Error> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, Hdf5Error> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, Hdf5Error> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, Hdf5Error> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    /// Unsigned integer of `width` bytes (1 to 8).
    pub fn uint(&mut self, width: usize) -> Result<u64, Hdf5Error> {
        if !(1..=8).contains(&width) {
            return Err(Hdf5Error::corrupt(format!("integer width {width}")));
        }
        Ok(read_uint(self.bytes(width)?))
    }

    /// A file address. All ones reads as [`UNDEF_ADDR`].
    pub fn address(&mut self) -> Result<u64, Hdf5Error> {
        let width = self.sizes.offset as usize;
        let raw = self.uint(width)?;
        let all_ones = if width == 8 {
            u64::MAX
        } else {
            (1u64 << (width * 8)) - 1
        };
        Ok(if raw == all_ones { UNDEF_ADDR } else { raw })
    }

    /// A length field.
    pub fn length(&mut self) -> Result<u64, Hdf5Error> {
        self.uint(self.sizes.length as usize)
    }

    /// Expect `magic` at the current position.
    pub fn magic(&mut self, magic: &[u8; 4], what: &'static str) -> Result<(), Hdf5Error> {
        let at = self.pos;
        if self.bytes(4)? != magic {
            return Err(Hdf5Error::BadSignature {
                what,
                address: at as u64,
            });
        }
        Ok(())
    }
}

/// The whole file, with the base address and field widths needed to
/// follow stored addresses.
#[derive(Debug, Clone, Copy)]
pub struct FileView<'a> {
    pub data: &'a [u8],
    pub base: u64,
    pub sizes: Sizes,
}

impl<'a> FileView<'a> {
    pub fn new(data: &'a [u8], base: u64, sizes: Sizes) -> Self {
        Self { data, base, sizes }
    }

    /// File position of a stored address.
    pub fn pos(&self, address: u64) -> Result<usize, Hdf5Error> {
        if address == UNDEF_ADDR {
            return Err(Hdf5Error::corrupt("undefined address followed"));
        }
        address
            .checked_add(self.base)
            .and_then(|a| usize::try_from(a).ok())
            .filter(|&a| a <= self.data.len())
            .ok_or_else(|| eof(address as usize, 0, self.data.len()))
    }

    /// A cursor at a stored address.
    pub fn at(&self, address: u64) -> Result<Cursor<'a>, Hdf5Error> {
        Ok(Cursor::new(self.data, self.pos(address)?, self.sizes))
    }

    /// `len` bytes at a stored address.
    pub fn bytes(&self, address: u64, len: usize) -> Result<&'a [u8], Hdf5Error> {
        slice(self.data, self.pos(address)?, len)
    }
}

/// Round `n` up to a multiple of 8.
pub fn pad8(n: usize) -> usize {
    n.div_ceil(8) * 8
}
