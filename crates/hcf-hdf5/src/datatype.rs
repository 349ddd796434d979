//! Datatype message (0x0003): the element types a recompression can carry.
//!
//! Integers and IEEE floats of 1 to 8 bytes in either byte order, fixed
//! and variable-length strings, and the `FALSE`/`TRUE` enum that h5py uses
//! for booleans. Everything else parses to [`Hdf5Error::Unsupported`].

use byteorder::{ByteOrder as _, LittleEndian};

use crate::cursor::{pad8, Cursor, Sizes};
use crate::error::Hdf5Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Padding of fixed-length strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharSet {
    Ascii,
    Utf8,
}

/// An element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Integer {
        size: u8,
        signed: bool,
        order: ByteOrder,
    },
    Float {
        size: u8,
        order: ByteOrder,
    },
    Bool,
    FixedString {
        size: u32,
        padding: StringPadding,
        charset: CharSet,
    },
    /// Stored as global heap references.
    VarString { charset: CharSet },
}

const CLASS_FIXED_POINT: u8 = 0;
const CLASS_FLOAT: u8 = 1;
const CLASS_STRING: u8 = 3;
const CLASS_ENUM: u8 = 8;
const CLASS_VLEN: u8 = 9;

fn class_name(class: u8) -> &'static str {
    match class {
        2 => "time",
        4 => "bitfield",
        5 => "opaque",
        6 => "compound",
        7 => "reference",
        9 => "variable-length sequence",
        10 => "array",
        11 => "complex",
        _ => "unknown class",
    }
}

fn order_bit(bits: u8) -> ByteOrder {
    if bits & 1 == 0 {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    }
}

fn charset_of(nibble: u8) -> Result<CharSet, Hdf5Error> {
    match nibble {
        0 => Ok(CharSet::Ascii),
        1 => Ok(CharSet::Utf8),
        other => Err(Hdf5Error::corrupt(format!("string character set {other}"))),
    }
}

impl Datatype {
    /// Bytes one element occupies in the file.
    pub fn size(&self, sizes: Sizes) -> usize {
        match *self {
            Datatype::Integer { size, .. } | Datatype::Float { size, .. } => size as usize,
            Datatype::Bool => 1,
            Datatype::FixedString { size, .. } => size as usize,
            Datatype::VarString { .. } => 4 + sizes.offset as usize + 4,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        match *self {
            Datatype::Integer { order, .. } | Datatype::Float { order, .. } => order,
            _ => ByteOrder::Little,
        }
    }

    pub fn is_var_string(&self) -> bool {
        matches!(self, Datatype::VarString { .. })
    }

    pub fn parse(body: &[u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        Self::read(&mut c)
    }

    fn read(c: &mut Cursor<'_>) -> Result<Self, Hdf5Error> {
        let class_version = c.u8()?;
        let class = class_version & 0x0f;
        let bits = c.bytes(3)?;
        let (b0, b1) = (bits[0], bits[1]);
        let size = c.u32()?;

        match class {
            CLASS_FIXED_POINT => {
                let offset = c.u16()?;
                let precision = c.u16()?;
                if !matches!(size, 1 | 2 | 4 | 8) || offset != 0 || u32::from(precision) != size * 8
                {
                    return Err(Hdf5Error::unsupported(format!(
                        "{size}-byte integer with {precision} bits at offset {offset}"
                    )));
                }
                Ok(Datatype::Integer {
                    size: size as u8,
                    signed: b0 & 0x08 != 0,
                    order: order_bit(b0),
                })
            }
            CLASS_FLOAT => {
                if b0 & 0x40 != 0 {
                    return Err(Hdf5Error::unsupported("VAX float byte order"));
                }
                let _offset = c.u16()?;
                let precision = c.u16()?;
                let _exp_location = c.u8()?;
                let exp_size = c.u8()?;
                let _mant_location = c.u8()?;
                let mant_size = c.u8()?;
                let _bias = c.u32()?;
                let ieee = matches!(
                    (size, precision, exp_size, mant_size),
                    (4, 32, 8, 23) | (8, 64, 11, 52)
                );
                if !ieee {
                    return Err(Hdf5Error::unsupported(format!(
                        "{size}-byte float with {exp_size}-bit exponent"
                    )));
                }
                Ok(Datatype::Float {
                    size: size as u8,
                    order: order_bit(b0),
                })
            }
            CLASS_STRING => {
                let padding = match b0 & 0x0f {
                    0 => StringPadding::NullTerminate,
                    1 => StringPadding::NullPad,
                    2 => StringPadding::SpacePad,
                    other => return Err(Hdf5Error::corrupt(format!("string padding {other}"))),
                };
                if size == 0 {
                    return Err(Hdf5Error::unsupported("zero-width string"));
                }
                Ok(Datatype::FixedString {
                    size,
                    padding,
                    charset: charset_of(b0 >> 4)?,
                })
            }
            CLASS_VLEN => {
                if b0 & 0x0f != 1 {
                    return Err(Hdf5Error::unsupported(class_name(CLASS_VLEN)));
                }
                // The base type (a 1-byte character) follows; nothing in it
                // changes how the strings are stored.
                Ok(Datatype::VarString {
                    charset: charset_of(b1 & 0x0f)?,
                })
            }
            CLASS_ENUM => {
                let members = u16::from_le_bytes([b0, b1]) as usize;
                let version = class_version >> 4;
                let base = Self::read(c)?;
                let base_size = match base {
                    Datatype::Integer { size: 1, .. } => 1,
                    _ => return Err(Hdf5Error::unsupported("enumeration other than bool")),
                };
                let mut names = Vec::with_capacity(members.min(16));
                for _ in 0..members {
                    let rest = c.rest();
                    let len = rest
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or_else(|| Hdf5Error::corrupt("unterminated enum member name"))?;
                    names.push(rest[..len].to_vec());
                    c.skip(if version >= 3 { len + 1 } else { pad8(len + 1) })?;
                }
                let values = c.bytes(members * base_size)?;
                let is_bool = members == 2
                    && names[0] == b"FALSE"
                    && names[1] == b"TRUE"
                    && values == [0, 1];
                if !is_bool {
                    return Err(Hdf5Error::unsupported("enumeration other than bool"));
                }
                Ok(Datatype::Bool)
            }
            other => Err(Hdf5Error::unsupported(format!(
                "{} datatype",
                class_name(other)
            ))),
        }
    }

    /// Encoded datatype message, little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        match *self {
            Datatype::Integer { size, signed, .. } => {
                encode_integer(&mut out, size, signed);
            }
            Datatype::Float { size, .. } => {
                out.push(0x10 | CLASS_FLOAT);
                let (sign, props): (u8, [u8; 8]) = if size == 4 {
                    (31, [32, 0, 23, 8, 0, 23, 0, 0])
                } else {
                    (63, [64, 0, 52, 11, 0, 52, 0, 0])
                };
                out.extend_from_slice(&[0x20, sign, 0]);
                out.extend_from_slice(&u32::from(size).to_le_bytes());
                out.extend_from_slice(&0u16.to_le_bytes());
                out.extend_from_slice(&props[..6]);
                let bias: u32 = if size == 4 { 127 } else { 1023 };
                out.extend_from_slice(&bias.to_le_bytes());
            }
            Datatype::Bool => {
                out.push(0x10 | CLASS_ENUM);
                out.extend_from_slice(&[2, 0, 0]);
                out.extend_from_slice(&1u32.to_le_bytes());
                encode_integer(&mut out, 1, true);
                for name in [&b"FALSE"[..], &b"TRUE"[..]] {
                    let mut padded = name.to_vec();
                    padded.resize(pad8(name.len() + 1), 0);
                    out.extend_from_slice(&padded);
                }
                out.extend_from_slice(&[0, 1]);
            }
            Datatype::FixedString {
                size,
                padding,
                charset,
            } => {
                out.push(0x10 | CLASS_STRING);
                let pad = match padding {
                    StringPadding::NullTerminate => 0,
                    StringPadding::NullPad => 1,
                    StringPadding::SpacePad => 2,
                };
                out.extend_from_slice(&[pad | (charset_bits(charset) << 4), 0, 0]);
                out.extend_from_slice(&size.to_le_bytes());
            }
            Datatype::VarString { charset } => {
                out.push(0x10 | CLASS_VLEN);
                out.extend_from_slice(&[0x01, charset_bits(charset), 0]);
                out.extend_from_slice(&16u32.to_le_bytes());
                encode_integer(&mut out, 1, false);
            }
        }
        out
    }
}

fn charset_bits(charset: CharSet) -> u8 {
    match charset {
        CharSet::Ascii => 0,
        CharSet::Utf8 => 1,
    }
}

fn encode_integer(out: &mut Vec<u8>, size: u8, signed: bool) {
    out.push(0x10 | CLASS_FIXED_POINT);
    out.extend_from_slice(&[if signed { 0x08 } else { 0 }, 0, 0]);
    out.extend_from_slice(&u32::from(size).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(u16::from(size) * 8).to_le_bytes());
}

/// Swap every `size`-byte element of `data` in place.
pub fn swap_in_place(data: &mut [u8], size: usize) {
    if size > 1 {
        for elem in data.chunks_exact_mut(size) {
            elem.reverse();
        }
    }
}

/// Decode the 16-byte disk form of a variable-length string element:
/// byte length, collection address, object index.
pub fn read_vlen_ref(elem: &[u8], sizes: Sizes) -> Result<(u32, u64, u32), Hdf5Error> {
    let mut c = Cursor::new(elem, 0, sizes);
    let len = c.u32()?;
    let addr = c.address()?;
    let index = c.u32()?;
    Ok((len, addr, index))
}

/// Encode a variable-length string element with 8-byte addresses.
pub fn write_vlen_ref(out: &mut Vec<u8>, len: u32, collection: u64, index: u32) {
    let mut buf = [0u8; 16];
    LittleEndian::write_u32(&mut buf[0..4], len);
    LittleEndian::write_u64(&mut buf[4..12], collection);
    LittleEndian::write_u32(&mut buf[12..16], index);
    out.extend_from_slice(&buf);
}
