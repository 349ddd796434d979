//! Datatype message (type 0x03).
//!
//! ```text
//! version(1) class(1) flags(1) reserved(1) size(4)
//! ```
//!
//! All numeric types are little-endian. Variable-length strings carry a
//! size of 0; their elements are stored as `u32` length + UTF-8 bytes.

use crate::cursor::Cursor;
use crate::error::FormatError;

pub const CLASS_FIXED_POINT: u8 = 0;
pub const CLASS_FLOATING_POINT: u8 = 1;
pub const CLASS_BOOLEAN: u8 = 2;
pub const CLASS_STRING: u8 = 3;
pub const CLASS_REFERENCE: u8 = 7;
pub const CLASS_VARIABLE_STRING: u8 = 9;

const FLAG_SIGNED: u8 = 0x01;

/// Parsed datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// Integer of 1, 2, 4 or 8 bytes.
    FixedPoint { size: u32, signed: bool },
    /// IEEE float of 4 or 8 bytes.
    FloatingPoint { size: u32 },
    /// One byte, 0 or 1.
    Boolean,
    /// Fixed-width byte string.
    String { size: u32 },
    /// Object reference. Parsed so it can be reported, never produced by
    /// the high-level writer.
    Reference { size: u32 },
    /// Variable-length UTF-8 string.
    VariableString,
}

impl Datatype {
    /// Parse a datatype message.
    pub fn parse(data: &[u8]) -> Result<Datatype, FormatError> {
        let mut c = Cursor::new(data, 0);
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedMessageVersion {
                message: "datatype",
                version,
            });
        }
        let class = c.u8()?;
        let flags = c.u8()?;
        let _reserved = c.u8()?;
        let size = c.u32()?;

        let dt = match (class, size) {
            (CLASS_FIXED_POINT, 1 | 2 | 4 | 8) => Datatype::FixedPoint {
                size,
                signed: flags & FLAG_SIGNED != 0,
            },
            (CLASS_FLOATING_POINT, 4 | 8) => Datatype::FloatingPoint { size },
            (CLASS_BOOLEAN, 1) => Datatype::Boolean,
            (CLASS_STRING, s) if s > 0 => Datatype::String { size },
            (CLASS_REFERENCE, s) if s > 0 => Datatype::Reference { size },
            (CLASS_VARIABLE_STRING, 0) => Datatype::VariableString,
            (class, size) => return Err(FormatError::UnsupportedDatatype { class, size }),
        };
        Ok(dt)
    }

    /// Serialize to message bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let (class, flags, size) = match *self {
            Datatype::FixedPoint { size, signed } => {
                (CLASS_FIXED_POINT, if signed { FLAG_SIGNED } else { 0 }, size)
            }
            Datatype::FloatingPoint { size } => (CLASS_FLOATING_POINT, 0, size),
            Datatype::Boolean => (CLASS_BOOLEAN, 0, 1),
            Datatype::String { size } => (CLASS_STRING, 0, size),
            Datatype::Reference { size } => (CLASS_REFERENCE, 0, size),
            Datatype::VariableString => (CLASS_VARIABLE_STRING, 0, 0),
        };
        let mut buf = Vec::with_capacity(8);
        buf.push(1); // version
        buf.push(class);
        buf.push(flags);
        buf.push(0);
        buf.extend_from_slice(&size.to_le_bytes());
        buf
    }

    /// Size of one element in bytes, `None` for variable-length types.
    pub fn element_size(&self) -> Option<usize> {
        match *self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size }
            | Datatype::String { size }
            | Datatype::Reference { size } => Some(size as usize),
            Datatype::Boolean => Some(1),
            Datatype::VariableString => None,
        }
    }

    /// The class id stored on disk.
    pub fn class(&self) -> u8 {
        match self {
            Datatype::FixedPoint { .. } => CLASS_FIXED_POINT,
            Datatype::FloatingPoint { .. } => CLASS_FLOATING_POINT,
            Datatype::Boolean => CLASS_BOOLEAN,
            Datatype::String { .. } => CLASS_STRING,
            Datatype::Reference { .. } => CLASS_REFERENCE,
            Datatype::VariableString => CLASS_VARIABLE_STRING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_roundtrip() {
        let types = [
            Datatype::FixedPoint { size: 1, signed: true },
            Datatype::FixedPoint { size: 8, signed: false },
            Datatype::FloatingPoint { size: 4 },
            Datatype::FloatingPoint { size: 8 },
            Datatype::Boolean,
            Datatype::String { size: 12 },
            Datatype::Reference { size: 8 },
            Datatype::VariableString,
        ];
        for dt in types {
            assert_eq!(Datatype::parse(&dt.serialize()).unwrap(), dt);
        }
    }

    #[test]
    fn odd_integer_width_rejected() {
        let mut bytes = Datatype::FixedPoint { size: 4, signed: true }.serialize();
        bytes[4] = 3;
        assert_eq!(
            Datatype::parse(&bytes),
            Err(FormatError::UnsupportedDatatype { class: 0, size: 3 })
        );
    }

    #[test]
    fn half_float_rejected() {
        let mut bytes = Datatype::FloatingPoint { size: 4 }.serialize();
        bytes[4] = 2;
        assert!(matches!(
            Datatype::parse(&bytes),
            Err(FormatError::UnsupportedDatatype { class: 1, size: 2 })
        ));
    }

    #[test]
    fn unknown_class_rejected() {
        let bytes = [1u8, 6, 0, 0, 16, 0, 0, 0];
        assert_eq!(
            Datatype::parse(&bytes),
            Err(FormatError::UnsupportedDatatype { class: 6, size: 16 })
        );
    }

    #[test]
    fn element_sizes() {
        assert_eq!(Datatype::Boolean.element_size(), Some(1));
        assert_eq!(Datatype::String { size: 5 }.element_size(), Some(5));
        assert_eq!(Datatype::VariableString.element_size(), None);
    }
}
