//! Attribute message (type 0x0C).
//!
//! ```text
//! version(1) reserved(1) name_len(2) name
//! datatype_len(2) datatype  dataspace_len(2) dataspace
//! data_len(4) data
//! ```
//!
//! `data` uses the same element encoding as dataset storage.

use crate::cursor::{put_name, Cursor};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::FormatError;

/// Parsed attribute message.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMessage {
    /// Attribute name, unique within its object.
    pub name: String,
    /// Element type.
    pub datatype: Datatype,
    /// Shape of the value.
    pub dataspace: Dataspace,
    /// Encoded element bytes.
    pub raw_data: Vec<u8>,
}

impl AttributeMessage {
    pub fn parse(data: &[u8]) -> Result<AttributeMessage, FormatError> {
        let mut c = Cursor::new(data, 0);
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedMessageVersion {
                message: "attribute",
                version,
            });
        }
        let _reserved = c.u8()?;
        let name = c.name()?;
        let dt_len = c.u16()? as usize;
        let datatype = Datatype::parse(c.bytes(dt_len)?)?;
        let ds_len = c.u16()? as usize;
        let dataspace = Dataspace::parse(c.bytes(ds_len)?)?;
        let data_len = c.u32()? as usize;
        let raw_data = c.bytes(data_len)?.to_vec();
        Ok(AttributeMessage {
            name,
            datatype,
            dataspace,
            raw_data,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let dt = self.datatype.serialize();
        let ds = self.dataspace.serialize();
        let mut buf =
            Vec::with_capacity(12 + self.name.len() + dt.len() + ds.len() + self.raw_data.len());
        buf.push(1);
        buf.push(0);
        put_name(&mut buf, &self.name);
        buf.extend_from_slice(&(dt.len() as u16).to_le_bytes());
        buf.extend_from_slice(&dt);
        buf.extend_from_slice(&(ds.len() as u16).to_le_bytes());
        buf.extend_from_slice(&ds);
        buf.extend_from_slice(&(self.raw_data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.raw_data);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_attribute_roundtrip() {
        let attr = AttributeMessage {
            name: "units".into(),
            datatype: Datatype::String { size: 6 },
            dataspace: Dataspace::scalar(),
            raw_data: b"meters".to_vec(),
        };
        assert_eq!(AttributeMessage::parse(&attr.serialize()).unwrap(), attr);
    }

    #[test]
    fn array_attribute_roundtrip() {
        let raw: Vec<u8> = [1.0f64, 2.0, 3.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let attr = AttributeMessage {
            name: "range".into(),
            datatype: Datatype::FloatingPoint { size: 8 },
            dataspace: Dataspace::simple(&[3]),
            raw_data: raw,
        };
        assert_eq!(AttributeMessage::parse(&attr.serialize()).unwrap(), attr);
    }

    #[test]
    fn reference_attribute_parses() {
        let attr = AttributeMessage {
            name: "target".into(),
            datatype: Datatype::Reference { size: 8 },
            dataspace: Dataspace::scalar(),
            raw_data: 64u64.to_le_bytes().to_vec(),
        };
        let parsed = AttributeMessage::parse(&attr.serialize()).unwrap();
        assert_eq!(parsed.datatype, Datatype::Reference { size: 8 });
    }

    #[test]
    fn truncated_data() {
        let attr = AttributeMessage {
            name: "x".into(),
            datatype: Datatype::Boolean,
            dataspace: Dataspace::simple(&[4]),
            raw_data: vec![0, 1, 0, 1],
        };
        let mut bytes = attr.serialize();
        bytes.pop();
        assert!(matches!(
            AttributeMessage::parse(&bytes),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
