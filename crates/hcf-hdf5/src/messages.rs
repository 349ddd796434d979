//! Header message type codes and the small messages that describe groups,
//! links, attributes and fill values.

use crate::cursor::{bytes_for, pad8, Cursor, Sizes};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::Hdf5Error;
use crate::UNDEF_ADDR;

pub const MSG_NIL: u16 = 0x00;
pub const MSG_DATASPACE: u16 = 0x01;
pub const MSG_LINK_INFO: u16 = 0x02;
pub const MSG_DATATYPE: u16 = 0x03;
pub const MSG_FILL_OLD: u16 = 0x04;
pub const MSG_FILL: u16 = 0x05;
pub const MSG_LINK: u16 = 0x06;
pub const MSG_LAYOUT: u16 = 0x08;
pub const MSG_GROUP_INFO: u16 = 0x0A;
pub const MSG_FILTER_PIPELINE: u16 = 0x0B;
pub const MSG_ATTRIBUTE: u16 = 0x0C;
pub const MSG_CONTINUATION: u16 = 0x10;
pub const MSG_SYMBOL_TABLE: u16 = 0x11;
pub const MSG_ATTRIBUTE_INFO: u16 = 0x15;

/// Link info message: where a dense group keeps its links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub heap_address: u64,
    pub name_index_address: u64,
    pub order_index_address: Option<u64>,
}

impl LinkInfo {
    pub fn parse(body: &[u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        let version = c.u8()?;
        if version != 0 {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "link info",
                version,
            });
        }
        let flags = c.u8()?;
        if flags & 0x01 != 0 {
            c.u64()?; // max creation index
        }
        let heap_address = c.address()?;
        let name_index_address = c.address()?;
        let order_index_address = if flags & 0x02 != 0 {
            Some(c.address()?)
        } else {
            None
        };
        Ok(LinkInfo {
            heap_address,
            name_index_address,
            order_index_address,
        })
    }

    /// A compact group: no heap, no index.
    pub fn encode_compact() -> Vec<u8> {
        let mut out = vec![0, 0];
        out.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        out.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        out
    }

    pub fn is_dense(&self) -> bool {
        self.heap_address != UNDEF_ADDR
    }
}

/// Group info message with default phase change values.
pub fn encode_group_info() -> Vec<u8> {
    vec![0, 0]
}

/// Symbol table message of an old-style group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTable {
    pub btree_address: u64,
    pub heap_address: u64,
}

impl SymbolTable {
    pub fn parse(body: &[u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        Ok(SymbolTable {
            btree_address: c.address()?,
            heap_address: c.address()?,
        })
    }
}

/// A hard link. Soft and external links have no place in the node model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub address: u64,
    pub creation_order: Option<u64>,
}

impl Link {
    pub fn parse(body: &[u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        let version = c.u8()?;
        if version != 1 {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "link",
                version,
            });
        }
        let flags = c.u8()?;
        let link_type = if flags & 0x08 != 0 { c.u8()? } else { 0 };
        let creation_order = if flags & 0x04 != 0 {
            Some(c.u64()?)
        } else {
            None
        };
        if flags & 0x10 != 0 {
            c.u8()?; // charset; names are decoded as UTF-8 either way
        }
        let len = c.uint(1 << (flags & 0x03))? as usize;
        let name = utf8(c.bytes(len)?, "link name")?;
        match link_type {
            0 => Ok(Link {
                name,
                address: c.address()?,
                creation_order,
            }),
            1 => Err(Hdf5Error::unsupported(format!("soft link {name:?}"))),
            64 => Err(Hdf5Error::unsupported(format!("external link {name:?}"))),
            other => Err(Hdf5Error::unsupported(format!(
                "link {name:?} of type {other}"
            ))),
        }
    }

    /// Version 1 hard link with 8-byte address.
    pub fn encode(name: &str, address: u64) -> Vec<u8> {
        let name = name.as_bytes();
        let width = bytes_for(name.len() as u64);
        let (bits, width) = match width {
            1 => (0u8, 1usize),
            2 => (1, 2),
            3 | 4 => (2, 4),
            _ => (3, 8),
        };
        let non_ascii = !name.is_ascii();
        let mut out = Vec::with_capacity(12 + name.len());
        out.push(1);
        out.push(bits | if non_ascii { 0x10 } else { 0 });
        if non_ascii {
            out.push(1);
        }
        out.extend_from_slice(&(name.len() as u64).to_le_bytes()[..width]);
        out.extend_from_slice(name);
        out.extend_from_slice(&address.to_le_bytes());
        out
    }
}

/// Attribute info message: where dense attributes are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeInfo {
    pub heap_address: u64,
    pub name_index_address: u64,
    pub order_index_address: Option<u64>,
}

impl AttributeInfo {
    pub fn parse(body: &[u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        let version = c.u8()?;
        if version != 0 {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "attribute info",
                version,
            });
        }
        let flags = c.u8()?;
        if flags & 0x01 != 0 {
            c.u16()?; // max creation index
        }
        let heap_address = c.address()?;
        let name_index_address = c.address()?;
        let order_index_address = if flags & 0x02 != 0 {
            Some(c.address()?)
        } else {
            None
        };
        Ok(AttributeInfo {
            heap_address,
            name_index_address,
            order_index_address,
        })
    }
}

/// Attribute message with its raw value bytes still in file form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute<'a> {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub value: &'a [u8],
}

impl<'a> RawAttribute<'a> {
    pub fn parse(body: &'a [u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        let version = c.u8()?;
        if !(1..=3).contains(&version) {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "attribute",
                version,
            });
        }
        let flags = c.u8()?;
        if flags & 0x03 != 0 {
            return Err(Hdf5Error::unsupported("attribute with a shared type or shape"));
        }
        let name_len = c.u16()? as usize;
        let type_len = c.u16()? as usize;
        let space_len = c.u16()? as usize;
        if version == 3 {
            c.u8()?; // charset
        }
        let padded = |n: usize| if version == 1 { pad8(n) } else { n };

        let raw_name = c.bytes(padded(name_len))?;
        let raw_name = &raw_name[..name_len];
        let raw_name = raw_name.strip_suffix(&[0]).unwrap_or(raw_name);
        let name = utf8(raw_name, "attribute name")?;

        let datatype = Datatype::parse(c.bytes(padded(type_len))?, sizes)
            .map_err(|e| in_attribute(&name, e))?;
        let dataspace = Dataspace::parse(c.bytes(padded(space_len))?, sizes)
            .map_err(|e| in_attribute(&name, e))?;

        let count = dataspace
            .element_count()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Hdf5Error::corrupt(format!("attribute {name:?} is too large")))?;
        let len = count
            .checked_mul(datatype.size(sizes))
            .ok_or_else(|| Hdf5Error::corrupt(format!("attribute {name:?} is too large")))?;
        let value = c.bytes(len)?;
        Ok(RawAttribute {
            name,
            datatype,
            dataspace,
            value,
        })
    }
}

fn in_attribute(name: &str, e: Hdf5Error) -> Hdf5Error {
    match e {
        Hdf5Error::Unsupported(m) => Hdf5Error::Unsupported(format!("attribute {name:?}: {m}")),
        other => other,
    }
}

/// Version 3 attribute message. `value` is in file form.
pub fn encode_attribute(
    name: &str,
    datatype: &Datatype,
    dataspace: &Dataspace,
    value: &[u8],
) -> Result<Vec<u8>, Hdf5Error> {
    let mut name_bytes = name.as_bytes().to_vec();
    name_bytes.push(0);
    let dt = datatype.encode();
    let ds = dataspace.encode();
    let field = |n: usize| {
        u16::try_from(n)
            .map_err(|_| Hdf5Error::TooLarge(format!("attribute {name:?} header of {n} bytes")))
    };
    let mut out = Vec::with_capacity(9 + name_bytes.len() + dt.len() + ds.len() + value.len());
    out.push(3);
    out.push(0);
    out.extend_from_slice(&field(name_bytes.len())?.to_le_bytes());
    out.extend_from_slice(&field(dt.len())?.to_le_bytes());
    out.extend_from_slice(&field(ds.len())?.to_le_bytes());
    out.push(if name.is_ascii() { 0 } else { 1 });
    out.extend_from_slice(&name_bytes);
    out.extend_from_slice(&dt);
    out.extend_from_slice(&ds);
    out.extend_from_slice(value);
    Ok(out)
}

/// The value of a fill value message, when one is defined.
pub fn parse_fill(kind: u16, body: &[u8], sizes: Sizes) -> Result<Option<Vec<u8>>, Hdf5Error> {
    let mut c = Cursor::new(body, 0, sizes);
    if kind == MSG_FILL_OLD {
        return read_fill_value(&mut c);
    }
    let version = c.u8()?;
    match version {
        1 | 2 => {
            c.skip(2)?; // allocation and write time
            let defined = c.u8()? != 0;
            if version == 1 || defined {
                read_fill_value(&mut c)
            } else {
                Ok(None)
            }
        }
        3 => {
            let flags = c.u8()?;
            if flags & 0x20 != 0 {
                read_fill_value(&mut c)
            } else {
                Ok(None)
            }
        }
        v => Err(Hdf5Error::UnsupportedVersion {
            what: "fill value",
            version: v,
        }),
    }
}

fn read_fill_value(c: &mut Cursor<'_>) -> Result<Option<Vec<u8>>, Hdf5Error> {
    let size = c.u32()? as usize;
    if size == 0 {
        return Ok(None);
    }
    Ok(Some(c.bytes(size)?.to_vec()))
}

/// Version 3 fill value message: late allocation, never write fill values.
pub fn encode_fill() -> Vec<u8> {
    vec![3, 0x0a]
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, Hdf5Error> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Hdf5Error::unsupported(format!("{what} is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::ByteOrder;

    #[test]
    fn hard_link_roundtrip() {
        let body = Link::encode("temperature", 0x1234);
        let link = Link::parse(&body, Sizes::WIDE).unwrap();
        assert_eq!(link.name, "temperature");
        assert_eq!(link.address, 0x1234);
        assert_eq!(link.creation_order, None);

        let body = Link::encode("température", 96);
        assert_eq!(body[1] & 0x10, 0x10);
        assert_eq!(Link::parse(&body, Sizes::WIDE).unwrap().name, "température");
    }

    #[test]
    fn soft_links_are_unsupported() {
        // flags: link type present, one-byte name length
        let mut body = vec![1, 0x08, 1, 3];
        body.extend_from_slice(b"lnk");
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(b"/a");
        let err = Link::parse(&body, Sizes::WIDE).unwrap_err();
        assert!(matches!(err, Hdf5Error::Unsupported(ref m) if m.contains("soft")));
    }

    #[test]
    fn link_with_creation_order() {
        let mut body = vec![1, 0x04];
        body.extend_from_slice(&7u64.to_le_bytes());
        body.push(1);
        body.push(b'x');
        body.extend_from_slice(&500u64.to_le_bytes());
        let link = Link::parse(&body, Sizes::WIDE).unwrap();
        assert_eq!(link.creation_order, Some(7));
        assert_eq!(link.address, 500);
    }

    #[test]
    fn attribute_roundtrip() {
        let dt = Datatype::Integer {
            size: 4,
            signed: true,
            order: ByteOrder::Little,
        };
        let ds = Dataspace::simple(&[2]);
        let value = [1, 0, 0, 0, 2, 0, 0, 0];
        let body = encode_attribute("units", &dt, &ds, &value).unwrap();
        let attr = RawAttribute::parse(&body, Sizes::WIDE).unwrap();
        assert_eq!(attr.name, "units");
        assert_eq!(attr.datatype, dt);
        assert_eq!(attr.dataspace, ds);
        assert_eq!(attr.value, &value);
    }

    #[test]
    fn version1_attribute_is_padded() {
        let dt = Datatype::Float {
            size: 8,
            order: ByteOrder::Little,
        };
        let ds = Dataspace::simple(&[]);
        let mut body = vec![1, 0];
        body.extend_from_slice(&6u16.to_le_bytes());
        let dt_bytes = dt.encode();
        let ds_bytes = ds.encode();
        body.extend_from_slice(&(dt_bytes.len() as u16).to_le_bytes());
        body.extend_from_slice(&(ds_bytes.len() as u16).to_le_bytes());
        let mut name = b"scale\0".to_vec();
        name.resize(8, 0);
        body.extend(name);
        for part in [dt_bytes, ds_bytes] {
            let len = pad8(part.len());
            let mut part = part;
            part.resize(len, 0);
            body.extend(part);
        }
        body.extend_from_slice(&2.5f64.to_le_bytes());
        let attr = RawAttribute::parse(&body, Sizes::WIDE).unwrap();
        assert_eq!(attr.name, "scale");
        assert_eq!(attr.value, &2.5f64.to_le_bytes());
    }

    #[test]
    fn fill_values() {
        assert_eq!(parse_fill(MSG_FILL, &encode_fill(), Sizes::WIDE).unwrap(), None);
        let mut v3 = vec![3, 0x20 | 0x0a];
        v3.extend_from_slice(&4u32.to_le_bytes());
        v3.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(
            parse_fill(MSG_FILL, &v3, Sizes::WIDE).unwrap(),
            Some(vec![1, 2, 3, 4])
        );
        let v2 = [2, 1, 0, 0];
        assert_eq!(parse_fill(MSG_FILL, &v2, Sizes::WIDE).unwrap(), None);
        let mut old = 2u32.to_le_bytes().to_vec();
        old.extend_from_slice(&[9, 9]);
        assert_eq!(
            parse_fill(MSG_FILL_OLD, &old, Sizes::WIDE).unwrap(),
            Some(vec![9, 9])
        );
    }

    #[test]
    fn link_info_compact() {
        let info = LinkInfo::parse(&LinkInfo::encode_compact(), Sizes::WIDE).unwrap();
        assert!(!info.is_dense());
        assert_eq!(info.order_index_address, None);
    }
}
