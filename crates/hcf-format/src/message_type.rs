//! Object header message type identifiers.

/// Recognized header message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Nil,
    Dataspace,
    LinkInfo,
    Datatype,
    Link,
    DataLayout,
    FilterPipeline,
    Attribute,
    /// Unknown message type with its raw type ID.
    Unknown(u8),
}

impl MessageType {
    /// Convert a raw type ID to a `MessageType`.
    pub fn from_u8(val: u8) -> MessageType {
        match val {
            0x00 => MessageType::Nil,
            0x01 => MessageType::Dataspace,
            0x02 => MessageType::LinkInfo,
            0x03 => MessageType::Datatype,
            0x06 => MessageType::Link,
            0x08 => MessageType::DataLayout,
            0x0B => MessageType::FilterPipeline,
            0x0C => MessageType::Attribute,
            other => MessageType::Unknown(other),
        }
    }

    /// Convert back to the raw type ID.
    pub fn to_u8(self) -> u8 {
        match self {
            MessageType::Nil => 0x00,
            MessageType::Dataspace => 0x01,
            MessageType::LinkInfo => 0x02,
            MessageType::Datatype => 0x03,
            MessageType::Link => 0x06,
            MessageType::DataLayout => 0x08,
            MessageType::FilterPipeline => 0x0B,
            MessageType::Attribute => 0x0C,
            MessageType::Unknown(v) => v,
        }
    }
}
