//! Object header writer.

use crate::message_type::MessageType;
use crate::object_header::{OHDR_SIGNATURE, OHDR_VERSION};

/// Writer for object headers with CRC32C checksums.
#[derive(Debug, Default)]
pub struct ObjectHeaderWriter {
    messages: Vec<(MessageType, Vec<u8>, u8)>, // (type, data, msg_flags)
}

impl ObjectHeaderWriter {
    /// Create a new empty object header writer.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Add a message to the header with default flags (0).
    pub fn add_message(&mut self, msg_type: MessageType, data: Vec<u8>) {
        self.messages.push((msg_type, data, 0));
    }

    /// Add a message with specific flags.
    pub fn add_message_with_flags(&mut self, msg_type: MessageType, data: Vec<u8>, flags: u8) {
        self.messages.push((msg_type, data, flags));
    }

    /// Size in bytes of the serialized header.
    pub fn serialized_len(&self) -> usize {
        10 + self.message_bytes() + 4
    }

    fn message_bytes(&self) -> usize {
        self.messages.iter().map(|(_, data, _)| 6 + data.len()).sum()
    }

    /// Serialize the complete header (OHDR + messages + checksum).
    pub fn serialize(&self) -> Vec<u8> {
        let msg_bytes_total = self.message_bytes();
        let mut buf = Vec::with_capacity(self.serialized_len());

        buf.extend_from_slice(&OHDR_SIGNATURE);
        buf.push(OHDR_VERSION);
        buf.push(0); // flags
        buf.extend_from_slice(&(msg_bytes_total as u32).to_le_bytes());

        for (msg_type, data, msg_flags) in &self.messages {
            buf.push(msg_type.to_u8());
            buf.push(*msg_flags);
            buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
            buf.extend_from_slice(data);
        }

        let checksum = crc32c::crc32c(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        buf
    }
}
