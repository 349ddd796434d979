//! Error types for HCF format parsing and writing.

use thiserror::Error;

/// Errors that can occur when parsing HCF binary structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The HCF magic signature was not found at offset 0.
    #[error("HCF signature not found")]
    SignatureNotFound,
    /// The superblock version is not supported.
    #[error("unsupported superblock version: {0}")]
    UnsupportedVersion(u8),
    /// The superblock was never finalized (zeroed placeholder).
    #[error("superblock is not finalized")]
    NotFinalized,
    /// Unexpected end of data.
    #[error("unexpected EOF: need {expected} bytes, have {available}")]
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// Invalid offset size (only 8 is supported).
    #[error("invalid offset size: {0} (must be 8)")]
    InvalidOffsetSize(u8),
    /// Invalid length size (only 8 is supported).
    #[error("invalid length size: {0} (must be 8)")]
    InvalidLengthSize(u8),
    /// Invalid object header signature.
    #[error("invalid object header signature at {0:#x}")]
    InvalidObjectHeaderSignature(u64),
    /// Invalid object header version.
    #[error("invalid object header version: {0}")]
    InvalidObjectHeaderVersion(u8),
    /// Unknown message type that is marked as must-understand.
    #[error("unsupported message type {0:#04x} marked as must-understand")]
    UnsupportedMessage(u8),
    /// A message has an unknown version.
    #[error("unsupported {message} message version: {version}")]
    UnsupportedMessageVersion {
        /// Message name.
        message: &'static str,
        /// Version found.
        version: u8,
    },
    /// CRC32C checksum mismatch.
    #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// Datatype class or size that HCF cannot represent.
    #[error("unsupported datatype: class {class}, size {size}")]
    UnsupportedDatatype {
        /// Datatype class id.
        class: u8,
        /// Element size in bytes.
        size: u32,
    },
    /// Unknown filter id in a pipeline.
    #[error("unsupported filter id: {0}")]
    UnsupportedFilter(u16),
    /// Unknown data layout class.
    #[error("unsupported data layout class: {0}")]
    UnsupportedLayout(u8),
    /// A required message is missing from an object header.
    #[error("missing required message: {0}")]
    MissingMessage(&'static str),
    /// Object header is neither a group nor a dataset, or both.
    #[error("object header at {0:#x} is not a group or dataset")]
    UnknownObjectKind(u64),
    /// Group header link count disagrees with its link messages.
    #[error("link count mismatch: link info says {declared}, found {found}")]
    LinkCountMismatch {
        /// Count declared in the LinkInfo message.
        declared: u64,
        /// Link messages present.
        found: u64,
    },
    /// A name is not valid UTF-8.
    #[error("invalid UTF-8 in name")]
    InvalidName,
    /// Chunk index is inconsistent with the dataspace.
    #[error("corrupt chunk index: {0}")]
    CorruptChunkIndex(String),
    /// A filter failed while decoding chunk data.
    #[error("filter failed: {0}")]
    FilterFailed(String),
    /// Stored element data disagrees with its datatype.
    #[error("invalid element data: {0}")]
    InvalidData(String),
}

/// Errors that can occur while writing an HCF file.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The underlying sink failed.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    /// A node already exists at this path.
    #[error("path already exists: {0}")]
    DuplicatePath(String),
    /// The referenced node (or a parent) does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// The parent of a new node is a dataset.
    #[error("parent is not a group: {0}")]
    ParentNotGroup(String),
    /// The attribute name is already set on this node.
    #[error("attribute {name:?} already set on {path}")]
    DuplicateAttribute {
        /// Owning node path.
        path: String,
        /// Attribute name.
        name: String,
    },
    /// A name or path segment is empty or contains `/`.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    /// Chunk list does not tile the dataset.
    #[error("invalid chunk layout: {0}")]
    InvalidChunks(String),
    /// Filter failed while encoding.
    #[error("filter failed: {0}")]
    Filter(#[from] hcf_filters::FilterError),
}
