//! Error type for HDF5 parsing and writing.

use hcf_filters::FilterError;
use thiserror::Error;

/// Errors raised while reading or writing an HDF5 file.
#[derive(Debug, Error)]
pub enum Hdf5Error {
    /// No superblock signature at any of the allowed offsets.
    #[error("HDF5 signature not found")]
    SignatureNotFound,
    /// A structure version this crate does not read.
    #[error("unsupported {what} version {version}")]
    UnsupportedVersion { what: &'static str, version: u8 },
    /// A read ran past the end of the file.
    #[error("unexpected EOF: need {needed} bytes at {offset:#x}, file has {available}")]
    UnexpectedEof {
        offset: u64,
        needed: u64,
        available: u64,
    },
    /// A metadata block does not start with its magic bytes.
    #[error("bad {what} signature at {address:#x}")]
    BadSignature { what: &'static str, address: u64 },
    /// A metadata block fails its lookup3 checksum.
    #[error("{what} checksum mismatch at {address:#x}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        what: &'static str,
        address: u64,
        stored: u32,
        computed: u32,
    },
    /// Structurally invalid metadata.
    #[error("corrupt file: {0}")]
    Corrupt(String),
    /// Valid HDF5 that has no counterpart in the node model.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Chunk filters failed.
    #[error("filter failed: {0}")]
    Filter(#[from] FilterError),
    /// The writer's sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A node already exists at this path.
    #[error("path already exists: {0}")]
    DuplicatePath(String),
    /// No node at this path.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// The parent of a new node is a dataset.
    #[error("parent is not a group: {0}")]
    ParentNotGroup(String),
    /// The attribute name is taken on this node.
    #[error("attribute {name:?} already set on {path}")]
    DuplicateAttribute { path: String, name: String },
    /// A value whose size disagrees with its type and shape.
    #[error("value does not match: {0}")]
    Mismatch(String),
    /// Something the writer cannot encode.
    #[error("cannot write: {0}")]
    TooLarge(String),
}

impl Hdf5Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Hdf5Error::Corrupt(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Hdf5Error::Unsupported(msg.into())
    }
}
