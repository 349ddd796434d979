//! Error types for the high-level API.

use hcf_filters::FilterError;
use hcf_format::{FormatError, WriteError};
use hcf_hdf5::Hdf5Error;
use thiserror::Error;

use crate::path::NodePath;

/// Boxed error from an I/O or parse layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when reading, writing or recompressing containers.
#[derive(Debug, Error)]
pub enum Error {
    /// The source container could not be opened or parsed.
    #[error("unreadable source: {0}")]
    UnreadableSource(#[source] BoxError),
    /// The source hierarchy is not a tree of readable nodes.
    #[error("malformed hierarchy at {path}: {reason}")]
    MalformedHierarchy { path: String, reason: String },
    /// An element type the node model cannot carry.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    /// Payload length disagrees with the declared shape.
    #[error("shape {shape:?} needs {expected} elements, payload has {actual}")]
    ShapeMismatch {
        shape: Vec<u64>,
        expected: u64,
        actual: u64,
    },
    /// A node already exists at this path.
    #[error("path already exists: {0}")]
    DuplicatePath(String),
    /// No node at this path.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// Compression or decompression failed.
    #[error("codec failure: {0}")]
    CodecFailure(#[from] FilterError),
    /// The destination sink failed.
    #[error("destination write failed: {0}")]
    DestinationWriteFailure(#[source] std::io::Error),
    /// The attribute is already set on this node.
    #[error("attribute {name:?} already set on {path}")]
    DuplicateAttribute { path: String, name: String },
    /// The path names a group where a dataset was expected.
    #[error("not a dataset: {0}")]
    NotADataset(String),
    /// The path names a dataset where a group was expected.
    #[error("not a group: {0}")]
    NotAGroup(String),
    /// A path or name is empty, or a segment is `.`.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Binary structure could not be parsed.
    #[error("format error: {0}")]
    Format(FormatError),
    /// I/O error outside the destination sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Coarse classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnreadableSource,
    MalformedHierarchy,
    UnsupportedType,
    ShapeMismatch,
    DuplicatePath,
    NodeNotFound,
    CodecFailure,
    DestinationWriteFailure,
    DuplicateAttribute,
    NotADataset,
    NotAGroup,
    InvalidPath,
    InvalidConfig,
    Format,
    Io,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnreadableSource(_) => ErrorKind::UnreadableSource,
            Error::MalformedHierarchy { .. } => ErrorKind::MalformedHierarchy,
            Error::UnsupportedType(_) => ErrorKind::UnsupportedType,
            Error::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Error::DuplicatePath(_) => ErrorKind::DuplicatePath,
            Error::NodeNotFound(_) => ErrorKind::NodeNotFound,
            Error::CodecFailure(_) => ErrorKind::CodecFailure,
            Error::DestinationWriteFailure(_) => ErrorKind::DestinationWriteFailure,
            Error::DuplicateAttribute { .. } => ErrorKind::DuplicateAttribute,
            Error::NotADataset(_) => ErrorKind::NotADataset,
            Error::NotAGroup(_) => ErrorKind::NotAGroup,
            Error::InvalidPath(_) => ErrorKind::InvalidPath,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Format(_) => ErrorKind::Format,
            Error::Io(_) => ErrorKind::Io,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::UnsupportedDatatype { class, size } => {
                Error::UnsupportedType(format!("datatype class {class}, size {size}"))
            }
            FormatError::UnsupportedFilter(id) => {
                Error::UnsupportedType(format!("filter id {id}"))
            }
            other => Error::Format(other),
        }
    }
}

/// Paths in writer errors are format keys (no leading slash, root is
/// empty); they are shown in [`NodePath`] form.
fn display_key(key: String) -> String {
    NodePath::from_key(&key).to_string()
}

impl From<WriteError> for Error {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Io(io) => Error::DestinationWriteFailure(io),
            WriteError::DuplicatePath(p) => Error::DuplicatePath(display_key(p)),
            WriteError::NodeNotFound(p) => Error::NodeNotFound(display_key(p)),
            WriteError::ParentNotGroup(p) => Error::NotAGroup(display_key(p)),
            WriteError::DuplicateAttribute { path, name } => Error::DuplicateAttribute {
                path: display_key(path),
                name,
            },
            WriteError::InvalidName(p) => Error::InvalidPath(p),
            WriteError::InvalidChunks(msg) => Error::Format(FormatError::CorruptChunkIndex(msg)),
            WriteError::Filter(f) => Error::CodecFailure(f),
        }
    }
}

impl From<Hdf5Error> for Error {
    fn from(e: Hdf5Error) -> Self {
        match e {
            Hdf5Error::Unsupported(what) => Error::UnsupportedType(what),
            Hdf5Error::Io(io) => Error::DestinationWriteFailure(io),
            Hdf5Error::Filter(f) => Error::CodecFailure(f),
            Hdf5Error::DuplicatePath(p) => Error::DuplicatePath(display_key(p)),
            Hdf5Error::NodeNotFound(p) => Error::NodeNotFound(display_key(p)),
            Hdf5Error::ParentNotGroup(p) => Error::NotAGroup(display_key(p)),
            Hdf5Error::DuplicateAttribute { path, name } => Error::DuplicateAttribute {
                path: display_key(path),
                name,
            },
            other => Error::Format(FormatError::InvalidData(other.to_string())),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The single terminal error of a transcoding run: what failed, and at
/// which node.
#[derive(Debug, Error)]
#[error("{path}: {source}")]
pub struct TranscodeError {
    pub path: NodePath,
    #[source]
    pub source: Error,
}

impl TranscodeError {
    pub fn new(path: NodePath, source: Error) -> Self {
        Self { path, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
