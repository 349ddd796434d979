//! The node model: how the recompression core sees a source and a
//! destination container.

use std::fmt;

use crate::codec::CodecConfig;
use crate::error::Result;
use crate::path::NodePath;
use crate::types::{Array, ArrayData, Attribute, DType};

/// Opaque handle to a node inside a source container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Dataset { shape: Vec<u64>, dtype: DType },
}

impl NodeKind {
    pub fn is_group(&self) -> bool {
        matches!(self, NodeKind::Group)
    }
}

/// Read-only view of a container.
pub trait ReadContainer {
    /// The root group.
    fn root(&self) -> ObjectId;

    fn node_kind(&self, id: ObjectId) -> Result<NodeKind>;

    /// Children of a group in stored order.
    fn list_children(&self, id: ObjectId) -> Result<Vec<(String, ObjectId)>>;

    /// Attributes of any node in stored order.
    fn list_attributes(&self, id: ObjectId) -> Result<Vec<Attribute>>;

    /// The full logical payload of a dataset. Storage chunking is invisible
    /// here.
    fn read_payload(&self, id: ObjectId) -> Result<Array>;

    /// Size of the stored container in bytes.
    fn stored_size(&self) -> u64;

    /// Number of nodes including the root, if the container records it.
    fn object_count_hint(&self) -> Option<u64> {
        None
    }
}

/// Result of finalizing a destination.
#[derive(Debug)]
pub struct Finalized<O> {
    pub output: O,
    /// Final container size.
    pub bytes_written: u64,
}

/// Write-only builder for a container.
///
/// Nodes are created parent-first; attributes after their node. The root
/// group always exists.
pub trait WriteContainer {
    type Output;

    fn create_group(&mut self, path: &NodePath) -> Result<()>;

    /// Create a dataset and store `payload` through the codec. Returns the
    /// number of bytes stored for the payload.
    fn create_dataset(
        &mut self,
        path: &NodePath,
        shape: &[u64],
        dtype: DType,
        payload: &ArrayData,
        codec: &CodecConfig,
    ) -> Result<u64>;

    fn set_attribute(&mut self, path: &NodePath, name: &str, value: &Array) -> Result<()>;

    /// Complete the container. Consumes the handle, so it happens once.
    fn finalize(self) -> Result<Finalized<Self::Output>>
    where
        Self: Sized;
}
