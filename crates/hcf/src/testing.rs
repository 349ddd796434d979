//! In-memory `ReadContainer` for unit tests, able to express hierarchies
//! the HCF writer refuses to produce.

use std::collections::HashMap;

use hcf_format::FormatError;

use crate::error::{Error, Result};
use crate::node::{NodeKind, ObjectId, ReadContainer};
use crate::types::{element_count, Array, ArrayData, Attribute, DType};

#[derive(Debug)]
struct MockNode {
    kind: NodeKind,
    children: Vec<(String, u64)>,
    attributes: Vec<Attribute>,
    payload: Option<Array>,
    unsupported: Option<String>,
    corrupt_payload: bool,
}

#[derive(Debug)]
pub(crate) struct MockContainer {
    nodes: HashMap<u64, MockNode>,
    next: u64,
}

impl MockContainer {
    /// A container with an empty root group (id 0).
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(0, MockNode::new(NodeKind::Group, None));
        Self { nodes, next: 1 }
    }

    fn add(&mut self, parent: u64, name: &str, node: MockNode) -> u64 {
        let id = self.next;
        self.next += 1;
        self.nodes.insert(id, node);
        self.link(parent, name, id);
        id
    }

    pub fn group(&mut self, parent: u64, name: &str) -> u64 {
        self.add(parent, name, MockNode::new(NodeKind::Group, None))
    }

    /// A dataset filled with zero bytes (empty strings for `VarString`).
    pub fn dataset(&mut self, parent: u64, name: &str, shape: Vec<u64>, dtype: DType) -> u64 {
        let n = element_count(&shape).unwrap_or(0) as usize;
        let raw = vec![0u8; n * dtype.element_size().unwrap_or(4)];
        let data = ArrayData::decode(dtype, &raw, n).unwrap();
        self.dataset_with(parent, name, Array::new(shape, data).unwrap())
    }

    pub fn dataset_with(&mut self, parent: u64, name: &str, value: Array) -> u64 {
        let kind = NodeKind::Dataset {
            shape: value.shape().to_vec(),
            dtype: value.dtype(),
        };
        self.add(parent, name, MockNode::new(kind, Some(value)))
    }

    /// Link `target` under `parent` without any checks.
    pub fn link(&mut self, parent: u64, name: &str, target: u64) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push((name.to_string(), target));
        }
    }

    pub fn attr(&mut self, id: u64, attribute: Attribute) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.attributes.push(attribute);
        }
    }

    /// Make `node_kind` fail with `UnsupportedType`.
    pub fn unsupported(&mut self, id: u64, what: &str) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.unsupported = Some(what.to_string());
        }
    }

    /// Make `read_payload` fail with a format error.
    pub fn corrupt_payload(&mut self, id: u64) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.corrupt_payload = true;
        }
    }

    fn get(&self, id: ObjectId) -> Result<&MockNode> {
        self.nodes
            .get(&id.0)
            .ok_or(Error::Format(FormatError::InvalidObjectHeaderSignature(id.0)))
    }
}

impl MockNode {
    fn new(kind: NodeKind, payload: Option<Array>) -> Self {
        Self {
            kind,
            children: Vec::new(),
            attributes: Vec::new(),
            payload,
            unsupported: None,
            corrupt_payload: false,
        }
    }
}

impl ReadContainer for MockContainer {
    fn root(&self) -> ObjectId {
        ObjectId(0)
    }

    fn node_kind(&self, id: ObjectId) -> Result<NodeKind> {
        let node = self.get(id)?;
        if let Some(what) = &node.unsupported {
            return Err(Error::UnsupportedType(what.clone()));
        }
        Ok(node.kind.clone())
    }

    fn list_children(&self, id: ObjectId) -> Result<Vec<(String, ObjectId)>> {
        Ok(self
            .get(id)?
            .children
            .iter()
            .map(|(name, child)| (name.clone(), ObjectId(*child)))
            .collect())
    }

    fn list_attributes(&self, id: ObjectId) -> Result<Vec<Attribute>> {
        Ok(self.get(id)?.attributes.clone())
    }

    fn read_payload(&self, id: ObjectId) -> Result<Array> {
        let node = self.get(id)?;
        if node.corrupt_payload {
            return Err(Error::Format(FormatError::FilterFailed("corrupt chunk".into())));
        }
        node.payload
            .clone()
            .ok_or_else(|| Error::NotADataset(format!("object {id}")))
    }

    fn stored_size(&self) -> u64 {
        self.nodes.len() as u64 * 64
    }

    fn object_count_hint(&self) -> Option<u64> {
        Some(self.nodes.len() as u64)
    }
}
