//! Reading API: File, Group and Dataset handles.
//!
//! [`File::open`] memory-maps the container, [`File::open_buffered`] reads it
//! into memory and [`File::from_bytes`] wraps an existing buffer. All three
//! implement [`ReadContainer`] the same way.

use hcf_format::attribute::AttributeMessage;
use hcf_format::chunked_read::read_raw_data;
use hcf_format::data_layout::{parse_chunk_index, DataLayout};
use hcf_format::dataspace::Dataspace;
use hcf_format::datatype::Datatype;
use hcf_format::filter_pipeline::FilterPipeline;
use hcf_format::link_message::{LinkInfo, LinkMessage};
use hcf_format::message_type::MessageType;
use hcf_format::object_header::ObjectHeader;
use hcf_format::superblock::Superblock;
use hcf_format::FormatError;
use hcf_io::{HcfRead, SourceData};

use crate::error::{Error, Result};
use crate::node::{NodeKind, ObjectId, ReadContainer};
use crate::path::NodePath;
use crate::types::{Array, ArrayData, Attribute, DType};

/// An open HCF container for reading.
pub struct File {
    data: SourceData,
    superblock: Superblock,
}

impl File {
    /// Open a container by memory-mapping it.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::from_data(SourceData::map_file(path)?)
    }

    /// Open a container by reading it entirely into memory.
    pub fn open_buffered<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::from_data(SourceData::read_file(path)?)
    }

    /// Open a container held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_data(SourceData::from(data))
    }

    /// Parse a container over an already opened backing.
    pub fn from_data(data: SourceData) -> Result<Self> {
        let superblock = Superblock::parse(data.as_bytes())?;
        Ok(Self { data, superblock })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Returns `true` when the file is backed by a memory map.
    pub fn is_mmap(&self) -> bool {
        self.data.is_mmap()
    }

    /// Handle to the root group.
    pub fn root_group(&self) -> Group<'_> {
        Group {
            file: self,
            id: ReadContainer::root(self),
            path: NodePath::root(),
        }
    }

    /// Resolve a `/`-separated path to a node handle.
    pub fn node(&self, path: &str) -> Result<Node<'_>> {
        let path = NodePath::parse(path)?;
        let id = self.resolve(&path)?;
        let header = self.parse_header(id)?;
        Ok(match header_kind(&header)? {
            HeaderKind::Group => Node::Group(Group { file: self, id, path }),
            HeaderKind::Dataset => Node::Dataset(Dataset {
                file: self,
                id,
                path,
                info: DatasetInfo::parse(&header)?,
            }),
        })
    }

    /// Resolve a path to a group handle.
    pub fn group(&self, path: &str) -> Result<Group<'_>> {
        match self.node(path)? {
            Node::Group(g) => Ok(g),
            Node::Dataset(d) => Err(Error::NotAGroup(d.path.to_string())),
        }
    }

    /// Resolve a path to a dataset handle.
    pub fn dataset(&self, path: &str) -> Result<Dataset<'_>> {
        match self.node(path)? {
            Node::Dataset(d) => Ok(d),
            Node::Group(g) => Err(Error::NotADataset(g.path.to_string())),
        }
    }

    fn resolve(&self, path: &NodePath) -> Result<ObjectId> {
        let mut id = ReadContainer::root(self);
        let mut walked = NodePath::root();
        for name in path.segments() {
            let header = self.parse_header(id)?;
            if !matches!(header_kind(&header)?, HeaderKind::Group) {
                return Err(Error::NotAGroup(walked.to_string()));
            }
            let link = links(&header)?
                .into_iter()
                .find(|l| &l.name == name)
                .ok_or_else(|| Error::NodeNotFound(path.to_string()))?;
            id = ObjectId(link.address);
            walked = walked.join(name)?;
        }
        Ok(id)
    }

    fn parse_header(&self, id: ObjectId) -> Result<ObjectHeader> {
        Ok(ObjectHeader::parse(self.data.as_bytes(), id.0)?)
    }

    fn read_array(&self, info: &DatasetInfo) -> Result<Array> {
        let dtype = DType::from_datatype(&info.datatype)?;
        let (total, count) = element_counts(&info.dataspace)?;
        let raw = read_raw_data(
            self.data.as_bytes(),
            &info.layout,
            info.pipeline.as_ref(),
            total,
            dtype.element_size(),
        )?;
        let data = ArrayData::decode(dtype, &raw, count)?;
        Array::new(info.dataspace.dimensions.clone(), data)
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("size", &self.data.as_bytes().len())
            .field("objects", &self.superblock.object_count)
            .field("mmap", &self.is_mmap())
            .finish()
    }
}

impl ReadContainer for File {
    fn root(&self) -> ObjectId {
        ObjectId(self.superblock.root_group_address)
    }

    fn node_kind(&self, id: ObjectId) -> Result<NodeKind> {
        let header = self.parse_header(id)?;
        match header_kind(&header)? {
            HeaderKind::Group => {
                links(&header)?;
                Ok(NodeKind::Group)
            }
            HeaderKind::Dataset => {
                let info = DatasetInfo::parse(&header)?;
                Ok(NodeKind::Dataset {
                    dtype: DType::from_datatype(&info.datatype)?,
                    shape: info.dataspace.dimensions,
                })
            }
        }
    }

    fn list_children(&self, id: ObjectId) -> Result<Vec<(String, ObjectId)>> {
        let header = self.parse_header(id)?;
        if !matches!(header_kind(&header)?, HeaderKind::Group) {
            return Err(Error::NotAGroup(format!("object {id}")));
        }
        Ok(links(&header)?
            .into_iter()
            .map(|l| (l.name, ObjectId(l.address)))
            .collect())
    }

    fn list_attributes(&self, id: ObjectId) -> Result<Vec<Attribute>> {
        let header = self.parse_header(id)?;
        attributes(&header)
    }

    fn read_payload(&self, id: ObjectId) -> Result<Array> {
        let header = self.parse_header(id)?;
        if !matches!(header_kind(&header)?, HeaderKind::Dataset) {
            return Err(Error::NotADataset(format!("object {id}")));
        }
        self.read_array(&DatasetInfo::parse(&header)?)
    }

    fn stored_size(&self) -> u64 {
        self.data.as_bytes().len() as u64
    }

    fn object_count_hint(&self) -> Option<u64> {
        Some(self.superblock.object_count)
    }
}

enum HeaderKind {
    Group,
    Dataset,
}

fn header_kind(header: &ObjectHeader) -> Result<HeaderKind> {
    match (
        header.has(MessageType::LinkInfo),
        header.has(MessageType::DataLayout),
    ) {
        (true, false) => Ok(HeaderKind::Group),
        (false, true) => Ok(HeaderKind::Dataset),
        _ => Err(FormatError::UnknownObjectKind(header.address).into()),
    }
}

fn links(header: &ObjectHeader) -> Result<Vec<LinkMessage>> {
    let info = LinkInfo::parse(header.require(MessageType::LinkInfo, "link info")?)?;
    let links = header
        .find_all(MessageType::Link)
        .map(|m| LinkMessage::parse(&m.data))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if links.len() as u64 != info.child_count {
        return Err(FormatError::LinkCountMismatch {
            declared: info.child_count,
            found: links.len() as u64,
        }
        .into());
    }
    Ok(links)
}

fn element_counts(dataspace: &Dataspace) -> Result<(u64, usize)> {
    let total = dataspace
        .num_elements()
        .ok_or_else(|| FormatError::InvalidData("element count overflows u64".into()))?;
    let count = usize::try_from(total)
        .map_err(|_| FormatError::InvalidData(format!("{total} elements do not fit in memory")))?;
    Ok((total, count))
}

fn attributes(header: &ObjectHeader) -> Result<Vec<Attribute>> {
    header
        .find_all(MessageType::Attribute)
        .map(|m| -> Result<Attribute> {
            let msg = AttributeMessage::parse(&m.data)?;
            let dtype = DType::from_datatype(&msg.datatype).map_err(|e| match e {
                Error::UnsupportedType(what) => {
                    Error::UnsupportedType(format!("attribute {:?}: {what}", msg.name))
                }
                other => other,
            })?;
            let (_, count) = element_counts(&msg.dataspace)?;
            let data = ArrayData::decode(dtype, &msg.raw_data, count)?;
            let value = Array::new(msg.dataspace.dimensions, data)?;
            Ok(Attribute {
                name: msg.name,
                value,
            })
        })
        .collect()
}

/// Messages describing a dataset.
#[derive(Debug, Clone)]
struct DatasetInfo {
    datatype: Datatype,
    dataspace: Dataspace,
    layout: DataLayout,
    pipeline: Option<FilterPipeline>,
}

impl DatasetInfo {
    fn parse(header: &ObjectHeader) -> Result<Self> {
        let datatype = Datatype::parse(header.require(MessageType::Datatype, "datatype")?)?;
        let dataspace = Dataspace::parse(header.require(MessageType::Dataspace, "dataspace")?)?;
        let layout = DataLayout::parse(header.require(MessageType::DataLayout, "data layout")?)?;
        let pipeline = header
            .find(MessageType::FilterPipeline)
            .map(|m| FilterPipeline::parse(&m.data))
            .transpose()?;
        Ok(Self {
            datatype,
            dataspace,
            layout,
            pipeline,
        })
    }
}

/// A group or dataset handle.
#[derive(Debug)]
pub enum Node<'f> {
    Group(Group<'f>),
    Dataset(Dataset<'f>),
}

/// A lightweight handle to a group.
pub struct Group<'f> {
    file: &'f File,
    id: ObjectId,
    path: NodePath,
}

impl<'f> Group<'f> {
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Names of the children in stored order.
    pub fn member_names(&self) -> Result<Vec<String>> {
        Ok(self
            .file
            .list_children(self.id)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Open a child group by name.
    pub fn group(&self, name: &str) -> Result<Group<'f>> {
        self.file.group(&self.path.join(name)?.to_string())
    }

    /// Open a child dataset by name.
    pub fn dataset(&self, name: &str) -> Result<Dataset<'f>> {
        self.file.dataset(&self.path.join(name)?.to_string())
    }

    pub fn attrs(&self) -> Result<Vec<Attribute>> {
        self.file.list_attributes(self.id)
    }
}

impl std::fmt::Debug for Group<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("path", &self.path).finish()
    }
}

/// How a dataset is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    /// Chunk extents, `None` for contiguous storage.
    pub chunk_dims: Option<Vec<u64>>,
    pub chunk_count: u64,
    pub deflate_level: Option<u32>,
    pub shuffle: bool,
    /// Bytes occupied by the stored payload.
    pub stored_bytes: u64,
}

/// A lightweight handle to a dataset.
pub struct Dataset<'f> {
    file: &'f File,
    id: ObjectId,
    path: NodePath,
    info: DatasetInfo,
}

impl<'f> Dataset<'f> {
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn shape(&self) -> &[u64] {
        &self.info.dataspace.dimensions
    }

    pub fn dtype(&self) -> Result<DType> {
        DType::from_datatype(&self.info.datatype)
    }

    /// Read the whole dataset.
    pub fn read(&self) -> Result<Array> {
        self.file.read_array(&self.info)
    }

    /// Read an `f64` dataset as a flat vector.
    pub fn read_f64(&self) -> Result<Vec<f64>> {
        match self.read()?.into_data() {
            ArrayData::F64(v) => Ok(v),
            other => Err(Error::UnsupportedType(format!(
                "{} read as f64",
                other.dtype()
            ))),
        }
    }

    /// Read a variable-length string dataset.
    pub fn read_strings(&self) -> Result<Vec<String>> {
        match self.read()?.into_data() {
            ArrayData::VarString(v) => Ok(v),
            other => Err(Error::UnsupportedType(format!(
                "{} read as strings",
                other.dtype()
            ))),
        }
    }

    pub fn attrs(&self) -> Result<Vec<Attribute>> {
        self.file.list_attributes(self.id)
    }

    /// Layout and filters of the stored payload.
    pub fn storage(&self) -> Result<StorageInfo> {
        let pipeline = self.info.pipeline.clone().unwrap_or_default();
        let (chunk_dims, chunk_count, stored_bytes) = match &self.info.layout {
            DataLayout::Contiguous { size, .. } => (None, 0, *size),
            DataLayout::Chunked {
                chunk_dims,
                index_address,
                chunk_count,
            } => {
                let entries = parse_chunk_index(self.file.as_bytes(), *index_address, *chunk_count)?;
                let stored = entries.iter().map(|e| e.stored_size).sum();
                (Some(chunk_dims.clone()), *chunk_count, stored)
            }
        };
        Ok(StorageInfo {
            chunk_dims,
            chunk_count,
            deflate_level: pipeline.deflate_level(),
            shuffle: pipeline.has_shuffle(),
            stored_bytes,
        })
    }
}

impl std::fmt::Debug for Dataset<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("shape", &self.info.dataspace.dimensions)
            .field("datatype", &self.info.datatype)
            .finish()
    }
}
