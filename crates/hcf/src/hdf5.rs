//! HDF5 files behind the node model.
//!
//! [`Hdf5Source`] reads any file [`hcf_hdf5::Hdf5File`] can parse;
//! [`Hdf5Sink`] writes one through [`hcf_hdf5::Hdf5Writer`]. Object ids are
//! object header addresses.

use std::io::{Seek, Write};
use std::path::Path;

use hcf_format::FormatError;
use hcf_hdf5::{
    ByteOrder, CharSet, ChunkedStorage, Datatype, Elements, Hdf5File, Hdf5Writer, ObjectKind,
    Storage, StringPadding,
};
use hcf_io::{HcfRead, SourceData};

use crate::codec::{CodecAdapter, CodecConfig};
use crate::error::{Error, Result};
use crate::node::{Finalized, NodeKind, ObjectId, ReadContainer, WriteContainer};
use crate::path::NodePath;
use crate::types::{Array, ArrayData, Attribute, DType};
use crate::writer::{check_dtype, check_payload};

/// The node model's element type for an HDF5 datatype.
fn dtype_of(datatype: &Datatype) -> Result<DType> {
    Ok(match *datatype {
        Datatype::Integer { size: 1, signed: true, .. } => DType::I8,
        Datatype::Integer { size: 2, signed: true, .. } => DType::I16,
        Datatype::Integer { size: 4, signed: true, .. } => DType::I32,
        Datatype::Integer { size: 8, signed: true, .. } => DType::I64,
        Datatype::Integer { size: 1, signed: false, .. } => DType::U8,
        Datatype::Integer { size: 2, signed: false, .. } => DType::U16,
        Datatype::Integer { size: 4, signed: false, .. } => DType::U32,
        Datatype::Integer { size: 8, signed: false, .. } => DType::U64,
        Datatype::Float { size: 4, .. } => DType::F32,
        Datatype::Float { size: 8, .. } => DType::F64,
        Datatype::Bool => DType::Bool,
        Datatype::FixedString { size, .. } if size > 0 => DType::FixedString(size),
        Datatype::VarString { .. } => DType::VarString,
        other => return Err(Error::UnsupportedType(format!("{other:?}"))),
    })
}

/// Little-endian HDF5 datatype for `dtype`. Strings are written as UTF-8.
fn datatype_of(dtype: DType) -> Datatype {
    let int = |size, signed| Datatype::Integer {
        size,
        signed,
        order: ByteOrder::Little,
    };
    let float = |size| Datatype::Float {
        size,
        order: ByteOrder::Little,
    };
    match dtype {
        DType::I8 => int(1, true),
        DType::I16 => int(2, true),
        DType::I32 => int(4, true),
        DType::I64 => int(8, true),
        DType::U8 => int(1, false),
        DType::U16 => int(2, false),
        DType::U32 => int(4, false),
        DType::U64 => int(8, false),
        DType::F32 => float(4),
        DType::F64 => float(8),
        DType::Bool => Datatype::Bool,
        DType::FixedString(size) => Datatype::FixedString {
            size,
            padding: StringPadding::NullPad,
            charset: CharSet::Utf8,
        },
        DType::VarString => Datatype::VarString {
            charset: CharSet::Utf8,
        },
    }
}

fn array_of(dtype: DType, dims: Vec<u64>, value: Elements) -> Result<Array> {
    let data = match value {
        Elements::Fixed(raw) => {
            let count = crate::types::element_count(&dims)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| Error::UnsupportedType(format!("dataspace {dims:?}")))?;
            ArrayData::decode(dtype, &raw, count)?
        }
        Elements::Strings(strings) => ArrayData::VarString(
            strings
                .into_iter()
                .enumerate()
                .map(|(i, bytes)| {
                    String::from_utf8(bytes).map_err(|_| {
                        Error::Format(FormatError::InvalidData(format!(
                            "string {i} is not UTF-8"
                        )))
                    })
                })
                .collect::<Result<_>>()?,
        ),
    };
    Array::new(dims, data)
}

fn elements_of(data: &ArrayData) -> Elements {
    match data {
        ArrayData::VarString(strings) => {
            Elements::Strings(strings.iter().map(|s| s.as_bytes().to_vec()).collect())
        }
        other => Elements::Fixed(other.encode()),
    }
}

/// Absolute HDF5 path of a node; `/` for the root.
fn hdf5_path(path: &NodePath) -> String {
    format!("/{}", path.key())
}

/// An HDF5 file opened for reading.
pub struct Hdf5Source {
    file: Hdf5File<SourceData>,
}

impl Hdf5Source {
    /// Open a file by memory-mapping it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_data(SourceData::map_file(path)?)
    }

    /// Open a file by reading it entirely into memory.
    pub fn open_buffered<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_data(SourceData::read_file(path)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_data(SourceData::from(data))
    }

    pub fn from_data(data: SourceData) -> Result<Self> {
        Ok(Self {
            file: Hdf5File::open(data)?,
        })
    }

    pub fn is_mmap(&self) -> bool {
        self.file.data().is_mmap()
    }

    /// The underlying file, for storage details.
    pub fn file(&self) -> &Hdf5File<SourceData> {
        &self.file
    }
}

impl std::fmt::Debug for Hdf5Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdf5Source")
            .field("size", &self.stored_size())
            .field("superblock", &self.file.superblock().version)
            .finish()
    }
}

impl ReadContainer for Hdf5Source {
    fn root(&self) -> ObjectId {
        ObjectId(self.file.root())
    }

    fn node_kind(&self, id: ObjectId) -> Result<NodeKind> {
        match self.file.kind(id.0)? {
            ObjectKind::Group => Ok(NodeKind::Group),
            ObjectKind::Dataset => {
                let info = self.file.dataset(id.0)?;
                Ok(NodeKind::Dataset {
                    dtype: dtype_of(&info.datatype)?,
                    shape: info.dataspace.dims,
                })
            }
        }
    }

    fn list_children(&self, id: ObjectId) -> Result<Vec<(String, ObjectId)>> {
        if self.file.kind(id.0)? != ObjectKind::Group {
            return Err(Error::NotAGroup(format!("object {id}")));
        }
        Ok(self
            .file
            .children(id.0)?
            .into_iter()
            .map(|(name, address)| (name, ObjectId(address)))
            .collect())
    }

    fn list_attributes(&self, id: ObjectId) -> Result<Vec<Attribute>> {
        self.file
            .attributes(id.0)?
            .into_iter()
            .map(|a| {
                let dtype = dtype_of(&a.datatype)?;
                Ok(Attribute::new(a.name, array_of(dtype, a.dims, a.value)?))
            })
            .collect()
    }

    fn read_payload(&self, id: ObjectId) -> Result<Array> {
        if self.file.kind(id.0)? != ObjectKind::Dataset {
            return Err(Error::NotADataset(format!("object {id}")));
        }
        let info = self.file.dataset(id.0)?;
        let dtype = dtype_of(&info.datatype)?;
        array_of(dtype, info.dataspace.dims, self.file.read(id.0)?)
    }

    fn stored_size(&self) -> u64 {
        self.file.data().as_bytes().len() as u64
    }
}

/// Writes an HDF5 file into `W`.
///
/// Datasets are chunked the way the codec plans them for HCF output, so
/// both formats split a payload into the same row blocks.
#[derive(Debug)]
pub struct Hdf5Sink<W: Write + Seek> {
    inner: Hdf5Writer<W>,
}

impl<W: Write + Seek> Hdf5Sink<W> {
    pub fn new(sink: W) -> Result<Self> {
        Ok(Self {
            inner: Hdf5Writer::new(sink)?,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.inner.position()
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }
}

fn storage_for(codec: &CodecConfig, payload: &ArrayData, shape: &[u64]) -> Storage {
    let deflate = codec.level();
    if deflate.is_none() && !codec.chunking {
        return Storage::Contiguous;
    }
    Storage::Chunked(ChunkedStorage {
        chunk: CodecAdapter::new(codec).plan(payload, shape).chunk_dims(),
        deflate,
        shuffle: deflate.is_some() && codec.shuffle && payload.dtype().shuffle_width().is_some(),
    })
}

impl<W: Write + Seek> WriteContainer for Hdf5Sink<W> {
    type Output = W;

    fn create_group(&mut self, path: &NodePath) -> Result<()> {
        if path.is_root() {
            return Err(Error::DuplicatePath(path.to_string()));
        }
        Ok(self.inner.create_group(&hdf5_path(path))?)
    }

    fn create_dataset(
        &mut self,
        path: &NodePath,
        shape: &[u64],
        dtype: DType,
        payload: &ArrayData,
        codec: &CodecConfig,
    ) -> Result<u64> {
        check_payload(path, shape, dtype, payload)?;
        codec.validate()?;
        if path.is_root() {
            return Err(Error::DuplicatePath(path.to_string()));
        }
        let storage = storage_for(codec, payload, shape);
        Ok(self.inner.create_dataset(
            &hdf5_path(path),
            datatype_of(dtype),
            shape,
            &elements_of(payload),
            &storage,
        )?)
    }

    fn set_attribute(&mut self, path: &NodePath, name: &str, value: &Array) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidPath(format!("{path}: empty attribute name")));
        }
        check_dtype(path, value.dtype())?;
        Ok(self.inner.set_attribute(
            &hdf5_path(path),
            name,
            datatype_of(value.dtype()),
            value.shape(),
            &elements_of(value.data()),
        )?)
    }

    fn finalize(self) -> Result<Finalized<W>> {
        let (output, bytes_written) = self.inner.finish()?;
        Ok(Finalized {
            output,
            bytes_written,
        })
    }
}
