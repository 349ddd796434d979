//! Streaming HDF5 writer.
//!
//! Element storage is written as soon as a dataset or attribute is
//! created. Object headers follow in [`Hdf5Writer::finish`], children
//! before parents, and the superblock goes in last at offset 0. Nodes are
//! always created after their parent, so writing them in reverse creation
//! order puts every child address in hand when its parent is encoded.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};

use hcf_filters::{deflate_compress, shuffle};

use crate::chunks::ChunkGrid;
use crate::cursor::Sizes;
use crate::dataspace::Dataspace;
use crate::datatype::{ByteOrder, Datatype};
use crate::error::Hdf5Error;
use crate::file::Elements;
use crate::filters::{Filter, FilterPipeline};
use crate::fixed_array;
use crate::global_heap::encode_strings;
use crate::layout::{ChunkIndex, Layout};
use crate::messages::{
    encode_attribute, encode_fill, encode_group_info, Link, LinkInfo, MSG_ATTRIBUTE,
    MSG_DATASPACE, MSG_DATATYPE, MSG_FILL, MSG_FILTER_PIPELINE, MSG_GROUP_INFO, MSG_LAYOUT,
    MSG_LINK, MSG_LINK_INFO,
};
use crate::object_header::encode_v2;
use crate::superblock::{Superblock, SUPERBLOCK_V3_SIZE};
use crate::UNDEF_ADDR;

/// Chunking and filters of a chunked dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedStorage {
    /// Requested chunk extent; clipped to the dataset extent.
    pub chunk: Vec<u64>,
    /// Deflate level, or `None` for no compression.
    pub deflate: Option<u32>,
    pub shuffle: bool,
}

/// How a dataset's elements are laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    Contiguous,
    Chunked(ChunkedStorage),
}

#[derive(Debug)]
enum Body {
    Group { children: Vec<(String, usize)> },
    Dataset { messages: Vec<(u8, Vec<u8>)> },
}

#[derive(Debug)]
struct Node {
    path: String,
    body: Body,
    /// Encoded attribute messages by name.
    attributes: Vec<(String, Vec<u8>)>,
}

/// Writes a new HDF5 file to `W`.
#[derive(Debug)]
pub struct Hdf5Writer<W> {
    out: W,
    pos: u64,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

fn split(path: &str) -> Result<(&str, &str), Hdf5Error> {
    match path.rsplit_once('/') {
        Some((parent, name)) if path.starts_with('/') && !name.is_empty() => {
            Ok((if parent.is_empty() { "/" } else { parent }, name))
        }
        _ => Err(Hdf5Error::NodeNotFound(path.to_string())),
    }
}

fn element_count(dims: &[u64]) -> Result<u64, Hdf5Error> {
    dims.iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Hdf5Error::TooLarge(format!("dataspace {dims:?}")))
}

fn check_datatype(datatype: &Datatype) -> Result<(), Hdf5Error> {
    if datatype.byte_order() == ByteOrder::Big {
        return Err(Hdf5Error::unsupported("writing big-endian elements"));
    }
    if let Datatype::FixedString { size: 0, .. } = datatype {
        return Err(Hdf5Error::unsupported("zero-width string"));
    }
    Ok(())
}

/// Filter one chunk.
fn encode_chunk(raw: Vec<u8>, element_size: usize, storage: &ChunkedStorage) -> Result<Vec<u8>, Hdf5Error> {
    let mut data = raw;
    if storage.shuffle && element_size > 1 {
        data = shuffle(&data, element_size)?;
    }
    if let Some(level) = storage.deflate {
        data = deflate_compress(&data, level)?;
    }
    Ok(data)
}

#[cfg(feature = "parallel")]
fn encode_chunks(
    grid: &ChunkGrid,
    raw: &[u8],
    per_dim: &[u64],
    count: u64,
    storage: &ChunkedStorage,
) -> Result<Vec<Vec<u8>>, Hdf5Error> {
    use rayon::prelude::*;

    (0..count)
        .into_par_iter()
        .map(|i| encode_chunk(grid.extract(raw, &grid.offsets_of(i, per_dim))?, grid.element_size, storage))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn encode_chunks(
    grid: &ChunkGrid,
    raw: &[u8],
    per_dim: &[u64],
    count: u64,
    storage: &ChunkedStorage,
) -> Result<Vec<Vec<u8>>, Hdf5Error> {
    (0..count)
        .map(|i| encode_chunk(grid.extract(raw, &grid.offsets_of(i, per_dim))?, grid.element_size, storage))
        .collect()
}

impl<W: Write + Seek> Hdf5Writer<W> {
    /// Start a file. The superblock space is reserved now and filled in by
    /// [`finish`](Self::finish).
    pub fn new(mut out: W) -> Result<Self, Hdf5Error> {
        out.write_all(&[0u8; SUPERBLOCK_V3_SIZE])?;
        Ok(Hdf5Writer {
            out,
            pos: SUPERBLOCK_V3_SIZE as u64,
            nodes: vec![Node {
                path: "/".to_string(),
                body: Body::Group {
                    children: Vec::new(),
                },
                attributes: Vec::new(),
            }],
            index: HashMap::from([("/".to_string(), 0)]),
        })
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Borrow the sink. Not a readable file before [`finish`](Self::finish).
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn write(&mut self, bytes: &[u8]) -> Result<u64, Hdf5Error> {
        let at = self.pos;
        self.out.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(at)
    }

    fn node(&self, path: &str) -> Result<usize, Hdf5Error> {
        self.index
            .get(path)
            .copied()
            .ok_or_else(|| Hdf5Error::NodeNotFound(path.to_string()))
    }

    /// Parent index and name of a node that may be created at `path`.
    fn vacancy<'p>(&self, path: &'p str) -> Result<(usize, &'p str), Hdf5Error> {
        let (parent, name) = split(path)?;
        if self.index.contains_key(path) {
            return Err(Hdf5Error::DuplicatePath(path.to_string()));
        }
        let parent = self.node(parent)?;
        match self.nodes[parent].body {
            Body::Group { .. } => Ok((parent, name)),
            Body::Dataset { .. } => Err(Hdf5Error::ParentNotGroup(path.to_string())),
        }
    }

    /// Register a new node under its parent group.
    fn add(&mut self, path: &str, body: Body) -> Result<(), Hdf5Error> {
        let (parent, name) = self.vacancy(path)?;
        let child = self.nodes.len();
        match &mut self.nodes[parent].body {
            Body::Group { children } => children.push((name.to_string(), child)),
            Body::Dataset { .. } => return Err(Hdf5Error::ParentNotGroup(path.to_string())),
        }
        self.nodes.push(Node {
            path: path.to_string(),
            body,
            attributes: Vec::new(),
        });
        self.index.insert(path.to_string(), child);
        Ok(())
    }

    pub fn create_group(&mut self, path: &str) -> Result<(), Hdf5Error> {
        self.add(
            path,
            Body::Group {
                children: Vec::new(),
            },
        )
    }

    /// File-form bytes of `count` elements. Variable-length strings go to
    /// the global heap first and come back as references.
    fn element_bytes<'v>(
        &mut self,
        what: &str,
        datatype: &Datatype,
        count: u64,
        value: &'v Elements,
    ) -> Result<Cow<'v, [u8]>, Hdf5Error> {
        match (datatype.is_var_string(), value) {
            (true, Elements::Strings(strings)) => {
                if strings.len() as u64 != count {
                    return Err(Hdf5Error::Mismatch(format!(
                        "{what}: {} strings for {count} elements",
                        strings.len()
                    )));
                }
                let refs: Vec<&[u8]> = strings.iter().map(Vec::as_slice).collect();
                let (heap, packed) = encode_strings(self.pos, &refs);
                if !heap.is_empty() {
                    self.write(&heap)?;
                }
                Ok(Cow::Owned(packed))
            }
            (false, Elements::Fixed(bytes)) => {
                let expected = count.checked_mul(datatype.size(Sizes::WIDE) as u64);
                if expected != Some(bytes.len() as u64) {
                    return Err(Hdf5Error::Mismatch(format!(
                        "{what}: {} bytes for {count} elements of {datatype:?}",
                        bytes.len()
                    )));
                }
                Ok(Cow::Borrowed(bytes))
            }
            _ => Err(Hdf5Error::Mismatch(format!(
                "{what}: value kind does not fit {datatype:?}"
            ))),
        }
    }

    /// Write a dataset's elements and register it. Returns the bytes its
    /// elements occupy in the file.
    pub fn create_dataset(
        &mut self,
        path: &str,
        datatype: Datatype,
        dims: &[u64],
        value: &Elements,
        storage: &Storage,
    ) -> Result<u64, Hdf5Error> {
        check_datatype(&datatype)?;
        self.vacancy(path)?;
        let count = element_count(dims)?;
        let raw = self.element_bytes(path, &datatype, count, value)?;
        let element_size = datatype.size(Sizes::WIDE);

        let mut messages = vec![
            (MSG_DATASPACE as u8, Dataspace::simple(dims).encode()),
            (MSG_DATATYPE as u8, datatype.encode()),
            (MSG_FILL as u8, encode_fill()),
        ];
        let stored = match storage {
            Storage::Chunked(chunked) if !dims.is_empty() && count > 0 => {
                if chunked.chunk.len() != dims.len() {
                    return Err(Hdf5Error::Mismatch(format!(
                        "{path}: chunk {:?} for dataspace {dims:?}",
                        chunked.chunk
                    )));
                }
                let chunk: Vec<u64> = chunked
                    .chunk
                    .iter()
                    .zip(dims)
                    .map(|(&c, &d)| c.clamp(1, d))
                    .collect();
                let grid = ChunkGrid::new(dims, &chunk, element_size)?;
                let chunk_bytes = grid.chunk_bytes()?;
                let element_size32 = u32::try_from(element_size)
                    .map_err(|_| Hdf5Error::TooLarge(format!("{path}: element size")))?;
                let per_dim = grid.chunks_per_dim(dims);
                let encoded = encode_chunks(&grid, &raw, &per_dim, per_dim.iter().product(), chunked)?;

                let mut entries = Vec::with_capacity(encoded.len());
                let mut stored = 0u64;
                for chunk_data in &encoded {
                    let at = self.write(chunk_data)?;
                    entries.push((at, chunk_data.len() as u64, 0u32));
                    stored += chunk_data.len() as u64;
                }

                let mut pipeline = FilterPipeline::default();
                if chunked.shuffle && element_size > 1 {
                    pipeline.filters.push(Filter::shuffle(element_size));
                }
                if let Some(level) = chunked.deflate {
                    pipeline.filters.push(Filter::deflate(level));
                }
                let filtered = !pipeline.is_empty();

                let layout = if let [(address, size, _)] = entries[..] {
                    let index = ChunkIndex::Single {
                        filtered: filtered.then_some((size, 0)),
                    };
                    Layout::encode_chunked(&chunk, element_size32, index, address)?
                } else {
                    let at = self.pos;
                    let index = fixed_array::encode(at, &entries, filtered, chunk_bytes);
                    self.write(&index)?;
                    Layout::encode_chunked(&chunk, element_size32, ChunkIndex::FixedArray, at)?
                };
                messages.push((MSG_LAYOUT as u8, layout));
                if filtered {
                    messages.push((MSG_FILTER_PIPELINE as u8, pipeline.encode()));
                }
                stored
            }
            _ => {
                // Scalars and empty datasets are stored contiguously.
                let (address, size) = if raw.is_empty() {
                    (UNDEF_ADDR, 0)
                } else {
                    (self.write(&raw)?, raw.len() as u64)
                };
                messages.push((MSG_LAYOUT as u8, Layout::encode_contiguous(address, size)));
                size
            }
        };
        self.add(path, Body::Dataset { messages })?;
        Ok(stored)
    }

    /// Attach an attribute to an existing node.
    pub fn set_attribute(
        &mut self,
        path: &str,
        name: &str,
        datatype: Datatype,
        dims: &[u64],
        value: &Elements,
    ) -> Result<(), Hdf5Error> {
        check_datatype(&datatype)?;
        let node = self.node(path)?;
        if self.nodes[node].attributes.iter().any(|(n, _)| n == name) {
            return Err(Hdf5Error::DuplicateAttribute {
                path: path.to_string(),
                name: name.to_string(),
            });
        }
        let count = element_count(dims)?;
        let what = format!("attribute {name:?} of {path}");
        let raw = self.element_bytes(&what, &datatype, count, value)?;
        let message = encode_attribute(name, &datatype, &Dataspace::simple(dims), &raw)?;
        if message.len() > usize::from(u16::MAX) {
            return Err(Hdf5Error::TooLarge(format!("{what} is {} bytes", message.len())));
        }
        self.nodes[node].attributes.push((name.to_string(), message));
        Ok(())
    }

    /// Write every object header and the superblock. Returns the sink and
    /// the file size.
    pub fn finish(mut self) -> Result<(W, u64), Hdf5Error> {
        let nodes = std::mem::take(&mut self.nodes);
        let mut addresses = vec![UNDEF_ADDR; nodes.len()];
        for (i, node) in nodes.into_iter().enumerate().rev() {
            let mut messages = match node.body {
                Body::Group { children } => {
                    let mut messages = vec![
                        (MSG_LINK_INFO as u8, LinkInfo::encode_compact()),
                        (MSG_GROUP_INFO as u8, encode_group_info()),
                    ];
                    for (name, child) in children {
                        messages.push((MSG_LINK as u8, Link::encode(&name, addresses[child])));
                    }
                    messages
                }
                Body::Dataset { messages } => messages,
            };
            messages.extend(
                node.attributes
                    .into_iter()
                    .map(|(_, message)| (MSG_ATTRIBUTE as u8, message)),
            );
            let header = encode_v2(&messages).map_err(|e| match e {
                Hdf5Error::TooLarge(m) => Hdf5Error::TooLarge(format!("{}: {m}", node.path)),
                other => other,
            })?;
            addresses[i] = self.write(&header)?;
        }

        let eof = self.pos;
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&Superblock::encode_v3(eof, addresses[0]))?;
        self.out.seek(SeekFrom::Start(eof))?;
        self.out.flush()?;
        Ok((self.out, eof))
    }
}
