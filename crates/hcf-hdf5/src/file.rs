//! Read access to a whole HDF5 file, addressed by object header address.

use crate::btree_v1;
use crate::btree_v2;
use crate::chunks::{self, ChunkGrid, ChunkRecord, Decoder};
use crate::cursor::{Cursor, FileView};
use crate::dataspace::Dataspace;
use crate::datatype::{swap_in_place, ByteOrder, Datatype};
use crate::error::Hdf5Error;
use crate::extensible_array;
use crate::filters::FilterPipeline;
use crate::fixed_array;
use crate::fractal_heap::FractalHeap;
use crate::global_heap::GlobalHeap;
use crate::layout::{ChunkIndex, Layout};
use crate::local_heap::LocalHeap;
use crate::messages::{
    parse_fill, AttributeInfo, Link, LinkInfo, RawAttribute, SymbolTable, MSG_ATTRIBUTE,
    MSG_ATTRIBUTE_INFO, MSG_DATASPACE, MSG_DATATYPE, MSG_FILL, MSG_FILL_OLD, MSG_FILTER_PIPELINE,
    MSG_LAYOUT, MSG_LINK, MSG_LINK_INFO, MSG_SYMBOL_TABLE,
};
use crate::object_header::{ObjectHeader, FLAG_SHARED};
use crate::superblock::Superblock;
use crate::UNDEF_ADDR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Group,
    Dataset,
}

/// Element values in little-endian memory form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elements {
    /// Packed fixed-size elements.
    Fixed(Vec<u8>),
    /// One byte string per element of a variable-length string type.
    Strings(Vec<Vec<u8>>),
}

/// Shape, type and storage options of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    /// Chunk extent, for chunked storage.
    pub chunk: Option<Vec<u64>>,
    /// Filter ids in application order.
    pub filters: Vec<u16>,
}

/// Bytes a dataset occupies on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageSummary {
    pub stored_bytes: u64,
    pub chunks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub datatype: Datatype,
    pub dims: Vec<u64>,
    pub value: Elements,
}

/// Everything a dataset read needs from its header.
struct DatasetHeader {
    datatype: Datatype,
    dataspace: Dataspace,
    layout: Layout,
    pipeline: FilterPipeline,
    fill: Option<Vec<u8>>,
}

/// An HDF5 file held in memory or mapped.
#[derive(Debug)]
pub struct Hdf5File<D> {
    data: D,
    superblock: Superblock,
}

impl<D: AsRef<[u8]>> Hdf5File<D> {
    pub fn open(data: D) -> Result<Self, Hdf5Error> {
        let superblock = Superblock::parse(data.as_ref())?;
        Ok(Hdf5File { data, superblock })
    }

    /// The bytes the file was opened over.
    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Object header address of the root group.
    pub fn root(&self) -> u64 {
        self.superblock.root_address
    }

    fn view(&self) -> FileView<'_> {
        FileView::new(
            self.data.as_ref(),
            self.superblock.base_address,
            self.superblock.sizes,
        )
    }

    fn header(&self, address: u64) -> Result<ObjectHeader<'_>, Hdf5Error> {
        let view = self.view();
        ObjectHeader::parse(view.data, view.pos(address)?, view.base, view.sizes)
    }

    pub fn kind(&self, address: u64) -> Result<ObjectKind, Hdf5Error> {
        kind_of(&self.header(address)?)
    }

    /// Hard links of a group as (name, object address), sorted by name.
    pub fn children(&self, address: u64) -> Result<Vec<(String, u64)>, Hdf5Error> {
        let header = self.header(address)?;
        if kind_of(&header)? != ObjectKind::Group {
            return Err(Hdf5Error::corrupt(format!(
                "object at {address:#x} is not a group"
            )));
        }
        let view = self.view();
        let sizes = view.sizes;
        let mut links = Vec::new();

        if let Some(msg) = header.find(MSG_SYMBOL_TABLE) {
            let table = SymbolTable::parse(msg.body, sizes)?;
            let names = LocalHeap::open(&view, table.heap_address)?;
            for node in btree_v1::group_nodes(&view, table.btree_address)? {
                let mut c = view.at(node)?;
                c.magic(b"SNOD", "symbol table node")?;
                c.skip(2)?; // version, reserved
                let count = c.u16()?;
                for _ in 0..count {
                    let name = names.name(c.uint(sizes.offset as usize)?)?;
                    let object = c.address()?;
                    c.skip(24)?; // cache type, reserved, scratch pad
                    links.push((name, object));
                }
            }
        }
        for msg in header.all(MSG_LINK) {
            let link = Link::parse(msg.body, sizes)?;
            links.push((link.name, link.address));
        }
        if let Some(msg) = header.find(MSG_LINK_INFO) {
            let info = LinkInfo::parse(msg.body, sizes)?;
            if info.is_dense() {
                let heap = FractalHeap::open(&view, info.heap_address)?;
                for record in btree_v2::records(&view, info.name_index_address, btree_v2::LINK_NAME)? {
                    // name hash, then the heap id
                    let id = record
                        .get(4..4 + heap.id_len())
                        .ok_or_else(|| Hdf5Error::corrupt("link name record too short"))?;
                    let link = Link::parse(heap.object(&view, id)?, sizes)?;
                    links.push((link.name, link.address));
                }
            }
        }

        links.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(pair) = links.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(Hdf5Error::corrupt(format!(
                "group at {address:#x} links {:?} twice",
                pair[0].0
            )));
        }
        Ok(links)
    }

    /// Attributes of an object with their values resolved.
    pub fn attributes(&self, address: u64) -> Result<Vec<Attribute>, Hdf5Error> {
        let header = self.header(address)?;
        let view = self.view();
        let sizes = view.sizes;
        let mut raw = Vec::new();
        for msg in header.all(MSG_ATTRIBUTE) {
            if msg.flags & FLAG_SHARED != 0 {
                return Err(Hdf5Error::unsupported("shared attribute message"));
            }
            raw.push(RawAttribute::parse(msg.body, sizes)?);
        }

        if let Some(msg) = header.find(MSG_ATTRIBUTE_INFO) {
            let info = AttributeInfo::parse(msg.body, sizes)?;
            if info.heap_address != UNDEF_ADDR {
                let heap = FractalHeap::open(&view, info.heap_address)?;
                let by_order = info.order_index_address.filter(|&a| a != UNDEF_ADDR);
                let records = match by_order {
                    Some(index) => btree_v2::records(&view, index, btree_v2::ATTRIBUTE_ORDER)?,
                    None => btree_v2::records(
                        &view,
                        info.name_index_address,
                        btree_v2::ATTRIBUTE_NAME,
                    )?,
                };
                let mut dense = Vec::with_capacity(records.len());
                for record in records {
                    // heap id (8 bytes), message flags, creation order, [hash]
                    let mut c = Cursor::new(record, 0, sizes);
                    let id = c.bytes(8)?;
                    if c.u8()? & FLAG_SHARED != 0 {
                        return Err(Hdf5Error::unsupported("shared attribute message"));
                    }
                    dense.push(RawAttribute::parse(heap.object(&view, id)?, sizes)?);
                }
                if by_order.is_none() {
                    dense.sort_by(|a, b| a.name.cmp(&b.name));
                }
                raw.extend(dense);
            }
        }

        let mut heap = GlobalHeap::new(view);
        raw.into_iter()
            .map(|a| {
                let value = elements(&mut heap, &a.datatype, a.value.to_vec())?;
                Ok(Attribute {
                    name: a.name,
                    datatype: a.datatype,
                    dims: a.dataspace.dims,
                    value,
                })
            })
            .collect()
    }

    fn dataset_header(&self, address: u64) -> Result<DatasetHeader, Hdf5Error> {
        let header = self.header(address)?;
        let sizes = self.superblock.sizes;
        let required = |kind: u16, what: &str| {
            header
                .find(kind)
                .ok_or_else(|| Hdf5Error::corrupt(format!("dataset at {address:#x} has no {what}")))
        };
        let datatype = required(MSG_DATATYPE, "datatype")?;
        if datatype.flags & FLAG_SHARED != 0 {
            return Err(Hdf5Error::unsupported("dataset with a committed datatype"));
        }
        let datatype = Datatype::parse(datatype.body, sizes)?;
        let dataspace = Dataspace::parse(required(MSG_DATASPACE, "dataspace")?.body, sizes)?;
        let layout = Layout::parse(required(MSG_LAYOUT, "layout")?.body, sizes)?;
        let pipeline = match header.find(MSG_FILTER_PIPELINE) {
            Some(msg) => FilterPipeline::parse(msg.body, sizes)?,
            None => FilterPipeline::default(),
        };
        let fill = match header.find(MSG_FILL).or_else(|| header.find(MSG_FILL_OLD)) {
            Some(msg) => parse_fill(msg.kind, msg.body, sizes)?,
            None => None,
        };
        // A fill value only applies when it matches the element exactly.
        let fill = fill.filter(|f| !datatype.is_var_string() && f.len() == datatype.size(sizes));
        Ok(DatasetHeader {
            datatype,
            dataspace,
            layout,
            pipeline,
            fill,
        })
    }

    pub fn dataset(&self, address: u64) -> Result<DatasetInfo, Hdf5Error> {
        let h = self.dataset_header(address)?;
        let chunk = match &h.layout {
            Layout::Chunked { dims, .. } => Some(dims.clone()),
            _ => None,
        };
        Ok(DatasetInfo {
            datatype: h.datatype,
            dataspace: h.dataspace,
            chunk,
            filters: h.pipeline.filters.iter().map(|f| f.id).collect(),
        })
    }

    fn chunk_grid(&self, h: &DatasetHeader) -> Result<Option<(ChunkGrid, Vec<ChunkRecord>)>, Hdf5Error> {
        let Layout::Chunked {
            dims,
            element_size,
            index,
            address,
            ..
        } = &h.layout
        else {
            return Ok(None);
        };
        let view = self.view();
        let elem = h.datatype.size(view.sizes);
        if *element_size as usize != elem {
            return Err(Hdf5Error::corrupt(format!(
                "chunk element size {element_size} for {elem}-byte elements"
            )));
        }
        let grid = ChunkGrid::new(&h.dataspace.dims, dims, elem)?;
        if *address == UNDEF_ADDR {
            return Ok(Some((grid, Vec::new())));
        }
        let filtered = !h.pipeline.is_empty();
        let max_dims = h.dataspace.max_extent();
        let records = match *index {
            ChunkIndex::BTreeV1 => btree_v1::chunk_records(&view, *address, dims.len())?,
            ChunkIndex::Single { filtered: stored } => {
                let (size, mask) = stored.unwrap_or((grid.chunk_bytes()? as u64, 0));
                vec![ChunkRecord {
                    offsets: vec![0; dims.len()],
                    address: *address,
                    size,
                    mask,
                }]
            }
            ChunkIndex::Implicit => chunks::implicit_records(&grid, *address)?,
            ChunkIndex::FixedArray => {
                fixed_array::chunk_records(&view, *address, &grid, max_dims, filtered)?
            }
            ChunkIndex::ExtensibleArray => {
                let unlimited = h
                    .dataspace
                    .unlimited_dim()
                    .ok_or_else(|| Hdf5Error::corrupt("extensible array without an unlimited dimension"))?;
                extensible_array::chunk_records(
                    &view, *address, &grid, max_dims, unlimited, filtered,
                )?
            }
            ChunkIndex::BTreeV2 => btree_v2::chunk_records(&view, *address, &grid, filtered)?,
        };
        Ok(Some((grid, records)))
    }

    /// On-disk footprint of a dataset's elements.
    pub fn storage(&self, address: u64) -> Result<StorageSummary, Hdf5Error> {
        let h = self.dataset_header(address)?;
        if let Some((_, records)) = self.chunk_grid(&h)? {
            return Ok(StorageSummary {
                stored_bytes: records.iter().map(|r| r.size).sum(),
                chunks: records.len() as u64,
            });
        }
        Ok(match &h.layout {
            Layout::Compact(bytes) => StorageSummary {
                stored_bytes: bytes.len() as u64,
                chunks: 0,
            },
            Layout::Contiguous { address, size } if *address != UNDEF_ADDR => StorageSummary {
                stored_bytes: *size,
                chunks: 0,
            },
            _ => StorageSummary::default(),
        })
    }

    /// All elements of a dataset.
    pub fn read(&self, address: u64) -> Result<Elements, Hdf5Error> {
        let h = self.dataset_header(address)?;
        let view = self.view();
        let elem = h.datatype.size(view.sizes);
        let total = h
            .dataspace
            .element_count()
            .and_then(|n| n.checked_mul(elem as u64))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Hdf5Error::corrupt(format!("dataset at {address:#x} is too large")))?;
        let fill = h.fill.as_deref();

        let raw = match self.chunk_grid(&h)? {
            Some((grid, records)) => {
                let decoder = Decoder {
                    pipeline: &h.pipeline,
                    layout_flags: match h.layout {
                        Layout::Chunked { flags, .. } => flags,
                        _ => 0,
                    },
                };
                chunks::assemble(&view, &grid, records, decoder, fill)?
            }
            None => match &h.layout {
                Layout::Compact(bytes) => bytes
                    .get(..total)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| Hdf5Error::corrupt("compact data shorter than its dataspace"))?,
                Layout::Contiguous { address, size } => {
                    if *address == UNDEF_ADDR {
                        chunks::allocate(total, fill)?
                    } else if *size < total as u64 {
                        return Err(Hdf5Error::corrupt(format!(
                            "contiguous storage of {size} bytes for {total}"
                        )));
                    } else {
                        view.bytes(*address, total)?.to_vec()
                    }
                }
                Layout::Chunked { .. } => {
                    return Err(Hdf5Error::corrupt("chunked layout without a grid"))
                }
            },
        };
        let mut heap = GlobalHeap::new(view);
        elements(&mut heap, &h.datatype, raw)
    }
}

fn kind_of(header: &ObjectHeader<'_>) -> Result<ObjectKind, Hdf5Error> {
    if header.has(MSG_LAYOUT) {
        Ok(ObjectKind::Dataset)
    } else if header.has(MSG_DATATYPE) {
        Err(Hdf5Error::unsupported("committed datatype"))
    } else {
        Ok(ObjectKind::Group)
    }
}

/// File-form element bytes to [`Elements`].
fn elements(heap: &mut GlobalHeap<'_>, datatype: &Datatype, mut raw: Vec<u8>) -> Result<Elements, Hdf5Error> {
    if datatype.is_var_string() {
        return Ok(Elements::Strings(heap.strings(&raw)?));
    }
    if datatype.byte_order() == ByteOrder::Big {
        swap_in_place(&mut raw, datatype.size(Default::default()));
    }
    Ok(Elements::Fixed(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{ChunkedStorage, Hdf5Writer, Storage};
    use std::io::Cursor as IoCursor;

    fn i32s(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn int32() -> Datatype {
        Datatype::Integer {
            size: 4,
            signed: true,
            order: ByteOrder::Little,
        }
    }

    fn sample() -> Vec<u8> {
        let mut w = Hdf5Writer::new(IoCursor::new(Vec::new())).unwrap();
        w.create_group("/b").unwrap();
        w.create_group("/a").unwrap();
        let values: Vec<i32> = (0..100).collect();
        w.create_dataset(
            "/a/x",
            int32(),
            &[10, 10],
            &Elements::Fixed(i32s(&values)),
            &Storage::Chunked(ChunkedStorage {
                chunk: vec![4, 4],
                deflate: Some(6),
                shuffle: true,
            }),
        )
        .unwrap();
        w.set_attribute("/a", "count", int32(), &[], &Elements::Fixed(i32s(&[100])))
            .unwrap();
        let (cursor, _) = w.finish().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn walks_what_the_writer_wrote() {
        let file = Hdf5File::open(sample()).unwrap();
        let root = file.root();
        assert_eq!(file.kind(root).unwrap(), ObjectKind::Group);
        let children = file.children(root).unwrap();
        let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let a = children[0].1;
        let attrs = file.attributes(a).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "count");
        assert_eq!(attrs[0].value, Elements::Fixed(i32s(&[100])));

        let (_, x) = file.children(a).unwrap().remove(0);
        assert_eq!(file.kind(x).unwrap(), ObjectKind::Dataset);
        let info = file.dataset(x).unwrap();
        assert_eq!(info.dataspace.dims, vec![10, 10]);
        assert_eq!(info.chunk, Some(vec![4, 4]));
        let values: Vec<i32> = (0..100).collect();
        assert_eq!(file.read(x).unwrap(), Elements::Fixed(i32s(&values)));
        let storage = file.storage(x).unwrap();
        assert_eq!(storage.chunks, 9);
        assert!(storage.stored_bytes > 0);
    }

    #[test]
    fn children_of_a_dataset_is_an_error() {
        let file = Hdf5File::open(sample()).unwrap();
        let a = file.children(file.root()).unwrap()[0].1;
        let x = file.children(a).unwrap()[0].1;
        assert!(file.children(x).is_err());
        assert!(file.read(a).is_err());
    }

    #[test]
    fn not_hdf5() {
        assert!(matches!(
            Hdf5File::open(vec![0u8; 64]),
            Err(Hdf5Error::SignatureNotFound)
        ));
    }
}
