//! Version 2 B-trees: dense link and attribute indexes, and the chunk
//! index of datasets with more than one unlimited dimension.

use crate::checksum::verify;
use crate::chunks::{chunk_size_len, ChunkGrid, ChunkRecord};
use crate::cursor::{bytes_for, Cursor, FileView};
use crate::error::Hdf5Error;

/// Links indexed by name hash.
pub const LINK_NAME: u8 = 5;
/// Links indexed by creation order.
pub const LINK_ORDER: u8 = 6;
/// Attributes indexed by name hash.
pub const ATTRIBUTE_NAME: u8 = 8;
/// Attributes indexed by creation order.
pub const ATTRIBUTE_ORDER: u8 = 9;
/// Unfiltered dataset chunks.
pub const CHUNK_PLAIN: u8 = 10;
/// Filtered dataset chunks.
pub const CHUNK_FILTERED: u8 = 11;

/// Signature, version, type and checksum of every node.
const NODE_PREFIX: u64 = 10;
/// Deepest tree accepted.
const MAX_DEPTH: u16 = 32;

#[derive(Debug, Clone)]
struct Tree {
    kind: u8,
    record_size: usize,
    depth: u16,
    root: u64,
    root_nrec: u64,
    /// Width of a child's record count, the same at every level.
    nrec_width: usize,
    /// Width of a child's total record count, per level (unused at 0).
    total_width: Vec<usize>,
}

impl Tree {
    fn read(view: &FileView<'_>, address: u64, kind: u8) -> Result<Self, Hdf5Error> {
        let start = view.pos(address)?;
        let mut c = Cursor::new(view.data, start, view.sizes);
        c.magic(b"BTHD", "v2 B-tree header")?;
        let version = c.u8()?;
        if version != 0 {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "v2 B-tree header",
                version,
            });
        }
        let tree_kind = c.u8()?;
        if tree_kind != kind {
            return Err(Hdf5Error::corrupt(format!(
                "v2 B-tree of type {tree_kind}, expected {kind}"
            )));
        }
        let node_size = u64::from(c.u32()?);
        let record_size = c.u16()? as usize;
        let depth = c.u16()?;
        c.skip(2)?; // split and merge percentages
        let root = c.address()?;
        let root_nrec = u64::from(c.u16()?);
        c.length()?; // total records
        verify(view.data, start, c.position() - start, "v2 B-tree header")?;

        if record_size == 0 || depth > MAX_DEPTH || node_size <= NODE_PREFIX {
            return Err(Hdf5Error::corrupt("v2 B-tree parameters"));
        }

        let offset = u64::from(view.sizes.offset);
        let rec = record_size as u64;
        let leaf_max = (node_size - NODE_PREFIX) / rec;
        let nrec_width = bytes_for(leaf_max) as usize;
        let mut cum_max = vec![leaf_max];
        let mut total_width = vec![0usize];
        for level in 1..=usize::from(depth) {
            let pointer = offset
                + nrec_width as u64
                + if level > 1 {
                    total_width[level - 1] as u64
                } else {
                    0
                };
            let max = node_size
                .checked_sub(NODE_PREFIX + pointer)
                .map(|room| room / (rec + pointer))
                .ok_or_else(|| Hdf5Error::corrupt("v2 B-tree node size"))?;
            let cum = (max + 1)
                .saturating_mul(cum_max[level - 1])
                .saturating_add(max);
            cum_max.push(cum);
            total_width.push(bytes_for(cum) as usize);
        }
        Ok(Tree {
            kind,
            record_size,
            depth,
            root,
            root_nrec,
            nrec_width,
            total_width,
        })
    }

    fn visit<'a>(
        &self,
        view: &FileView<'a>,
        address: u64,
        nrec: u64,
        level: u16,
        out: &mut Vec<&'a [u8]>,
    ) -> Result<(), Hdf5Error> {
        let start = view.pos(address)?;
        let mut c = Cursor::new(view.data, start, view.sizes);
        let (magic, what): (&[u8; 4], _) = if level == 0 {
            (b"BTLF", "v2 B-tree leaf")
        } else {
            (b"BTIN", "v2 B-tree internal node")
        };
        c.magic(magic, what)?;
        c.u8()?; // version
        let kind = c.u8()?;
        if kind != self.kind {
            return Err(Hdf5Error::corrupt(format!("{what} of type {kind}")));
        }
        let nrec = usize::try_from(nrec).map_err(|_| Hdf5Error::corrupt("record count"))?;
        let records = (0..nrec)
            .map(|_| c.bytes(self.record_size))
            .collect::<Result<Vec<_>, _>>()?;
        if level == 0 {
            verify(view.data, start, c.position() - start, what)?;
            out.extend(records);
            return Ok(());
        }

        let mut children = Vec::with_capacity(nrec + 1);
        for _ in 0..=nrec {
            let child = c.address()?;
            let child_nrec = c.uint(self.nrec_width)?;
            if level > 1 {
                c.uint(self.total_width[usize::from(level) - 1])?;
            }
            children.push((child, child_nrec));
        }
        verify(view.data, start, c.position() - start, what)?;
        for (i, (child, child_nrec)) in children.into_iter().enumerate() {
            self.visit(view, child, child_nrec, level - 1, out)?;
            if let Some(&record) = records.get(i) {
                out.push(record);
            }
        }
        Ok(())
    }
}

/// Every record of the tree at `address`, in key order. `kind` is the
/// expected tree type.
pub fn records<'a>(
    view: &FileView<'a>,
    address: u64,
    kind: u8,
) -> Result<Vec<&'a [u8]>, Hdf5Error> {
    let tree = Tree::read(view, address, kind)?;
    let mut out = Vec::new();
    if tree.root != crate::UNDEF_ADDR && tree.root_nrec > 0 {
        tree.visit(view, tree.root, tree.root_nrec, tree.depth, &mut out)?;
    }
    Ok(out)
}

/// Chunks of a dataset indexed by a v2 B-tree of type 10 or 11.
pub fn chunk_records(
    view: &FileView<'_>,
    address: u64,
    grid: &ChunkGrid,
    filtered: bool,
) -> Result<Vec<ChunkRecord>, Hdf5Error> {
    let kind = if filtered { CHUNK_FILTERED } else { CHUNK_PLAIN };
    let chunk_bytes = grid.chunk_bytes()?;
    let size_len = chunk_size_len(chunk_bytes);
    let rank = grid.chunk.len();
    records(view, address, kind)?
        .into_iter()
        .map(|rec| {
            let mut c = Cursor::new(rec, 0, view.sizes);
            let address = c.address()?;
            let (size, mask) = if filtered {
                (c.uint(size_len)?, c.u32()?)
            } else {
                (chunk_bytes as u64, 0)
            };
            let offsets = (0..rank)
                .map(|d| {
                    c.u64()?
                        .checked_mul(grid.chunk[d])
                        .ok_or_else(|| Hdf5Error::corrupt("scaled chunk offset overflows"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ChunkRecord {
                offsets,
                address,
                size,
                mask,
            })
        })
        .collect()
}
