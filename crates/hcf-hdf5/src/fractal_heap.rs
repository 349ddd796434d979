//! Fractal heaps: where dense groups keep link messages and dense
//! attribute storage keeps attribute messages.
//!
//! Only managed and tiny objects are read. Huge objects and filtered heaps
//! are reported as unsupported.

use crate::checksum::verify;
use crate::cursor::{read_uint, Cursor, FileView};
use crate::error::Hdf5Error;
use crate::UNDEF_ADDR;

const ID_MANAGED: u8 = 0;
const ID_HUGE: u8 = 1;
const ID_TINY: u8 = 2;

/// Header flag: direct blocks carry a checksum.
const DIRECT_CHECKSUMMED: u8 = 0x02;

/// Nesting bound for indirect blocks.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct FractalHeap {
    id_len: usize,
    flags: u8,
    table_width: u64,
    start_block: u64,
    max_direct: u64,
    max_heap_bits: u16,
    root: u64,
    root_rows: u64,
    /// Bytes of the heap offset inside an id, and in block headers.
    offset_width: usize,
    /// Bytes of the object length inside an id.
    length_width: usize,
}

fn ilog2(n: u64) -> u32 {
    n.max(1).ilog2()
}

impl FractalHeap {
    pub fn open(view: &FileView<'_>, address: u64) -> Result<Self, Hdf5Error> {
        let start = view.pos(address)?;
        let mut c = Cursor::new(view.data, start, view.sizes);
        c.magic(b"FRHP", "fractal heap header")?;
        let version = c.u8()?;
        if version != 0 {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "fractal heap header",
                version,
            });
        }
        let id_len = c.u16()? as usize;
        let filter_len = c.u16()? as usize;
        let flags = c.u8()?;
        let max_managed = u64::from(c.u32()?);
        c.length()?; // next huge id
        c.address()?; // huge object B-tree
        c.length()?; // free space
        c.address()?; // free space manager
        for _ in 0..8 {
            c.length()?; // managed, allocated, iterator, object counts and sizes
        }
        let table_width = u64::from(c.u16()?);
        let start_block = c.length()?;
        let max_direct = c.length()?;
        let max_heap_bits = c.u16()?;
        c.u16()?; // starting rows of the root indirect block
        let root = c.address()?;
        let root_rows = u64::from(c.u16()?);
        if filter_len > 0 {
            return Err(Hdf5Error::unsupported("filtered fractal heap"));
        }
        verify(view.data, start, c.position() - start, "fractal heap header")?;

        if table_width == 0
            || !start_block.is_power_of_two()
            || !max_direct.is_power_of_two()
            || max_direct < start_block
            || max_heap_bits == 0
            || max_heap_bits > 64
        {
            return Err(Hdf5Error::corrupt("fractal heap doubling table"));
        }
        let offset_width = usize::from(max_heap_bits).div_ceil(8);
        let dir_width = (ilog2(max_direct) as usize).div_ceil(8);
        let managed_width = ilog2(max_managed) as usize / 8 + 1;
        Ok(FractalHeap {
            id_len,
            flags,
            table_width,
            start_block,
            max_direct,
            max_heap_bits,
            root,
            root_rows,
            offset_width,
            length_width: dir_width.min(managed_width),
        })
    }

    pub fn id_len(&self) -> usize {
        self.id_len
    }

    fn row_size(&self, row: u64) -> u64 {
        if row <= 1 {
            self.start_block
        } else {
            self.start_block.saturating_mul(1u64 << (row - 1).min(63))
        }
    }

    /// Rows of direct blocks in an indirect block.
    fn max_direct_rows(&self) -> u64 {
        u64::from(ilog2(self.max_direct) - ilog2(self.start_block)) + 2
    }

    /// Heap space spanned by an indirect block of `rows` rows.
    fn span(&self, rows: u64) -> u64 {
        (0..rows)
            .map(|r| self.row_size(r).saturating_mul(self.table_width))
            .fold(0u64, u64::saturating_add)
    }

    /// Address, heap offset and size of the direct block holding `offset`.
    fn direct_block_for(
        &self,
        view: &FileView<'_>,
        offset: u64,
    ) -> Result<(u64, u64, u64), Hdf5Error> {
        if self.root == UNDEF_ADDR {
            return Err(Hdf5Error::corrupt("object in an empty fractal heap"));
        }
        if self.root_rows == 0 {
            return Ok((self.root, 0, self.start_block));
        }
        let mut block = self.root;
        let mut rows = self.root_rows;
        let mut block_start = 0u64;
        let direct_rows = self.max_direct_rows();
        for _ in 0..MAX_DEPTH {
            let mut c = view.at(block)?;
            c.magic(b"FHIB", "fractal heap indirect block")?;
            c.u8()?;
            c.address()?;
            c.skip(self.offset_width)?;
            let mut cur = block_start;
            let mut next = None;
            'rows: for row in 0..rows {
                let size = self.row_size(row);
                let child_rows = if row < direct_rows {
                    0
                } else {
                    let base = self.start_block.saturating_mul(self.table_width);
                    u64::from(ilog2(size).saturating_sub(ilog2(base))) + 1
                };
                let span = if child_rows == 0 {
                    size
                } else {
                    self.span(child_rows)
                };
                for _ in 0..self.table_width {
                    let child = c.address()?;
                    if offset >= cur && offset - cur < span {
                        if child == UNDEF_ADDR {
                            return Err(Hdf5Error::corrupt(format!(
                                "heap offset {offset} falls in an unallocated block"
                            )));
                        }
                        if child_rows == 0 {
                            return Ok((child, cur, size));
                        }
                        next = Some((child, child_rows, cur));
                        break 'rows;
                    }
                    cur = cur.saturating_add(span);
                }
            }
            match next {
                Some((child, child_rows, start)) => {
                    block = child;
                    rows = child_rows;
                    block_start = start;
                }
                None => {
                    return Err(Hdf5Error::corrupt(format!(
                        "heap offset {offset} is past the heap"
                    )))
                }
            }
        }
        Err(Hdf5Error::corrupt("fractal heap nesting too deep"))
    }

    /// The object a heap id refers to.
    pub fn object<'a>(&self, view: &FileView<'a>, id: &'a [u8]) -> Result<&'a [u8], Hdf5Error> {
        let first = *id
            .first()
            .ok_or_else(|| Hdf5Error::corrupt("empty heap id"))?;
        if first >> 6 != 0 {
            return Err(Hdf5Error::corrupt(format!("heap id version {}", first >> 6)));
        }
        match (first >> 4) & 0x03 {
            ID_MANAGED => {
                let body = id.get(1..).unwrap_or(&[]);
                if body.len() < self.offset_width + self.length_width {
                    return Err(Hdf5Error::corrupt("heap id too short"));
                }
                let offset = read_uint(&body[..self.offset_width]);
                let len = read_uint(&body[self.offset_width..self.offset_width + self.length_width]);
                if self.max_heap_bits < 64 && offset >> self.max_heap_bits != 0 {
                    return Err(Hdf5Error::corrupt(format!("heap offset {offset}")));
                }
                self.managed(view, offset, len)
            }
            ID_TINY => {
                // Ids longer than 18 bytes spend a second byte on the length.
                let (len, data) = if self.id_len <= 18 {
                    (usize::from(first & 0x0f) + 1, id.get(1..))
                } else {
                    let second = *id
                        .get(1)
                        .ok_or_else(|| Hdf5Error::corrupt("heap id too short"))?;
                    (
                        ((usize::from(first & 0x0f) << 8) | usize::from(second)) + 1,
                        id.get(2..),
                    )
                };
                data.and_then(|d| d.get(..len))
                    .ok_or_else(|| Hdf5Error::corrupt("tiny heap object runs past its id"))
            }
            ID_HUGE => Err(Hdf5Error::unsupported("huge fractal heap object")),
            other => Err(Hdf5Error::corrupt(format!("heap id type {other}"))),
        }
    }

    fn managed<'a>(&self, view: &FileView<'a>, offset: u64, len: u64) -> Result<&'a [u8], Hdf5Error> {
        let (block, block_start, block_size) = self.direct_block_for(view, offset)?;
        let pos = view.pos(block)?;
        let mut c = Cursor::new(view.data, pos, view.sizes);
        c.magic(b"FHDB", "fractal heap direct block")?;
        c.u8()?;
        c.address()?;
        let stored_start = c.uint(self.offset_width)?;
        if stored_start != block_start {
            return Err(Hdf5Error::corrupt(format!(
                "direct block at {block:#x} claims heap offset {stored_start}, expected {block_start}"
            )));
        }
        let header_len = c.position() - pos
            + if self.flags & DIRECT_CHECKSUMMED != 0 {
                4
            } else {
                0
            };
        let within = offset - block_start;
        if within < header_len as u64 {
            return Err(Hdf5Error::corrupt(format!(
                "heap offset {offset} points into a block header"
            )));
        }
        if within.saturating_add(len) > block_size {
            return Err(Hdf5Error::corrupt(format!(
                "heap object at {offset} runs past its block"
            )));
        }
        let len = usize::try_from(len).map_err(|_| Hdf5Error::corrupt("heap object length"))?;
        view.bytes(block + within, len)
    }
}
