//! Extensible array chunk index (layout v4, index type 4), read only.
//!
//! Used for datasets with exactly one unlimited dimension. Chunk positions
//! are numbered with the unlimited dimension moved to the front.

use crate::checksum::verify;
use crate::chunks::{ChunkGrid, ChunkRecord};
use crate::cursor::{Cursor, FileView};
use crate::error::Hdf5Error;
use crate::fixed_array::ElementFormat;
use crate::UNDEF_ADDR;

#[derive(Debug, Clone)]
struct Header {
    elem_size: usize,
    max_nelmts_bits: u8,
    idx_blk_elmts: u64,
    data_blk_min_elmts: u64,
    sup_blk_min_data_ptrs: u64,
    page_bits: u8,
    max_idx_set: u64,
    index_block: u64,
}

/// Data blocks of one super block level.
#[derive(Debug, Clone, Copy)]
struct SuperInfo {
    ndblks: u64,
    dblk_nelmts: u64,
    start_idx: u64,
}

impl Header {
    fn read(view: &FileView<'_>, address: u64) -> Result<Self, Hdf5Error> {
        let start = view.pos(address)?;
        let mut c = Cursor::new(view.data, start, view.sizes);
        c.magic(b"EAHD", "extensible array header")?;
        let version = c.u8()?;
        if version != 0 {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "extensible array header",
                version,
            });
        }
        c.u8()?; // client id
        let elem_size = c.u8()? as usize;
        let max_nelmts_bits = c.u8()?;
        let idx_blk_elmts = u64::from(c.u8()?);
        let data_blk_min_elmts = u64::from(c.u8()?);
        let sup_blk_min_data_ptrs = u64::from(c.u8()?);
        let page_bits = c.u8()?;
        for _ in 0..4 {
            c.length()?; // super and data block counts and sizes
        }
        let max_idx_set = c.length()?;
        c.length()?; // elements realized
        let index_block = c.address()?;
        verify(view.data, start, c.position() - start, "extensible array header")?;

        let pow2 = |n: u64| n.is_power_of_two();
        if !pow2(data_blk_min_elmts)
            || !pow2(sup_blk_min_data_ptrs)
            || max_nelmts_bits >= 64
            || u32::from(max_nelmts_bits) < data_blk_min_elmts.ilog2()
        {
            return Err(Hdf5Error::corrupt("extensible array creation parameters"));
        }
        Ok(Header {
            elem_size,
            max_nelmts_bits,
            idx_blk_elmts,
            data_blk_min_elmts,
            sup_blk_min_data_ptrs,
            page_bits,
            max_idx_set,
            index_block,
        })
    }

    /// Width of the block offset field in data and super blocks.
    fn offset_width(&self) -> usize {
        (usize::from(self.max_nelmts_bits) + 7) / 8
    }

    fn super_blocks(&self) -> Vec<SuperInfo> {
        let count = 1 + u32::from(self.max_nelmts_bits) - self.data_blk_min_elmts.ilog2();
        let mut start_idx = 0u64;
        (0..count)
            .map(|u| {
                let info = SuperInfo {
                    ndblks: 1u64 << (u / 2),
                    dblk_nelmts: (1u64 << u.div_ceil(2)) * self.data_blk_min_elmts,
                    start_idx,
                };
                start_idx = start_idx.saturating_add(info.ndblks.saturating_mul(info.dblk_nelmts));
                info
            })
            .collect()
    }

    fn page_nelmts(&self) -> u64 {
        1u64.checked_shl(u32::from(self.page_bits))
            .unwrap_or(u64::MAX)
    }
}

struct Reader<'a, 'v> {
    view: &'a FileView<'v>,
    header: Header,
    format: ElementFormat,
    out: Vec<(u64, u64, u64, u32)>,
}

impl Reader<'_, '_> {
    fn keep(&mut self, index: u64, entry: Option<(u64, u64, u32)>) {
        if let Some((address, size, mask)) = entry {
            if index < self.header.max_idx_set {
                self.out.push((index, address, size, mask));
            }
        }
    }

    /// Read one data block of `nelmts` elements whose first global index
    /// is `first`. `pages` says which pages are initialized when paged.
    fn data_block(
        &mut self,
        address: u64,
        first: u64,
        nelmts: u64,
        pages: Option<&[u8]>,
    ) -> Result<(), Hdf5Error> {
        let view = self.view;
        let sizes = view.sizes;
        let start = view.pos(address)?;
        let mut c = Cursor::new(view.data, start, sizes);
        c.magic(b"EADB", "extensible array data block")?;
        c.skip(2)?;
        c.address()?;
        c.skip(self.header.offset_width())?;

        let page_nelmts = self.header.page_nelmts();
        if nelmts <= page_nelmts {
            for i in 0..nelmts {
                let entry = self.format.read(&mut c)?;
                self.keep(first + i, entry);
            }
            return verify(view.data, start, c.position() - start, "extensible array data block");
        }

        verify(view.data, start, c.position() - start, "extensible array data block")?;
        let page_len = usize::try_from(page_nelmts)
            .ok()
            .and_then(|n| n.checked_mul(self.header.elem_size))
            .ok_or_else(|| Hdf5Error::corrupt("extensible array page is too large"))?;
        let mut page_start = c.position() + 4;
        for page in 0..nelmts / page_nelmts {
            let initialized = pages.map_or(true, |bits| {
                bits.get((page / 8) as usize)
                    .is_some_and(|b| b & (0x80 >> (page % 8)) != 0)
            });
            if initialized {
                let mut p = Cursor::new(view.data, page_start, sizes);
                for i in 0..page_nelmts {
                    let entry = self.format.read(&mut p)?;
                    self.keep(first + page * page_nelmts + i, entry);
                }
                verify(view.data, page_start, page_len, "extensible array page")?;
            }
            page_start += page_len + 4;
        }
        Ok(())
    }

    fn super_block(&mut self, address: u64, info: SuperInfo, first: u64) -> Result<(), Hdf5Error> {
        let view = self.view;
        let start = view.pos(address)?;
        let mut c = Cursor::new(view.data, start, view.sizes);
        c.magic(b"EASB", "extensible array super block")?;
        c.skip(2)?;
        c.address()?;
        c.skip(self.header.offset_width())?;

        let page_nelmts = self.header.page_nelmts();
        let bitmaps = if info.dblk_nelmts > page_nelmts {
            let per_block = (info.dblk_nelmts / page_nelmts).div_ceil(8) as usize;
            Some((per_block, c.bytes(per_block * info.ndblks as usize)?))
        } else {
            None
        };
        let addrs = (0..info.ndblks)
            .map(|_| c.address())
            .collect::<Result<Vec<_>, _>>()?;
        verify(view.data, start, c.position() - start, "extensible array super block")?;

        for (d, addr) in addrs.into_iter().enumerate() {
            if addr == UNDEF_ADDR {
                continue;
            }
            let pages = bitmaps.map(|(n, bits)| &bits[d * n..(d + 1) * n]);
            let block_first = first + d as u64 * info.dblk_nelmts;
            self.data_block(addr, block_first, info.dblk_nelmts, pages)?;
        }
        Ok(())
    }
}

/// All allocated chunks of a dataset indexed by an extensible array.
/// `unlimited` is the dataset's unlimited dimension.
pub fn chunk_records(
    view: &FileView<'_>,
    address: u64,
    grid: &ChunkGrid,
    max_dims: &[u64],
    unlimited: usize,
    filtered: bool,
) -> Result<Vec<ChunkRecord>, Hdf5Error> {
    let header = Header::read(view, address)?;
    let format = ElementFormat::new(filtered, grid.chunk_bytes()?);
    if format.width(view.sizes) != header.elem_size {
        return Err(Hdf5Error::corrupt(format!(
            "extensible array element size {}, expected {}",
            header.elem_size,
            format.width(view.sizes)
        )));
    }
    let supers = header.super_blocks();
    let index_block = header.index_block;
    let mut reader = Reader {
        view,
        header,
        format,
        out: Vec::new(),
    };
    if index_block != UNDEF_ADDR {
        read_index_block(&mut reader, index_block, &supers)?;
    }

    let per_dim = grid.chunks_per_dim(max_dims);
    Ok(reader
        .out
        .into_iter()
        .map(|(index, address, size, mask)| ChunkRecord {
            offsets: unswizzled_offsets(grid, index, &per_dim, unlimited),
            address,
            size,
            mask,
        })
        .collect())
}

fn read_index_block(
    reader: &mut Reader<'_, '_>,
    address: u64,
    supers: &[SuperInfo],
) -> Result<(), Hdf5Error> {
    let view = reader.view;
    let h = reader.header.clone();
    let start = view.pos(address)?;
    let mut c = Cursor::new(view.data, start, view.sizes);
    c.magic(b"EAIB", "extensible array index block")?;
    c.skip(2)?;
    c.address()?;

    for i in 0..h.idx_blk_elmts {
        let entry = reader.format.read(&mut c)?;
        reader.keep(i, entry);
    }
    let ndblk_addrs = 2 * (h.sup_blk_min_data_ptrs - 1);
    let iblock_supers = 2 * h.sup_blk_min_data_ptrs.ilog2() as usize;
    let nsblk_addrs = supers.len().saturating_sub(iblock_supers);
    let dblk_addrs = (0..ndblk_addrs)
        .map(|_| c.address())
        .collect::<Result<Vec<_>, _>>()?;
    let sblk_addrs = (0..nsblk_addrs)
        .map(|_| c.address())
        .collect::<Result<Vec<_>, _>>()?;
    verify(view.data, start, c.position() - start, "extensible array index block")?;

    // Data blocks of the first super block levels hang off the index block.
    let mut dblk = dblk_addrs.into_iter();
    for info in supers.iter().take(iblock_supers) {
        for d in 0..info.ndblks {
            let Some(addr) = dblk.next() else {
                return Ok(());
            };
            if addr != UNDEF_ADDR {
                let first = h.idx_blk_elmts + info.start_idx + d * info.dblk_nelmts;
                reader.data_block(addr, first, info.dblk_nelmts, None)?;
            }
        }
    }
    for (info, addr) in supers.iter().skip(iblock_supers).zip(sblk_addrs) {
        if addr != UNDEF_ADDR {
            reader.super_block(addr, *info, h.idx_blk_elmts + info.start_idx)?;
        }
    }
    Ok(())
}

/// Element offsets of chunk `index` when the unlimited dimension is
/// numbered first.
fn unswizzled_offsets(grid: &ChunkGrid, index: u64, per_dim: &[u64], unlimited: usize) -> Vec<u64> {
    let rank = grid.chunk.len();
    let mut offsets = vec![0u64; rank];
    let mut rest = index;
    for d in (0..rank).rev().filter(|&d| d != unlimited) {
        let n = per_dim[d].max(1);
        offsets[d] = (rest % n) * grid.chunk[d];
        rest /= n;
    }
    offsets[unlimited] = rest * grid.chunk[unlimited];
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::lookup3;
    use crate::cursor::Sizes;

    fn sealed(mut block: Vec<u8>) -> Vec<u8> {
        let sum = lookup3(&block);
        block.extend_from_slice(&sum.to_le_bytes());
        block
    }

    /// Header at 0 and index block at 256 holding `iblock` plus one data
    /// block at 512 holding `dblock`. Parameters: 4 index block elements,
    /// data blocks of at least 2, 4 data block pointers per super block.
    fn small_array(iblock: &[u64], dblock: &[u64], max_idx_set: u64) -> Vec<u8> {
        let mut h = b"EAHD".to_vec();
        h.extend_from_slice(&[0, 0, 8, 32, 4, 2, 4, 10]);
        for v in [0u64, 0, 1, 0, max_idx_set, max_idx_set] {
            h.extend_from_slice(&v.to_le_bytes());
        }
        h.extend_from_slice(&256u64.to_le_bytes());
        let mut file = sealed(h);
        file.resize(256, 0);

        let mut ib = b"EAIB".to_vec();
        ib.extend_from_slice(&[0, 0]);
        ib.extend_from_slice(&0u64.to_le_bytes());
        for i in 0..4 {
            ib.extend_from_slice(&iblock.get(i).copied().unwrap_or(UNDEF_ADDR).to_le_bytes());
        }
        // 2 * (4 - 1) data block pointers; super blocks: 1 + 32 - 1 = 32
        // levels, 2 * log2(4) = 4 of them in the index block.
        for d in 0..6 {
            let addr = if d == 0 { 512u64 } else { UNDEF_ADDR };
            ib.extend_from_slice(&addr.to_le_bytes());
        }
        for _ in 0..28 {
            ib.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        }
        file.extend(sealed(ib));
        file.resize(512, 0);

        let mut db = b"EADB".to_vec();
        db.extend_from_slice(&[0, 0]);
        db.extend_from_slice(&0u64.to_le_bytes());
        db.extend_from_slice(&[0; 4]);
        for i in 0..2 {
            db.extend_from_slice(&dblock.get(i).copied().unwrap_or(UNDEF_ADDR).to_le_bytes());
        }
        file.extend(sealed(db));
        file
    }

    #[test]
    fn index_and_data_block_elements() {
        let file = small_array(&[1000, 1100, 1200, 1300], &[1400, 1500], 6);
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let grid = ChunkGrid::new(&[60], &[10], 1).unwrap();
        let records = chunk_records(&view, 0, &grid, &[UNDEF_ADDR], 0, false).unwrap();
        let got: Vec<(u64, u64)> = records.iter().map(|r| (r.offsets[0], r.address)).collect();
        assert_eq!(
            got,
            vec![(0, 1000), (10, 1100), (20, 1200), (30, 1300), (40, 1400), (50, 1500)]
        );
    }

    #[test]
    fn entries_past_the_set_maximum_are_ignored() {
        let file = small_array(&[1000, 1100], &[], 2);
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let grid = ChunkGrid::new(&[20], &[10], 1).unwrap();
        let records = chunk_records(&view, 0, &grid, &[UNDEF_ADDR], 0, false).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn unlimited_dimension_numbers_first() {
        // 2-D, unlimited along dim 1, three chunks along dim 0.
        let grid = ChunkGrid::new(&[30, 8], &[10, 4], 1).unwrap();
        let per_dim = grid.chunks_per_dim(&[30, UNDEF_ADDR]);
        assert_eq!(unswizzled_offsets(&grid, 0, &per_dim, 1), vec![0, 0]);
        assert_eq!(unswizzled_offsets(&grid, 2, &per_dim, 1), vec![20, 0]);
        assert_eq!(unswizzled_offsets(&grid, 4, &per_dim, 1), vec![10, 4]);
    }

    #[test]
    fn damaged_header() {
        let mut file = small_array(&[1000], &[], 1);
        file[9] ^= 0xff;
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let grid = ChunkGrid::new(&[10], &[10], 1).unwrap();
        assert!(chunk_records(&view, 0, &grid, &[UNDEF_ADDR], 0, false).is_err());
    }
}
