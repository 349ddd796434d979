//! Fixed array chunk index (layout v4, index type 3), read and write.

use crate::checksum::{lookup3, verify};
use crate::chunks::{chunk_size_len, ChunkGrid, ChunkRecord};
use crate::cursor::{Cursor, FileView, Sizes};
use crate::error::Hdf5Error;
use crate::UNDEF_ADDR;

/// log2 of the elements per data block page the writer declares.
pub const PAGE_BITS: u8 = 10;

/// Header size with 8-byte fields.
const HEADER_SIZE: usize = 28;

/// Client id: elements are bare addresses.
const CLIENT_PLAIN: u8 = 0;
/// Client id: elements carry a stored size and filter mask.
const CLIENT_FILTERED: u8 = 1;

/// How one array element is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ElementFormat {
    /// Width of the stored size field; `None` for unfiltered chunks.
    pub size_len: Option<usize>,
    pub chunk_bytes: u64,
}

impl ElementFormat {
    pub(crate) fn new(filtered: bool, chunk_bytes: usize) -> Self {
        ElementFormat {
            size_len: filtered.then(|| chunk_size_len(chunk_bytes)),
            chunk_bytes: chunk_bytes as u64,
        }
    }

    pub(crate) fn width(&self, sizes: Sizes) -> usize {
        sizes.offset as usize + self.size_len.map_or(0, |n| n + 4)
    }

    /// Address, stored size and mask. `None` for an unallocated chunk.
    pub(crate) fn read(&self, c: &mut Cursor<'_>) -> Result<Option<(u64, u64, u32)>, Hdf5Error> {
        let address = c.address()?;
        let (size, mask) = match self.size_len {
            Some(n) => (c.uint(n)?, c.u32()?),
            None => (self.chunk_bytes, 0),
        };
        Ok((address != UNDEF_ADDR).then_some((address, size, mask)))
    }

    fn write(&self, out: &mut Vec<u8>, address: u64, size: u64, mask: u32) {
        out.extend_from_slice(&address.to_le_bytes());
        if let Some(n) = self.size_len {
            out.extend_from_slice(&size.to_le_bytes()[..n]);
            out.extend_from_slice(&mask.to_le_bytes());
        }
    }
}

/// All allocated chunks of a dataset indexed by a fixed array at `address`.
/// `max_dims` is the dataset's maximum extent.
pub fn chunk_records(
    view: &FileView<'_>,
    address: u64,
    grid: &ChunkGrid,
    max_dims: &[u64],
    filtered: bool,
) -> Result<Vec<ChunkRecord>, Hdf5Error> {
    let sizes = view.sizes;
    let start = view.pos(address)?;
    let mut c = Cursor::new(view.data, start, sizes);
    c.magic(b"FAHD", "fixed array header")?;
    let version = c.u8()?;
    if version != 0 {
        return Err(Hdf5Error::UnsupportedVersion {
            what: "fixed array header",
            version,
        });
    }
    let client = c.u8()?;
    let elem_size = c.u8()? as usize;
    let page_bits = c.u8()?;
    let nelmts = c.length()?;
    let dblock = c.address()?;
    verify(view.data, start, c.position() - start, "fixed array header")?;

    let format = ElementFormat::new(filtered || client == CLIENT_FILTERED, grid.chunk_bytes()?);
    if format.width(sizes) != elem_size {
        return Err(Hdf5Error::corrupt(format!(
            "fixed array element size {elem_size}, expected {}",
            format.width(sizes)
        )));
    }
    let per_dim = grid.chunks_per_dim(max_dims);
    let expected: u64 = per_dim.iter().product();
    if nelmts != expected {
        return Err(Hdf5Error::corrupt(format!(
            "fixed array holds {nelmts} chunks, the dataset has {expected}"
        )));
    }
    if dblock == UNDEF_ADDR || nelmts == 0 {
        return Ok(Vec::new());
    }

    let block = view.pos(dblock)?;
    let mut c = Cursor::new(view.data, block, sizes);
    c.magic(b"FADB", "fixed array data block")?;
    c.skip(2)?; // version, client id
    c.address()?; // header

    let mut out = Vec::new();
    let mut push = |index: u64, entry: Option<(u64, u64, u32)>| {
        if let Some((address, size, mask)) = entry {
            out.push(ChunkRecord {
                offsets: grid.offsets_of(index, &per_dim),
                address,
                size,
                mask,
            });
        }
    };

    let page_nelmts = 1u64.checked_shl(u32::from(page_bits)).unwrap_or(u64::MAX);
    if nelmts <= page_nelmts {
        for i in 0..nelmts {
            push(i, format.read(&mut c)?);
        }
        verify(view.data, block, c.position() - block, "fixed array data block")?;
        return Ok(out);
    }

    let npages = nelmts.div_ceil(page_nelmts);
    let bitmap = c.bytes(npages.div_ceil(8) as usize)?;
    verify(view.data, block, c.position() - block, "fixed array data block")?;
    let mut page_start = c.position() + 4;
    for page in 0..npages {
        let first = page * page_nelmts;
        let count = page_nelmts.min(nelmts - first);
        let len = usize::try_from(count)
            .ok()
            .and_then(|n| n.checked_mul(elem_size))
            .ok_or_else(|| Hdf5Error::corrupt("fixed array page is too large"))?;
        let initialized = bitmap[(page / 8) as usize] & (0x80 >> (page % 8)) != 0;
        if initialized {
            let mut p = Cursor::new(view.data, page_start, sizes);
            for i in 0..count {
                push(first + i, format.read(&mut p)?);
            }
            verify(view.data, page_start, len, "fixed array page")?;
        }
        page_start += len + 4;
    }
    Ok(out)
}

/// Header and data block of a fixed array, to be written at file offset
/// `at`. `entries` are (address, stored size, mask) in chunk order.
pub fn encode(
    at: u64,
    entries: &[(u64, u64, u32)],
    filtered: bool,
    chunk_bytes: usize,
) -> Vec<u8> {
    let format = ElementFormat::new(filtered, chunk_bytes);
    let width = format.width(Sizes::WIDE);
    let nelmts = entries.len() as u64;
    let dblock = at + HEADER_SIZE as u64;
    let client = if filtered {
        CLIENT_FILTERED
    } else {
        CLIENT_PLAIN
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + 32 + entries.len() * (width + 1));
    out.extend_from_slice(b"FAHD");
    out.extend_from_slice(&[0, client, width as u8, PAGE_BITS]);
    out.extend_from_slice(&nelmts.to_le_bytes());
    out.extend_from_slice(&dblock.to_le_bytes());
    let sum = lookup3(&out);
    out.extend_from_slice(&sum.to_le_bytes());

    let block = out.len();
    out.extend_from_slice(b"FADB");
    out.extend_from_slice(&[0, client]);
    out.extend_from_slice(&at.to_le_bytes());

    let page_nelmts = 1usize << PAGE_BITS;
    if entries.len() <= page_nelmts {
        for &(address, size, mask) in entries {
            format.write(&mut out, address, size, mask);
        }
        let sum = lookup3(&out[block..]);
        out.extend_from_slice(&sum.to_le_bytes());
        return out;
    }

    let npages = entries.len().div_ceil(page_nelmts);
    let mut bitmap = vec![0u8; npages.div_ceil(8)];
    for page in 0..npages {
        bitmap[page / 8] |= 0x80 >> (page % 8);
    }
    out.extend_from_slice(&bitmap);
    let sum = lookup3(&out[block..]);
    out.extend_from_slice(&sum.to_le_bytes());
    for page in entries.chunks(page_nelmts) {
        let start = out.len();
        for &(address, size, mask) in page {
            format.write(&mut out, address, size, mask);
        }
        let sum = lookup3(&out[start..]);
        out.extend_from_slice(&sum.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: u64) -> ChunkGrid {
        ChunkGrid::new(&[n * 4], &[4], 8).unwrap()
    }

    #[test]
    fn unfiltered_roundtrip() {
        let entries: Vec<_> = (0..3u64).map(|i| (1000 + i * 32, 32, 0)).collect();
        let mut file = vec![0u8; 64];
        file.extend(encode(64, &entries, false, 32));
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let g = grid(3);
        let records = chunk_records(&view, 64, &g, &g.dims, false).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].offsets, vec![8]);
        assert_eq!(records[2].address, 1064);
        assert_eq!(records[2].size, 32);
    }

    #[test]
    fn filtered_roundtrip_skips_unallocated() {
        let entries = vec![(500, 17, 0), (UNDEF_ADDR, 0, 0), (700, 19, 1)];
        let file = encode(0, &entries, true, 32);
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let g = grid(3);
        let records = chunk_records(&view, 0, &g, &g.dims, true).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].offsets, vec![8]);
        assert_eq!((records[1].size, records[1].mask), (19, 1));
    }

    #[test]
    fn paged_roundtrip() {
        let n = 2500u64;
        let entries: Vec<_> = (0..n).map(|i| (i * 100, 30, 0)).collect();
        let file = encode(0, &entries, true, 32);
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let g = grid(n);
        let records = chunk_records(&view, 0, &g, &g.dims, true).unwrap();
        assert_eq!(records.len(), n as usize);
        assert_eq!(records[2499].address, 249_900);
        assert_eq!(records[1500].offsets, vec![6000]);
    }

    #[test]
    fn count_mismatch_is_corrupt() {
        let entries = vec![(0, 32, 0); 2];
        let file = encode(0, &entries, false, 32);
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let g = grid(3);
        assert!(matches!(
            chunk_records(&view, 0, &g, &g.dims, false),
            Err(Hdf5Error::Corrupt(_))
        ));
    }

    #[test]
    fn damaged_block_fails_its_checksum() {
        let entries = vec![(0, 32, 0); 2];
        let mut file = encode(0, &entries, false, 32);
        file[HEADER_SIZE + 20] ^= 1;
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let g = grid(2);
        assert!(matches!(
            chunk_records(&view, 0, &g, &g.dims, false),
            Err(Hdf5Error::ChecksumMismatch { .. })
        ));
    }
}
