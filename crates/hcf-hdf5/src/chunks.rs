//! Chunk grid arithmetic and assembly of chunked datasets.
//!
//! Every chunk index reader produces [`ChunkRecord`]s. [`assemble`] reads
//! each stored chunk, reverses the filter pipeline on it and copies the
//! part that falls inside the dataset extent into one row-major buffer.

use crate::cursor::FileView;
use crate::error::Hdf5Error;
use crate::filters::FilterPipeline;
use crate::layout::DONT_FILTER_PARTIAL_EDGES;

/// Chunks decoded per parallel batch.
#[cfg(feature = "parallel")]
const PARALLEL_BATCH: usize = 64;

/// One stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Element offset of the chunk's first element in each dimension.
    pub offsets: Vec<u64>,
    pub address: u64,
    /// Stored (filtered) size in bytes.
    pub size: u64,
    pub mask: u32,
}

/// Shape of a chunked dataset and its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    pub dims: Vec<u64>,
    pub chunk: Vec<u64>,
    pub element_size: usize,
}

impl ChunkGrid {
    pub fn new(dims: &[u64], chunk: &[u64], element_size: usize) -> Result<Self, Hdf5Error> {
        if dims.len() != chunk.len() {
            return Err(Hdf5Error::corrupt(format!(
                "chunk rank {} for a dataset of rank {}",
                chunk.len(),
                dims.len()
            )));
        }
        let grid = ChunkGrid {
            dims: dims.to_vec(),
            chunk: chunk.to_vec(),
            element_size,
        };
        grid.chunk_bytes()?;
        Ok(grid)
    }

    /// Bytes in one full chunk.
    pub fn chunk_bytes(&self) -> Result<usize, Hdf5Error> {
        self.chunk
            .iter()
            .try_fold(self.element_size as u64, |acc, &d| acc.checked_mul(d))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Hdf5Error::corrupt(format!("chunk {:?} is too large", self.chunk)))
    }

    /// Bytes in the whole dataset.
    pub fn total_bytes(&self) -> Result<usize, Hdf5Error> {
        self.dims
            .iter()
            .try_fold(self.element_size as u64, |acc, &d| acc.checked_mul(d))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Hdf5Error::corrupt(format!("dataset {:?} is too large", self.dims)))
    }

    /// Chunks along each dimension of `extent`.
    pub fn chunks_per_dim(&self, extent: &[u64]) -> Vec<u64> {
        extent
            .iter()
            .zip(&self.chunk)
            .map(|(&d, &c)| d.div_ceil(c))
            .collect()
    }

    /// Element offsets of the chunk at row-major position `index` in a grid
    /// of `per_dim` chunks.
    pub fn offsets_of(&self, index: u64, per_dim: &[u64]) -> Vec<u64> {
        let mut offsets = vec![0; per_dim.len()];
        let mut rest = index;
        for d in (0..per_dim.len()).rev() {
            let n = per_dim[d].max(1);
            offsets[d] = (rest % n) * self.chunk[d];
            rest /= n;
        }
        offsets
    }

    /// Whether the chunk at `offsets` reaches past the dataset extent.
    pub fn is_partial(&self, offsets: &[u64]) -> bool {
        offsets
            .iter()
            .zip(self.dims.iter().zip(&self.chunk))
            .any(|(&o, (&d, &c))| o + c > d)
    }

    /// Check chunk alignment. `Ok(false)` means the chunk lies wholly
    /// outside the current extent and carries no data.
    fn check_offsets(&self, offsets: &[u64]) -> Result<bool, Hdf5Error> {
        if offsets.len() != self.dims.len() {
            return Err(Hdf5Error::corrupt(format!("chunk offsets {offsets:?}")));
        }
        for ((&o, &c), &d) in offsets.iter().zip(&self.chunk).zip(&self.dims) {
            if o % c != 0 {
                return Err(Hdf5Error::corrupt(format!(
                    "chunk offsets {offsets:?} are not aligned to {:?}",
                    self.chunk
                )));
            }
            if o >= d {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Call `row(chunk_pos, dataset_pos, len)` for every run of bytes the
    /// chunk at `offsets` shares with the dataset.
    fn rows(&self, offsets: &[u64], mut row: impl FnMut(usize, usize, usize)) {
        let rank = self.dims.len();
        let es = self.element_size;
        let last = rank - 1;
        // Elements of the chunk's last dimension that fall inside the dataset.
        let run = (self.dims[last] - offsets[last]).min(self.chunk[last]) as usize;
        let extent: Vec<u64> = (0..last)
            .map(|d| (self.dims[d] - offsets[d]).min(self.chunk[d]))
            .collect();
        if extent.contains(&0) || run == 0 {
            return;
        }
        let mut pos = vec![0u64; last];
        loop {
            let mut src = 0u64;
            let mut dst = 0u64;
            for d in 0..last {
                src = src * self.chunk[d] + pos[d];
                dst = dst * self.dims[d] + offsets[d] + pos[d];
            }
            let src = (src * self.chunk[last]) as usize * es;
            let dst = (dst * self.dims[last] + offsets[last]) as usize * es;
            row(src, dst, run * es);

            // Advance the row counter, innermost leading dimension first.
            let mut d = last;
            loop {
                if d == 0 {
                    return;
                }
                d -= 1;
                pos[d] += 1;
                if pos[d] < extent[d] {
                    break;
                }
                pos[d] = 0;
            }
        }
    }

    /// Copy the in-extent part of a decoded chunk into `out`.
    fn copy_into(&self, out: &mut [u8], offsets: &[u64], chunk: &[u8]) {
        self.rows(offsets, |src, dst, len| {
            out[dst..dst + len].copy_from_slice(&chunk[src..src + len]);
        });
    }

    /// The chunk at `offsets` cut out of the whole dataset `data`, with
    /// the part past the extent zeroed.
    pub fn extract(&self, data: &[u8], offsets: &[u64]) -> Result<Vec<u8>, Hdf5Error> {
        let mut chunk = vec![0u8; self.chunk_bytes()?];
        self.rows(offsets, |src, dst, len| {
            chunk[src..src + len].copy_from_slice(&data[dst..dst + len]);
        });
        Ok(chunk)
    }
}

/// Size in bytes of the chunk size field in filtered fixed and extensible
/// array elements.
pub fn chunk_size_len(chunk_bytes: usize) -> usize {
    let log2 = (chunk_bytes.max(1) as u64).ilog2() as usize;
    (1 + (log2 + 8) / 8).min(8)
}

/// Records for the implicit index: every chunk of the extent, unfiltered
/// and back to back from `address`.
pub fn implicit_records(grid: &ChunkGrid, address: u64) -> Result<Vec<ChunkRecord>, Hdf5Error> {
    let per_dim = grid.chunks_per_dim(&grid.dims);
    let count: u64 = per_dim.iter().product();
    let size = grid.chunk_bytes()? as u64;
    (0..count)
        .map(|i| {
            let address = i
                .checked_mul(size)
                .and_then(|off| off.checked_add(address))
                .ok_or_else(|| Hdf5Error::corrupt("implicit chunk address overflows"))?;
            Ok(ChunkRecord {
                offsets: grid.offsets_of(i, &per_dim),
                address,
                size,
                mask: 0,
            })
        })
        .collect()
}

/// Everything needed to turn stored chunks back into element bytes.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'p> {
    pub pipeline: &'p FilterPipeline,
    pub layout_flags: u8,
}

impl Decoder<'_> {
    fn decode(
        &self,
        view: &FileView<'_>,
        grid: &ChunkGrid,
        record: &ChunkRecord,
    ) -> Result<Vec<u8>, Hdf5Error> {
        let full = grid.chunk_bytes()?;
        let size = usize::try_from(record.size)
            .map_err(|_| Hdf5Error::corrupt("chunk size out of range"))?;
        let stored = view.bytes(record.address, size)?.to_vec();
        let skip_filters = self.pipeline.is_empty()
            || (self.layout_flags & DONT_FILTER_PARTIAL_EDGES != 0
                && grid.is_partial(&record.offsets));
        let raw = if skip_filters {
            stored
        } else {
            self.pipeline
                .reverse(stored, record.mask, grid.element_size, full)?
        };
        if raw.len() < full {
            return Err(Hdf5Error::corrupt(format!(
                "chunk at {:?} decodes to {} bytes, expected {full}",
                record.offsets,
                raw.len()
            )));
        }
        Ok(raw)
    }
}

/// Allocate the output for a dataset, failing instead of aborting when
/// the declared size cannot be allocated.
pub fn allocate(len: usize, fill: Option<&[u8]>) -> Result<Vec<u8>, Hdf5Error> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| Hdf5Error::corrupt(format!("cannot allocate {len} bytes for a dataset")))?;
    match fill {
        Some(value) if !value.is_empty() && value.iter().any(|&b| b != 0) => {
            while out.len() + value.len() <= len {
                out.extend_from_slice(value);
            }
            out.resize(len, 0);
        }
        _ => out.resize(len, 0),
    }
    Ok(out)
}

/// Read, decode and place every chunk of a dataset.
pub fn assemble(
    view: &FileView<'_>,
    grid: &ChunkGrid,
    records: Vec<ChunkRecord>,
    decoder: Decoder<'_>,
    fill: Option<&[u8]>,
) -> Result<Vec<u8>, Hdf5Error> {
    let mut out = allocate(grid.total_bytes()?, fill)?;
    if grid.dims.is_empty() || out.is_empty() {
        return Ok(out);
    }
    let mut live = Vec::with_capacity(records.len());
    for record in records {
        if grid.check_offsets(&record.offsets)? {
            live.push(record);
        }
    }
    decode_all(view, grid, &live, decoder, &mut out)?;
    Ok(out)
}

#[cfg(feature = "parallel")]
fn decode_all(
    view: &FileView<'_>,
    grid: &ChunkGrid,
    records: &[ChunkRecord],
    decoder: Decoder<'_>,
    out: &mut [u8],
) -> Result<(), Hdf5Error> {
    use rayon::prelude::*;

    for batch in records.chunks(PARALLEL_BATCH) {
        let decoded = batch
            .par_iter()
            .map(|record| decoder.decode(view, grid, record))
            .collect::<Result<Vec<_>, _>>()?;
        for (record, raw) in batch.iter().zip(decoded) {
            grid.copy_into(out, &record.offsets, &raw);
        }
    }
    Ok(())
}

#[cfg(not(feature = "parallel"))]
fn decode_all(
    view: &FileView<'_>,
    grid: &ChunkGrid,
    records: &[ChunkRecord],
    decoder: Decoder<'_>,
    out: &mut [u8],
) -> Result<(), Hdf5Error> {
    for record in records {
        let raw = decoder.decode(view, grid, record)?;
        grid.copy_into(out, &record.offsets, &raw);
    }
    Ok(())
}
