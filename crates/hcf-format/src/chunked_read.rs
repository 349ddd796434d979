//! Reading dataset storage back into raw element bytes.

#[cfg(feature = "parallel")]
use crate::chunked_write::should_use_parallel;
use crate::cursor::ensure_len;
use crate::data_layout::{parse_chunk_index, ChunkEntry, DataLayout};
use crate::error::FormatError;
use crate::filter_pipeline::FilterPipeline;
use crate::filters::decompress_chunk;

/// Read the raw (unfiltered) element bytes of a dataset.
///
/// `element_size` is the fixed element width, or `None` for variable-length
/// elements, in which case per-chunk sizes are only checked against the
/// chunk index.
pub fn read_raw_data(
    data: &[u8],
    layout: &DataLayout,
    pipeline: Option<&FilterPipeline>,
    total_elements: u64,
    element_size: Option<usize>,
) -> Result<Vec<u8>, FormatError> {
    match layout {
        DataLayout::Contiguous { address, size } => {
            if let Some(elem) = element_size {
                let expected = total_elements.checked_mul(elem as u64);
                if expected != Some(*size) {
                    return Err(FormatError::InvalidData(format!(
                        "contiguous storage is {size} bytes, dataspace needs {} elements of {elem} bytes",
                        total_elements
                    )));
                }
            }
            let offset = to_usize(*address)?;
            let len = to_usize(*size)?;
            ensure_len(data, offset, len)?;
            Ok(data[offset..offset + len].to_vec())
        }
        DataLayout::Chunked {
            index_address,
            chunk_count,
            ..
        } => {
            let entries = parse_chunk_index(data, *index_address, *chunk_count)?;
            validate_tiling(&entries, total_elements, element_size)?;
            let empty = FilterPipeline::default();
            read_chunks(data, &entries, pipeline.unwrap_or(&empty))
        }
    }
}

fn to_usize(v: u64) -> Result<usize, FormatError> {
    usize::try_from(v).map_err(|_| FormatError::InvalidData(format!("offset {v} exceeds address space")))
}

/// Chunks must cover `0..total_elements` in order with no gaps or overlap.
fn validate_tiling(
    entries: &[ChunkEntry],
    total_elements: u64,
    element_size: Option<usize>,
) -> Result<(), FormatError> {
    let mut next = 0u64;
    for (i, e) in entries.iter().enumerate() {
        if e.start_element != next {
            return Err(FormatError::CorruptChunkIndex(format!(
                "chunk {i} starts at element {}, expected {next}",
                e.start_element
            )));
        }
        if e.element_count == 0 {
            return Err(FormatError::CorruptChunkIndex(format!("chunk {i} is empty")));
        }
        if let Some(elem) = element_size {
            if e.element_count.checked_mul(elem as u64) != Some(e.raw_size) {
                return Err(FormatError::CorruptChunkIndex(format!(
                    "chunk {i} raw size {} does not hold {} elements",
                    e.raw_size, e.element_count
                )));
            }
        }
        next = next
            .checked_add(e.element_count)
            .ok_or_else(|| FormatError::CorruptChunkIndex("element count overflow".into()))?;
    }
    if next != total_elements {
        return Err(FormatError::CorruptChunkIndex(format!(
            "chunks cover {next} elements, dataspace has {total_elements}"
        )));
    }
    Ok(())
}

fn read_one(data: &[u8], entry: &ChunkEntry, pipeline: &FilterPipeline) -> Result<Vec<u8>, FormatError> {
    let offset = to_usize(entry.address)?;
    let stored = to_usize(entry.stored_size)?;
    ensure_len(data, offset, stored)?;
    decompress_chunk(
        &data[offset..offset + stored],
        pipeline,
        entry.filter_mask,
        to_usize(entry.raw_size)?,
    )
}

fn read_chunks(
    data: &[u8],
    entries: &[ChunkEntry],
    pipeline: &FilterPipeline,
) -> Result<Vec<u8>, FormatError> {
    let total = entries.iter().try_fold(0u64, |acc, e| {
        acc.checked_add(e.raw_size)
            .ok_or_else(|| FormatError::CorruptChunkIndex("raw size overflow".into()))
    })?;
    // Sizes come from the index; reserve no more than the file can back.
    let mut out = Vec::with_capacity(to_usize(total)?.min(data.len()));

    #[cfg(feature = "parallel")]
    {
        if should_use_parallel(entries.len()) {
            use rayon::prelude::*;
            let decoded: Vec<Vec<u8>> = entries
                .par_iter()
                .map(|e| read_one(data, e, pipeline))
                .collect::<Result<_, _>>()?;
            for chunk in decoded {
                out.extend_from_slice(&chunk);
            }
            return Ok(out);
        }
    }

    for e in entries {
        out.extend_from_slice(&read_one(data, e, pipeline)?);
    }
    Ok(out)
}
