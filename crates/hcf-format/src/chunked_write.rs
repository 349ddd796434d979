//! Chunked dataset writing: chunk planning and parallel chunk encoding.
//!
//! Chunks are row blocks along the first dimension. A chunk therefore maps
//! to one contiguous element range, which keeps variable-length element
//! encodings splittable without re-indexing.

use crate::error::WriteError;
use crate::filter_pipeline::FilterPipeline;
use crate::filters::compress_chunk;

/// Only encode in parallel when there are more chunks than this.
pub const PARALLEL_THRESHOLD: usize = 4;

/// How a dataset is cut into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Dataset shape.
    pub shape: Vec<u64>,
    /// Rows (first-dimension indices) per chunk.
    pub rows_per_chunk: u64,
    /// Elements in one row (product of the trailing dimensions).
    pub row_elements: u64,
}

impl ChunkPlan {
    /// One chunk covering the whole dataset.
    pub fn single(shape: &[u64]) -> Self {
        let rows = shape.first().copied().unwrap_or(1);
        Self {
            shape: shape.to_vec(),
            rows_per_chunk: rows.max(1),
            row_elements: row_elements(shape),
        }
    }

    /// Chunks of roughly `target_bytes`, given the average encoded size of
    /// one element.
    pub fn with_target(shape: &[u64], bytes_per_element: f64, target_bytes: usize) -> Self {
        let rows_total = shape.first().copied().unwrap_or(1);
        let row_elements = row_elements(shape);
        let row_bytes = (row_elements as f64 * bytes_per_element).max(1.0);
        let rows = ((target_bytes as f64 / row_bytes).floor() as u64)
            .max(1)
            .min(rows_total.max(1));
        Self {
            shape: shape.to_vec(),
            rows_per_chunk: rows,
            row_elements,
        }
    }

    /// Total number of elements in the dataset.
    pub fn total_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Chunk extents as stored in the layout message. Zero extents are
    /// stored as 1 so the chunk shape stays valid for empty datasets.
    pub fn chunk_dims(&self) -> Vec<u64> {
        if self.shape.is_empty() {
            return Vec::new();
        }
        let mut dims = Vec::with_capacity(self.shape.len());
        dims.push(self.rows_per_chunk.max(1));
        dims.extend(self.shape[1..].iter().map(|&d| d.max(1)));
        dims
    }

    /// `(start_element, element_count)` for every chunk, in order.
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        let total = self.total_elements();
        if total == 0 {
            return Vec::new();
        }
        let step = self.rows_per_chunk.max(1) * self.row_elements;
        let mut ranges = Vec::new();
        let mut start = 0u64;
        while start < total {
            let count = step.min(total - start);
            ranges.push((start, count));
            start += count;
        }
        ranges
    }
}

fn row_elements(shape: &[u64]) -> u64 {
    if shape.is_empty() {
        1
    } else {
        shape[1..].iter().product()
    }
}

/// Unfiltered bytes for one chunk.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub start_element: u64,
    pub element_count: u64,
    pub data: Vec<u8>,
}

/// Filtered bytes for one chunk, ready to be written.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub start_element: u64,
    pub element_count: u64,
    /// Size before filtering.
    pub raw_size: u64,
    pub filter_mask: u32,
    pub data: Vec<u8>,
}

fn encode_one(chunk: RawChunk, pipeline: &FilterPipeline) -> Result<EncodedChunk, WriteError> {
    let data = compress_chunk(&chunk.data, pipeline)?;
    Ok(EncodedChunk {
        start_element: chunk.start_element,
        element_count: chunk.element_count,
        raw_size: chunk.data.len() as u64,
        filter_mask: 0,
        data,
    })
}

/// Returns `true` if the parallel path should be used for the given chunk count.
pub fn should_use_parallel(chunk_count: usize) -> bool {
    cfg!(feature = "parallel") && chunk_count > PARALLEL_THRESHOLD
}

/// Run every chunk through the pipeline, preserving order.
///
/// With `parallel` and enough chunks, chunks are filtered on the rayon pool.
pub fn encode_chunks(
    chunks: Vec<RawChunk>,
    pipeline: &FilterPipeline,
    parallel: bool,
) -> Result<Vec<EncodedChunk>, WriteError> {
    #[cfg(feature = "parallel")]
    {
        if parallel && should_use_parallel(chunks.len()) {
            use rayon::prelude::*;
            // Indexed parallel collect keeps input order.
            return chunks
                .into_par_iter()
                .map(|c| encode_one(c, pipeline))
                .collect();
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    chunks.into_iter().map(|c| encode_one(c, pipeline)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::decompress_chunk;

    #[test]
    fn single_plan_covers_everything() {
        let plan = ChunkPlan::single(&[10, 3]);
        assert_eq!(plan.chunk_dims(), vec![10, 3]);
        assert_eq!(plan.ranges(), vec![(0, 30)]);
    }

    #[test]
    fn scalar_plan() {
        let plan = ChunkPlan::single(&[]);
        assert!(plan.chunk_dims().is_empty());
        assert_eq!(plan.ranges(), vec![(0, 1)]);
    }

    #[test]
    fn zero_extent_has_no_chunks() {
        let plan = ChunkPlan::single(&[0, 5]);
        assert!(plan.ranges().is_empty());
        assert_eq!(plan.chunk_dims(), vec![1, 5]);

        let plan = ChunkPlan::with_target(&[4, 0], 8.0, 1024);
        assert!(plan.ranges().is_empty());
        assert_eq!(plan.chunk_dims(), vec![4, 1]);
    }

    #[test]
    fn target_splits_rows_with_short_tail() {
        // 1000 rows of 4 f64 = 32 bytes/row; 1024-byte target -> 32 rows/chunk.
        let plan = ChunkPlan::with_target(&[1000, 4], 8.0, 1024);
        assert_eq!(plan.rows_per_chunk, 32);
        let ranges = plan.ranges();
        assert_eq!(ranges.len(), 32);
        assert_eq!(ranges[0], (0, 128));
        assert_eq!(*ranges.last().unwrap(), (31 * 128, 1000 * 4 - 31 * 128));
        let covered: u64 = ranges.iter().map(|r| r.1).sum();
        assert_eq!(covered, 4000);
    }

    #[test]
    fn huge_rows_still_get_one_row_per_chunk() {
        let plan = ChunkPlan::with_target(&[3, 1_000_000], 8.0, 1024);
        assert_eq!(plan.rows_per_chunk, 1);
        assert_eq!(plan.ranges().len(), 3);
    }

    #[test]
    fn encode_preserves_order() {
        let pipeline = FilterPipeline {
            filters: vec![FilterPipeline::deflate(9)],
        };
        let chunks: Vec<RawChunk> = (0..10u64)
            .map(|i| RawChunk {
                start_element: i * 8,
                element_count: 8,
                data: vec![i as u8; 8],
            })
            .collect();
        let encoded = encode_chunks(chunks, &pipeline, true).unwrap();
        assert_eq!(encoded.len(), 10);
        for (i, c) in encoded.iter().enumerate() {
            assert_eq!(c.start_element, i as u64 * 8);
            assert_eq!(c.raw_size, 8);
            let back = decompress_chunk(&c.data, &pipeline, c.filter_mask, 8).unwrap();
            assert_eq!(back, vec![i as u8; 8]);
        }
    }
}
