//! Codec adapter: turns a dataset payload into stored chunks.
//!
//! Chunks are row blocks along the first dimension. Each chunk is shuffled
//! (fixed-size elements wider than one byte) and then deflated.

use hcf_filters::{MAX_LEVEL, MIN_LEVEL};
use hcf_format::chunked_write::{encode_chunks, ChunkPlan, EncodedChunk, RawChunk};
use hcf_format::filter_pipeline::FilterPipeline;
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::{element_count, ArrayData};

/// Default deflate level.
pub const DEFAULT_LEVEL: u32 = 9;

/// Payloads larger than this are split into several chunks.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 64 * 1024;

/// Approximate encoded size of one chunk.
pub const DEFAULT_TARGET_CHUNK_BYTES: usize = 1024 * 1024;

/// Codec applied to dataset payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Store bytes as they are.
    None,
    /// zlib at `level` (1..=9).
    Deflate { level: u32 },
}

/// How datasets are stored in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    pub compression: Compression,
    pub chunking: bool,
    pub chunk_threshold: usize,
    pub target_chunk_bytes: usize,
    pub shuffle: bool,
    /// Compress the chunks of one dataset on the rayon pool.
    pub parallel: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Deflate {
                level: DEFAULT_LEVEL,
            },
            chunking: true,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            target_chunk_bytes: DEFAULT_TARGET_CHUNK_BYTES,
            shuffle: true,
            parallel: true,
        }
    }
}

impl CodecConfig {
    /// Uncompressed contiguous storage.
    pub fn stored() -> Self {
        Self {
            compression: Compression::None,
            chunking: false,
            shuffle: false,
            ..Self::default()
        }
    }

    /// Deflate at `level`, which must be in 1..=9.
    pub fn with_level(mut self, level: u32) -> Result<Self> {
        check_level(level)?;
        self.compression = Compression::Deflate { level };
        Ok(self)
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_chunking(mut self, chunking: bool) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_chunk_threshold(mut self, bytes: usize) -> Self {
        self.chunk_threshold = bytes;
        self
    }

    pub fn with_target_chunk_bytes(mut self, bytes: usize) -> Self {
        self.target_chunk_bytes = bytes;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Deflate level, if compressing.
    pub fn level(&self) -> Option<u32> {
        match self.compression {
            Compression::Deflate { level } => Some(level),
            Compression::None => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Compression::Deflate { level } = self.compression {
            check_level(level)?;
        }
        if self.target_chunk_bytes == 0 {
            return Err(Error::InvalidConfig("target chunk size must be positive".into()));
        }
        Ok(())
    }
}

fn check_level(level: u32) -> Result<()> {
    if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
        return Err(Error::InvalidConfig(format!(
            "compression level {level} outside {MIN_LEVEL}..={MAX_LEVEL}"
        )));
    }
    Ok(())
}

/// Storage produced for one dataset.
#[derive(Debug)]
pub enum EncodedDataset {
    Contiguous {
        raw: Vec<u8>,
    },
    Chunked {
        chunk_dims: Vec<u64>,
        pipeline: FilterPipeline,
        chunks: Vec<EncodedChunk>,
    },
}

impl EncodedDataset {
    /// Bytes that will be written for the payload.
    pub fn stored_len(&self) -> usize {
        match self {
            EncodedDataset::Contiguous { raw } => raw.len(),
            EncodedDataset::Chunked { chunks, .. } => chunks.iter().map(|c| c.data.len()).sum(),
        }
    }
}

/// Applies a [`CodecConfig`] to payloads.
#[derive(Debug, Clone, Copy)]
pub struct CodecAdapter<'a> {
    config: &'a CodecConfig,
}

impl<'a> CodecAdapter<'a> {
    pub fn new(config: &'a CodecConfig) -> Self {
        Self { config }
    }

    /// Filters for a payload of `data`'s element type.
    pub fn pipeline_for(&self, data: &ArrayData) -> FilterPipeline {
        let mut pipeline = FilterPipeline::default();
        if let Some(level) = self.config.level() {
            if self.config.shuffle {
                if let Some(width) = data.dtype().shuffle_width() {
                    pipeline.filters.push(FilterPipeline::shuffle(width));
                }
            }
            pipeline.filters.push(FilterPipeline::deflate(level));
        }
        pipeline
    }

    /// Row blocks for `payload`: one chunk unless chunking is on and the
    /// payload is above the threshold.
    pub fn plan(&self, payload: &ArrayData, shape: &[u64]) -> ChunkPlan {
        let encoded_len = payload.encoded_len();
        if self.config.chunking && encoded_len > self.config.chunk_threshold {
            let per_element = encoded_len as f64 / payload.len().max(1) as f64;
            ChunkPlan::with_target(shape, per_element, self.config.target_chunk_bytes)
        } else {
            ChunkPlan::single(shape)
        }
    }

    /// Encode `payload`, whose length must match `shape`.
    pub fn encode(&self, payload: &ArrayData, shape: &[u64]) -> Result<EncodedDataset> {
        self.config.validate()?;
        let expected = element_count(shape).unwrap_or(u64::MAX);
        if expected != payload.len() as u64 {
            return Err(Error::ShapeMismatch {
                shape: shape.to_vec(),
                expected,
                actual: payload.len() as u64,
            });
        }

        if self.config.level().is_none() && !self.config.chunking {
            return Ok(EncodedDataset::Contiguous {
                raw: payload.encode(),
            });
        }

        let encoded_len = payload.encoded_len();
        let plan = self.plan(payload, shape);
        let ranges = plan.ranges();
        trace!(
            bytes = encoded_len,
            chunks = ranges.len(),
            rows_per_chunk = plan.rows_per_chunk,
            "chunk plan"
        );

        let raw_chunks: Vec<RawChunk> = ranges
            .into_iter()
            .map(|(start, count)| RawChunk {
                start_element: start,
                element_count: count,
                data: payload.encode_range(start as usize, count as usize),
            })
            .collect();
        let pipeline = self.pipeline_for(payload);
        let chunks = encode_chunks(raw_chunks, &pipeline, self.config.parallel)?;
        Ok(EncodedDataset::Chunked {
            chunk_dims: plan.chunk_dims(),
            pipeline,
            chunks,
        })
    }
}
