//! Byte-stream filters for HCF chunk storage.
//!
//! Provides zlib (deflate) compression through `flate2` and the byte
//! shuffle transform that groups the n-th byte of every element together
//! before compression.

use std::io::{Read, Write};

use thiserror::Error;

/// Highest deflate level accepted by [`deflate_compress`].
pub const MAX_LEVEL: u32 = 9;

/// Lowest deflate level accepted by [`deflate_compress`].
pub const MIN_LEVEL: u32 = 1;

/// Errors raised by the filters in this crate.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The requested deflate level is outside `MIN_LEVEL..=MAX_LEVEL`.
    #[error("deflate level {0} out of range {MIN_LEVEL}..={MAX_LEVEL}")]
    InvalidLevel(u32),
    /// The zlib encoder failed.
    #[error("deflate compression failed: {0}")]
    Compress(#[source] std::io::Error),
    /// The zlib stream could not be decoded.
    #[error("deflate decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
    /// Decompressed output does not have the size recorded for the chunk.
    #[error("decompressed {actual} bytes, expected {expected}")]
    SizeMismatch {
        /// Size recorded in the chunk index.
        expected: usize,
        /// Size actually produced.
        actual: usize,
    },
    /// The zlib stream expands past the caller's limit.
    #[error("decompressed output exceeds {limit} bytes")]
    TooLarge {
        /// Largest output the caller accepts.
        limit: usize,
    },
    /// Shuffle input is not a whole number of elements.
    #[error("shuffle: {len} bytes is not a multiple of element size {element_size}")]
    ShuffleLength {
        /// Input length in bytes.
        len: usize,
        /// Element size in bytes.
        element_size: usize,
    },
}

/// Compress `data` into a zlib stream at `level` (1..=9).
pub fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, FilterError> {
    if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
        return Err(FilterError::InvalidLevel(level));
    }
    let mut encoder = flate2::write::ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        flate2::Compression::new(level),
    );
    encoder.write_all(data).map_err(FilterError::Compress)?;
    encoder.finish().map_err(FilterError::Compress)
}

/// Decompress a zlib stream.
///
/// `expected_size` pre-sizes the output buffer and is checked against the
/// decoded length. Pass `None` when the size is unknown.
pub fn deflate_decompress(data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>, FilterError> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut result = Vec::with_capacity(expected_size.unwrap_or(data.len() * 2));
    decoder
        .read_to_end(&mut result)
        .map_err(FilterError::Decompress)?;
    if let Some(expected) = expected_size {
        if result.len() != expected {
            return Err(FilterError::SizeMismatch {
                expected,
                actual: result.len(),
            });
        }
    }
    Ok(result)
}

/// Decompress a zlib stream that must not expand past `limit` bytes.
///
/// The limit usually comes from an untrusted index, so the output buffer
/// grows with the decoded bytes instead of being sized from it up front.
pub fn deflate_decompress_bounded(data: &[u8], limit: usize) -> Result<Vec<u8>, FilterError> {
    let cap = limit.min(data.len().saturating_mul(4));
    let mut result = Vec::with_capacity(cap);
    let bound = (limit as u64).saturating_add(1);
    flate2::read::ZlibDecoder::new(data)
        .take(bound)
        .read_to_end(&mut result)
        .map_err(FilterError::Decompress)?;
    if result.len() > limit {
        return Err(FilterError::TooLarge { limit });
    }
    Ok(result)
}

/// Shuffle: group bytes by position within each element.
///
/// Element sizes of 0 or 1 are passed through unchanged.
pub fn shuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>, FilterError> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    if data.len() % element_size != 0 {
        return Err(FilterError::ShuffleLength {
            len: data.len(),
            element_size,
        });
    }
    let num_elements = data.len() / element_size;
    let mut result = vec![0u8; data.len()];

    for i in 0..num_elements {
        for j in 0..element_size {
            result[j * num_elements + i] = data[i * element_size + j];
        }
    }

    Ok(result)
}

/// Unshuffle: restore elements to their natural byte order.
pub fn unshuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>, FilterError> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    if data.len() % element_size != 0 {
        return Err(FilterError::ShuffleLength {
            len: data.len(),
            element_size,
        });
    }
    let num_elements = data.len() / element_size;
    let mut result = vec![0u8; data.len()];

    for i in 0..num_elements {
        for j in 0..element_size {
            result[i * element_size + j] = data[j * num_elements + i];
        }
    }

    Ok(result)
}
