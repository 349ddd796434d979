//! Apply a filter pipeline to chunk bytes.

use hcf_filters::FilterError;

use crate::error::FormatError;
use crate::filter_pipeline::{FilterPipeline, FILTER_DEFLATE, FILTER_SHUFFLE};

/// Run `data` through the pipeline in forward order.
pub fn compress_chunk(data: &[u8], pipeline: &FilterPipeline) -> Result<Vec<u8>, FilterError> {
    let mut result = data.to_vec();

    for filter in &pipeline.filters {
        result = match filter.filter_id {
            FILTER_SHUFFLE => {
                let element_size = filter.client_data.first().copied().unwrap_or(1);
                hcf_filters::shuffle(&result, element_size as usize)?
            }
            FILTER_DEFLATE => {
                let level = filter
                    .client_data
                    .first()
                    .copied()
                    .unwrap_or(hcf_filters::MAX_LEVEL);
                hcf_filters::deflate_compress(&result, level)?
            }
            // Unknown ids never reach a writer-built pipeline.
            _ => result,
        };
    }

    Ok(result)
}

/// Undo the pipeline, skipping filters whose bit is set in `filter_mask`.
///
/// The result must be exactly `raw_size` bytes.
pub fn decompress_chunk(
    stored: &[u8],
    pipeline: &FilterPipeline,
    filter_mask: u32,
    raw_size: usize,
) -> Result<Vec<u8>, FormatError> {
    let mut data = stored.to_vec();

    for (i, filter) in pipeline.filters.iter().enumerate().rev() {
        if i < 32 && filter_mask & (1 << i) != 0 {
            continue;
        }
        data = match filter.filter_id {
            FILTER_SHUFFLE => {
                let element_size = filter.client_data.first().copied().unwrap_or(1);
                hcf_filters::unshuffle(&data, element_size as usize)
                    .map_err(|e| FormatError::FilterFailed(e.to_string()))?
            }
            FILTER_DEFLATE => hcf_filters::deflate_decompress_bounded(&data, raw_size)
                .map_err(|e| FormatError::FilterFailed(e.to_string()))?,
            other => return Err(FormatError::UnsupportedFilter(other)),
        };
    }

    if data.len() != raw_size {
        return Err(FormatError::FilterFailed(format!(
            "chunk decoded to {} bytes, index says {raw_size}",
            data.len()
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> FilterPipeline {
        FilterPipeline {
            filters: vec![FilterPipeline::shuffle(4), FilterPipeline::deflate(9)],
        }
    }

    #[test]
    fn shuffle_deflate_roundtrip() {
        let raw: Vec<u8> = (0..1000u32).flat_map(|v| v.to_le_bytes()).collect();
        let stored = compress_chunk(&raw, &pipeline()).unwrap();
        assert!(stored.len() < raw.len());
        let back = decompress_chunk(&stored, &pipeline(), 0, raw.len()).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn masked_filter_is_skipped() {
        let raw: Vec<u8> = (0..64u32).flat_map(|v| v.to_le_bytes()).collect();
        // Only deflate applied; shuffle (bit 0) masked out.
        let stored = hcf_filters::deflate_compress(&raw, 9).unwrap();
        let back = decompress_chunk(&stored, &pipeline(), 0b01, raw.len()).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn wrong_raw_size_is_error() {
        let raw = vec![3u8; 40];
        let stored = compress_chunk(&raw, &pipeline()).unwrap();
        assert!(matches!(
            decompress_chunk(&stored, &pipeline(), 0, 41),
            Err(FormatError::FilterFailed(_))
        ));
    }

    #[test]
    fn inflated_stream_is_cut_off_at_raw_size() {
        let raw = vec![0u8; 1 << 20];
        let p = FilterPipeline {
            filters: vec![FilterPipeline::deflate(9)],
        };
        let stored = compress_chunk(&raw, &p).unwrap();
        assert!(matches!(
            decompress_chunk(&stored, &p, 0, 16),
            Err(FormatError::FilterFailed(_))
        ));
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let raw = vec![1u8, 2, 3];
        let p = FilterPipeline::default();
        assert_eq!(compress_chunk(&raw, &p).unwrap(), raw);
        assert_eq!(decompress_chunk(&raw, &p, 0, 3).unwrap(), raw);
    }
}
