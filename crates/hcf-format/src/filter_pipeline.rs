//! Filter pipeline message (type 0x0B).
//!
//! ```text
//! version(1) filter_count(1)
//! { filter_id(2) flags(2) client_count(1) client_data(4 * client_count) }*
//! ```
//!
//! Filters run in stored order when writing and in reverse when reading.

use crate::cursor::Cursor;
use crate::error::FormatError;

/// Well-known filter IDs.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;

/// Description of a single filter in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    /// Filter identification value.
    pub filter_id: u16,
    /// Filter flags (bit 0 = optional).
    pub flags: u16,
    /// Client data values passed to the filter.
    pub client_data: Vec<u32>,
}

/// An ordered list of filters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterPipeline {
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    /// Shuffle with the given element size.
    pub fn shuffle(element_size: u32) -> FilterDescription {
        FilterDescription {
            filter_id: FILTER_SHUFFLE,
            flags: 0,
            client_data: vec![element_size],
        }
    }

    /// Deflate at the given level.
    pub fn deflate(level: u32) -> FilterDescription {
        FilterDescription {
            filter_id: FILTER_DEFLATE,
            flags: 0,
            client_data: vec![level],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Deflate level, if the pipeline deflates.
    pub fn deflate_level(&self) -> Option<u32> {
        self.filters
            .iter()
            .find(|f| f.filter_id == FILTER_DEFLATE)
            .and_then(|f| f.client_data.first().copied())
    }

    /// Whether the pipeline shuffles.
    pub fn has_shuffle(&self) -> bool {
        self.filters.iter().any(|f| f.filter_id == FILTER_SHUFFLE)
    }

    pub fn parse(data: &[u8]) -> Result<FilterPipeline, FormatError> {
        let mut c = Cursor::new(data, 0);
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedMessageVersion {
                message: "filter pipeline",
                version,
            });
        }
        let count = c.u8()? as usize;
        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let filter_id = c.u16()?;
            let flags = c.u16()?;
            let n = c.u8()? as usize;
            let mut client_data = Vec::with_capacity(n);
            for _ in 0..n {
                client_data.push(c.u32()?);
            }
            if !matches!(filter_id, FILTER_DEFLATE | FILTER_SHUFFLE) {
                return Err(FormatError::UnsupportedFilter(filter_id));
            }
            filters.push(FilterDescription {
                filter_id,
                flags,
                client_data,
            });
        }
        Ok(FilterPipeline { filters })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(1);
        buf.push(self.filters.len() as u8);
        for f in &self.filters {
            buf.extend_from_slice(&f.filter_id.to_le_bytes());
            buf.extend_from_slice(&f.flags.to_le_bytes());
            buf.push(f.client_data.len() as u8);
            for v in &f.client_data {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        buf
    }
}
