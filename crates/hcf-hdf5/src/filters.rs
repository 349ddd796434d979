//! Filter pipeline message (0x000B) and reversing it on chunk bytes.

use hcf_filters::{deflate_decompress_bounded, unshuffle};

use crate::cursor::{pad8, Cursor, Sizes};
use crate::error::Hdf5Error;

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

/// Filter flag: a chunk may skip this filter if it fails.
const FLAG_OPTIONAL: u16 = 0x0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: u16,
    pub flags: u16,
    pub client_data: Vec<u32>,
}

impl Filter {
    pub fn deflate(level: u32) -> Self {
        Filter {
            id: FILTER_DEFLATE,
            flags: FLAG_OPTIONAL,
            client_data: vec![level],
        }
    }

    pub fn shuffle(element_size: usize) -> Self {
        Filter {
            id: FILTER_SHUFFLE,
            flags: FLAG_OPTIONAL,
            client_data: vec![element_size as u32],
        }
    }
}

/// Filters in the order they were applied when writing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPipeline {
    pub filters: Vec<Filter>,
}

impl FilterPipeline {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn parse(body: &[u8], sizes: Sizes) -> Result<Self, Hdf5Error> {
        let mut c = Cursor::new(body, 0, sizes);
        let version = c.u8()?;
        let count = c.u8()? as usize;
        if version == 1 {
            c.skip(6)?;
        } else if version != 2 {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "filter pipeline",
                version,
            });
        }
        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let id = c.u16()?;
            let name_len = if version == 1 || id >= 256 {
                c.u16()? as usize
            } else {
                0
            };
            let flags = c.u16()?;
            let ncd = c.u16()? as usize;
            if version == 1 {
                c.skip(pad8(name_len))?;
            } else {
                c.skip(name_len)?;
            }
            let client_data = (0..ncd).map(|_| c.u32()).collect::<Result<Vec<_>, _>>()?;
            if version == 1 && ncd % 2 == 1 {
                c.skip(4)?;
            }
            filters.push(Filter {
                id,
                flags,
                client_data,
            });
        }
        Ok(FilterPipeline { filters })
    }

    /// Version 2 encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![2, self.filters.len() as u8];
        for f in &self.filters {
            out.extend_from_slice(&f.id.to_le_bytes());
            out.extend_from_slice(&f.flags.to_le_bytes());
            out.extend_from_slice(&(f.client_data.len() as u16).to_le_bytes());
            for v in &f.client_data {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    /// Undo the pipeline on one stored chunk. Bit `i` of `mask` set means
    /// filter `i` was skipped for this chunk. `limit` caps the size of any
    /// intermediate result, normally the chunk's raw size.
    pub fn reverse(
        &self,
        data: Vec<u8>,
        mask: u32,
        element_size: usize,
        limit: usize,
    ) -> Result<Vec<u8>, Hdf5Error> {
        let mut buf = data;
        for (i, f) in self.filters.iter().enumerate().rev() {
            if i < 32 && mask & (1 << i) != 0 {
                continue;
            }
            buf = match f.id {
                FILTER_DEFLATE => deflate_decompress_bounded(&buf, limit)?,
                FILTER_SHUFFLE => {
                    let size = f
                        .client_data
                        .first()
                        .map_or(element_size, |&s| s as usize);
                    unshuffle_with_tail(&buf, size)?
                }
                FILTER_FLETCHER32 => strip_fletcher32(buf)?,
                other => return Err(Hdf5Error::unsupported(format!("filter {other}"))),
            };
        }
        Ok(buf)
    }
}

/// Bytes past the last whole element are left as they are.
fn unshuffle_with_tail(data: &[u8], size: usize) -> Result<Vec<u8>, Hdf5Error> {
    if size <= 1 {
        return Ok(data.to_vec());
    }
    let whole = data.len() - data.len() % size;
    let mut out = unshuffle(&data[..whole], size)?;
    out.extend_from_slice(&data[whole..]);
    Ok(out)
}

/// Fletcher-32 over 16-bit big-endian words; an odd last byte is padded.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    for block in data.chunks(360 * 2) {
        for word in block.chunks(2) {
            let w = match *word {
                [hi, lo] => (u32::from(hi) << 8) | u32::from(lo),
                [hi] => u32::from(hi) << 8,
                _ => 0,
            };
            sum1 += w;
            sum2 += sum1;
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }
    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    (sum2 << 16) | sum1
}

fn strip_fletcher32(mut data: Vec<u8>) -> Result<Vec<u8>, Hdf5Error> {
    if data.len() < 4 {
        return Err(Hdf5Error::corrupt("fletcher32 chunk shorter than its checksum"));
    }
    let body_len = data.len() - 4;
    let stored = u32::from_le_bytes([
        data[body_len],
        data[body_len + 1],
        data[body_len + 2],
        data[body_len + 3],
    ]);
    let computed = fletcher32(&data[..body_len]);
    // Old library versions stored each 16-bit half byte-swapped.
    let swapped = ((computed & 0x00ff_00ff) << 8) | ((computed >> 8) & 0x00ff_00ff);
    if stored != computed && stored != swapped {
        return Err(Hdf5Error::ChecksumMismatch {
            what: "fletcher32 chunk",
            address: 0,
            stored,
            computed,
        });
    }
    data.truncate(body_len);
    Ok(data)
}
