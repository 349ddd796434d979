//! Local heaps: link names of symbol-table groups.

use crate::cursor::FileView;
use crate::error::Hdf5Error;

#[derive(Debug, Clone)]
pub struct LocalHeap<'a> {
    segment: &'a [u8],
}

impl<'a> LocalHeap<'a> {
    pub fn open(view: &FileView<'a>, address: u64) -> Result<Self, Hdf5Error> {
        let mut c = view.at(address)?;
        c.magic(b"HEAP", "local heap")?;
        let version = c.u8()?;
        if version != 0 {
            return Err(Hdf5Error::UnsupportedVersion {
                what: "local heap",
                version,
            });
        }
        c.skip(3)?;
        let size = c.length()?;
        c.length()?; // free list head
        let data = c.address()?;
        let size = usize::try_from(size).map_err(|_| Hdf5Error::corrupt("local heap size"))?;
        Ok(LocalHeap {
            segment: view.bytes(data, size)?,
        })
    }

    /// The NUL-terminated string at `offset` in the data segment.
    pub fn name(&self, offset: u64) -> Result<String, Hdf5Error> {
        let tail = usize::try_from(offset)
            .ok()
            .and_then(|o| self.segment.get(o..))
            .ok_or_else(|| Hdf5Error::corrupt(format!("local heap offset {offset}")))?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Hdf5Error::corrupt("unterminated local heap string"))?;
        String::from_utf8(tail[..end].to_vec())
            .map_err(|_| Hdf5Error::corrupt("link name is not UTF-8"))
    }
}
