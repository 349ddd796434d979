//! Memory-mapped source reader.

use memmap2::Mmap;
use std::fs;
use std::io;
use std::path::Path;

use crate::HcfRead;

/// Memory-mapped file reader for large sources.
///
/// `as_bytes()` returns a slice into the mapping; nothing is copied until a
/// dataset is decoded.
pub struct MmapReader {
    _file: fs::File,
    mmap: Mmap,
}

impl MmapReader {
    /// Open a file and memory-map it for reading.
    ///
    /// The file must not be modified by another process while mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        // SAFETY: read-only mapping; concurrent modification is excluded by
        // the caller contract above.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Read a slice at the given offset without copying.
    pub fn read_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.mmap.get(offset..offset.checked_add(len)?)
    }
}

impl HcfRead for MmapReader {
    fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl std::fmt::Debug for MmapReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapReader")
            .field("len", &self.mmap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mmap_matches_file_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255).collect();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let reader = MmapReader::open(tmp.path()).unwrap();
        assert_eq!(reader.as_bytes(), &data[..]);
        assert_eq!(reader.len(), 256);
        assert_eq!(reader.read_at(10, 3), Some(&[10u8, 11, 12][..]));
        assert_eq!(reader.read_at(250, 10), None);
        assert_eq!(reader.read_at(usize::MAX, 2), None);
    }
}
