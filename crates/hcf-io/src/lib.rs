//! Backing stores for HCF and HDF5 containers.
//!
//! Sources are read through [`HcfRead`], which hands the whole container to
//! the format parser as one byte slice: either an owned buffer
//! ([`MemoryReader`], [`FileReader`]) or a memory map ([`MmapReader`]),
//! gathered in [`SourceData`].
//! Destinations are seekable sinks: an in-memory `Cursor<Vec<u8>>` or an
//! [`AtomicFileSink`] that only appears at its target path once persisted.

use std::io::{self, Read};
use std::path::Path;

pub mod mmap;
pub mod sink;

pub use mmap::MmapReader;
pub use sink::{AtomicFileSink, StagedFile};

/// Read-only access to HCF data.
pub trait HcfRead {
    /// Returns the entire container as a byte slice.
    fn as_bytes(&self) -> &[u8];

    /// Returns the length of the data in bytes.
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the data is empty.
    fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// In-memory reader backed by an owned `Vec<u8>`.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Vec<u8>,
}

impl MemoryReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Consume the reader and return the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl HcfRead for MemoryReader {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// File-backed reader that loads the entire file into memory.
#[derive(Debug)]
pub struct FileReader {
    data: Vec<u8>,
}

impl FileReader {
    /// Open a file and read its entire contents into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Self { data })
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl HcfRead for FileReader {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Any of the source backings, chosen at open time.
#[derive(Debug)]
pub enum SourceData {
    Memory(MemoryReader),
    File(FileReader),
    Mmap(MmapReader),
}

impl SourceData {
    /// Read `path` fully into memory.
    pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        FileReader::open(path).map(SourceData::File)
    }

    /// Memory-map `path`.
    pub fn map_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        MmapReader::open(path).map(SourceData::Mmap)
    }

    pub fn is_mmap(&self) -> bool {
        matches!(self, SourceData::Mmap(_))
    }
}

impl From<Vec<u8>> for SourceData {
    fn from(data: Vec<u8>) -> Self {
        SourceData::Memory(MemoryReader::new(data))
    }
}

impl AsRef<[u8]> for SourceData {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl HcfRead for SourceData {
    fn as_bytes(&self) -> &[u8] {
        match self {
            SourceData::Memory(r) => r.as_bytes(),
            SourceData::File(r) => r.as_bytes(),
            SourceData::Mmap(r) => r.as_bytes(),
        }
    }
}

/// Size of the file at `path` in bytes.
pub fn file_size<P: AsRef<Path>>(path: P) -> io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_reader() {
        let r = MemoryReader::new(vec![1, 2, 3]);
        assert_eq!(r.as_bytes(), &[1, 2, 3]);
        assert_eq!(r.len(), 3);
        assert!(!r.is_empty());
        assert_eq!(r.into_inner(), vec![1, 2, 3]);
    }

    #[test]
    fn file_reader_loads_everything() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello hcf").unwrap();
        tmp.flush().unwrap();
        let r = FileReader::open(tmp.path()).unwrap();
        assert_eq!(r.as_bytes(), b"hello hcf");
        assert_eq!(file_size(tmp.path()).unwrap(), 9);
    }

    #[test]
    fn source_data_backings_agree() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"same bytes").unwrap();
        tmp.flush().unwrap();
        let read = SourceData::read_file(tmp.path()).unwrap();
        let mapped = SourceData::map_file(tmp.path()).unwrap();
        let owned = SourceData::from(b"same bytes".to_vec());
        assert_eq!(read.as_bytes(), mapped.as_bytes());
        assert_eq!(owned.as_bytes(), read.as_bytes());
        assert!(mapped.is_mmap());
        assert!(!read.is_mmap());
        assert!(matches!(owned, SourceData::Memory(_)));
    }

    #[test]
    fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileReader::open(dir.path().join("nope.hcf")).is_err());
    }
}
