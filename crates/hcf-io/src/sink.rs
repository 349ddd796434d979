//! Atomic file destination.

use std::fmt;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// A seekable sink that writes into a temp file next to `target` and only
/// renames it into place on [`persist`](AtomicFileSink::persist).
///
/// Dropping the sink without persisting deletes the temp file.
pub struct AtomicFileSink {
    target: PathBuf,
    inner: BufWriter<NamedTempFile>,
}

impl AtomicFileSink {
    /// Create a temp file in the directory of `target`.
    pub fn create<P: AsRef<Path>>(target: P) -> io::Result<Self> {
        let target = target.as_ref().to_path_buf();
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".hcf-partial-")
            .tempfile_in(dir)?;
        Ok(Self {
            target,
            inner: BufWriter::new(tmp),
        })
    }

    /// Final destination path.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Path of the scratch file while writing.
    pub fn temp_path(&self) -> &Path {
        self.inner.get_ref().path()
    }

    /// Flush and sync the temp file without moving it. The returned
    /// [`StagedFile`] can be read back before it is persisted.
    pub fn stage(self) -> io::Result<StagedFile> {
        let file = self.inner.into_inner().map_err(|e| e.into_error())?;
        file.as_file().sync_all()?;
        Ok(StagedFile {
            target: self.target,
            file,
        })
    }

    /// Flush and atomically move the temp file to the target path.
    pub fn persist(self) -> io::Result<PathBuf> {
        self.stage()?.persist()
    }
}

/// A complete temp file waiting to be moved to its target.
///
/// Dropping it deletes the temp file, so a rejected output never appears
/// at the target path.
pub struct StagedFile {
    target: PathBuf,
    file: NamedTempFile,
}

impl StagedFile {
    /// Where the file will land.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Current location of the finished bytes.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Atomically rename into place.
    pub fn persist(self) -> io::Result<PathBuf> {
        self.file.persist(&self.target).map_err(|e| e.error)?;
        Ok(self.target)
    }
}

impl fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedFile")
            .field("target", &self.target)
            .field("path", &self.path())
            .finish()
    }
}

impl Write for AtomicFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for AtomicFileSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl fmt::Debug for AtomicFileSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicFileSink")
            .field("target", &self.target)
            .field("temp", &self.temp_path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_moves_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.hcf");
        let mut sink = AtomicFileSink::create(&target).unwrap();
        sink.write_all(b"0000rest").unwrap();
        sink.seek(SeekFrom::Start(0)).unwrap();
        sink.write_all(b"HEAD").unwrap();
        assert!(!target.exists());
        let path = sink.persist().unwrap();
        assert_eq!(path, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"HEADrest");
    }

    #[test]
    fn drop_removes_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.hcf");
        let sink = AtomicFileSink::create(&target).unwrap();
        let scratch = sink.temp_path().to_path_buf();
        assert!(scratch.exists());
        drop(sink);
        assert!(!scratch.exists());
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn staged_file_is_readable_before_persist() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.hcf");
        let mut sink = AtomicFileSink::create(&target).unwrap();
        sink.write_all(b"complete").unwrap();
        let staged = sink.stage().unwrap();
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"complete");
        assert_eq!(staged.target(), target);
        assert!(!target.exists());
        assert_eq!(staged.persist().unwrap(), target);
        assert_eq!(std::fs::read(&target).unwrap(), b"complete");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn dropped_staged_file_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.hcf");
        let mut sink = AtomicFileSink::create(&target).unwrap();
        sink.write_all(b"rejected").unwrap();
        let staged = sink.stage().unwrap();
        let scratch = staged.path().to_path_buf();
        drop(staged);
        assert!(!scratch.exists());
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
