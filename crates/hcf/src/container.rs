//! Opening sources and creating destinations for a shell.

use std::path::{Path, PathBuf};

use hcf_io::{HcfRead, SourceData};

use crate::codec::CodecConfig;
use crate::error::{Error, Result};
use crate::hdf5::Hdf5Source;
use crate::node::{NodeKind, ObjectId, ReadContainer};
use crate::reader::File;
use crate::types::{Array, Attribute};
use crate::writer::Destination;

/// File extensions accepted as input.
pub const ACCEPTED_EXTENSIONS: [&str; 4] = ["hcf", "hcdf", "h5", "hdf5"];

/// Prefix of output file names.
pub const OUTPUT_PREFIX: &str = "compressed_";

/// Sources above this size are memory-mapped instead of read into memory.
pub const DEFAULT_DISK_BACKING_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Settings a shell passes to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub codec: CodecConfig,
    pub disk_backing_threshold: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            disk_backing_threshold: DEFAULT_DISK_BACKING_THRESHOLD,
        }
    }
}

impl ShellConfig {
    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_disk_backing_threshold(mut self, bytes: u64) -> Self {
        self.disk_backing_threshold = bytes;
        self
    }
}

/// Where a container's bytes live while it is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Memory,
    Disk,
}

impl Backing {
    /// `Disk` for anything larger than `threshold`.
    pub fn choose(size: u64, threshold: u64) -> Self {
        if size > threshold {
            Backing::Disk
        } else {
            Backing::Memory
        }
    }
}

/// A source container as handed over by a shell.
#[derive(Debug, Clone)]
pub enum SourceInput {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// Where the recompressed container should go.
#[derive(Debug, Clone)]
pub enum DestinationTarget {
    Memory,
    Path(PathBuf),
}

/// On-disk container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    Hcf,
    Hdf5,
}

impl ContainerFormat {
    /// Format named by a file extension, case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "hcf" | "hcdf" => Some(ContainerFormat::Hcf),
            "h5" | "hdf5" => Some(ContainerFormat::Hdf5),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Format of a container by its signature. Anything without an HDF5
    /// signature is handed to the HCF parser.
    pub fn detect(bytes: &[u8]) -> Self {
        if hcf_hdf5::is_hdf5(bytes) {
            ContainerFormat::Hdf5
        } else {
            ContainerFormat::Hcf
        }
    }
}

/// An opened source container of either format.
#[derive(Debug)]
pub enum Source {
    Hcf(File),
    Hdf5(Hdf5Source),
}

impl Source {
    /// Parse `data` in whichever format its signature names.
    pub fn from_data(data: SourceData) -> Result<Self> {
        match ContainerFormat::detect(data.as_bytes()) {
            ContainerFormat::Hcf => File::from_data(data).map(Source::Hcf),
            ContainerFormat::Hdf5 => Hdf5Source::from_data(data).map(Source::Hdf5),
        }
    }

    pub fn format(&self) -> ContainerFormat {
        match self {
            Source::Hcf(_) => ContainerFormat::Hcf,
            Source::Hdf5(_) => ContainerFormat::Hdf5,
        }
    }

    pub fn is_mmap(&self) -> bool {
        match self {
            Source::Hcf(f) => f.is_mmap(),
            Source::Hdf5(f) => f.is_mmap(),
        }
    }

    fn inner(&self) -> &dyn ReadContainer {
        match self {
            Source::Hcf(f) => f,
            Source::Hdf5(f) => f,
        }
    }
}

impl ReadContainer for Source {
    fn root(&self) -> ObjectId {
        self.inner().root()
    }

    fn node_kind(&self, id: ObjectId) -> Result<NodeKind> {
        self.inner().node_kind(id)
    }

    fn list_children(&self, id: ObjectId) -> Result<Vec<(String, ObjectId)>> {
        self.inner().list_children(id)
    }

    fn list_attributes(&self, id: ObjectId) -> Result<Vec<Attribute>> {
        self.inner().list_attributes(id)
    }

    fn read_payload(&self, id: ObjectId) -> Result<Array> {
        self.inner().read_payload(id)
    }

    fn stored_size(&self) -> u64 {
        self.inner().stored_size()
    }

    fn object_count_hint(&self) -> Option<u64> {
        self.inner().object_count_hint()
    }
}

fn unreadable<E>(e: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::UnreadableSource(Box::new(e))
}

/// Open a source container of either format. Any failure is
/// [`Error::UnreadableSource`].
pub fn open_source(input: SourceInput, config: &ShellConfig) -> Result<Source> {
    let data = match input {
        SourceInput::Bytes(bytes) => SourceData::from(bytes),
        SourceInput::Path(path) => {
            let size = hcf_io::file_size(&path).map_err(unreadable)?;
            match Backing::choose(size, config.disk_backing_threshold) {
                Backing::Disk => SourceData::map_file(&path).map_err(unreadable)?,
                Backing::Memory => SourceData::read_file(&path).map_err(unreadable)?,
            }
        }
    };
    Source::from_data(data).map_err(unreadable)
}

/// Create an empty destination container of `format`.
pub fn create_destination(target: DestinationTarget, format: ContainerFormat) -> Result<Destination> {
    Destination::create(&target, format)
}

/// `compressed_<name>`.
pub fn compressed_file_name(name: &str) -> String {
    format!("{OUTPUT_PREFIX}{name}")
}

/// Whether `path` ends in one of [`ACCEPTED_EXTENSIONS`] (case-insensitive).
pub fn has_accepted_extension(path: &Path) -> bool {
    ContainerFormat::from_path(path).is_some()
}

/// Output path for `input`: `compressed_<file name>` in `output_dir`, or
/// next to the input.
pub fn output_path_for(input: &Path, output_dir: Option<&Path>) -> Result<PathBuf> {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidPath(input.display().to_string()))?;
    let dir = match output_dir {
        Some(d) => d.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    Ok(dir.join(compressed_file_name(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::node::WriteContainer;
    use crate::writer::DestinationOutput;

    #[test]
    fn names_and_extensions() {
        assert_eq!(compressed_file_name("run.hcf"), "compressed_run.hcf");
        assert!(has_accepted_extension(Path::new("a/b/run.hcf")));
        assert!(has_accepted_extension(Path::new("run.HCDF")));
        assert!(has_accepted_extension(Path::new("run.h5")));
        assert!(has_accepted_extension(Path::new("run.HDF5")));
        assert!(!has_accepted_extension(Path::new("run.txt")));
        assert!(!has_accepted_extension(Path::new("hcf")));
        assert_eq!(
            ContainerFormat::from_path(Path::new("a/run.hdf5")),
            Some(ContainerFormat::Hdf5)
        );
        assert_eq!(
            ContainerFormat::from_path(Path::new("run.hcdf")),
            Some(ContainerFormat::Hcf)
        );
        assert_eq!(
            output_path_for(Path::new("/data/run.hcf"), None).unwrap(),
            PathBuf::from("/data/compressed_run.hcf")
        );
        assert_eq!(
            output_path_for(Path::new("run.hcf"), Some(Path::new("/out"))).unwrap(),
            PathBuf::from("/out/compressed_run.hcf")
        );
    }

    #[test]
    fn backing_choice() {
        assert_eq!(Backing::choose(10, 10), Backing::Memory);
        assert_eq!(Backing::choose(11, 10), Backing::Disk);
        assert_eq!(ShellConfig::default().disk_backing_threshold, 256 * 1024 * 1024);
    }

    #[test]
    fn garbage_is_unreadable() {
        let err = open_source(SourceInput::Bytes(b"not a container".to_vec()), &ShellConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnreadableSource);

        let dir = tempfile::tempdir().unwrap();
        let err = open_source(
            SourceInput::Path(dir.path().join("missing.hcf")),
            &ShellConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnreadableSource);
    }

    #[test]
    fn path_sources_pick_backing_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.hcf");
        let done = create_destination(DestinationTarget::Path(path.clone()), ContainerFormat::Hcf)
            .unwrap()
            .finalize()
            .unwrap();
        assert_eq!(done.output, DestinationOutput::File(path.clone()));

        let small = open_source(SourceInput::Path(path.clone()), &ShellConfig::default()).unwrap();
        assert!(!small.is_mmap());
        let config = ShellConfig::default().with_disk_backing_threshold(8);
        let big = open_source(SourceInput::Path(path), &config).unwrap();
        assert!(big.is_mmap());
        assert_eq!(big.format(), ContainerFormat::Hcf);
    }

    #[test]
    fn hdf5_sources_are_detected_by_signature() {
        let dir = tempfile::tempdir().unwrap();
        // The extension does not decide the parser.
        let path = dir.path().join("mislabeled.hcf");
        create_destination(DestinationTarget::Path(path.clone()), ContainerFormat::Hdf5)
            .unwrap()
            .finalize()
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(ContainerFormat::detect(&bytes), ContainerFormat::Hdf5);

        let source = open_source(SourceInput::Path(path), &ShellConfig::default()).unwrap();
        assert_eq!(source.format(), ContainerFormat::Hdf5);
        assert!(source.list_children(source.root()).unwrap().is_empty());

        let mut truncated = bytes;
        truncated.truncate(20);
        let err = open_source(SourceInput::Bytes(truncated), &ShellConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnreadableSource);
    }
}
