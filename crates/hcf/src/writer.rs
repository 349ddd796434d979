//! Writing API: a [`WriteContainer`] over any seekable sink.
//!
//! Dataset storage is streamed to the sink as each dataset is created. The
//! container only becomes readable when [`WriteContainer::finalize`] writes
//! the object headers and the superblock.

use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hcf_format::attribute::AttributeMessage;
use hcf_format::dataspace::Dataspace;
use hcf_format::file_writer::FileWriter;
use hcf_io::{AtomicFileSink, StagedFile};

use crate::codec::{CodecAdapter, CodecConfig, EncodedDataset};
use crate::container::{ContainerFormat, DestinationTarget};
use crate::error::{Error, Result};
use crate::hdf5::Hdf5Sink;
use crate::node::{Finalized, WriteContainer};
use crate::path::NodePath;
use crate::types::{element_count, Array, ArrayData, DType};

/// Writes a container into `W`.
#[derive(Debug)]
pub struct Writer<W: Write + Seek> {
    inner: FileWriter<W>,
}

impl<W: Write + Seek> Writer<W> {
    pub fn new(sink: W) -> Result<Self> {
        Ok(Self {
            inner: FileWriter::new(sink)?,
        })
    }

    /// Bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written()
    }

    /// Borrow the sink. Not a readable container before finalization.
    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.inner.contains(&path.key())
    }
}

/// Types the reader can decode again. Zero-width strings have no element
/// size and are refused.
pub(crate) fn check_dtype(path: &NodePath, dtype: DType) -> Result<()> {
    if dtype == DType::FixedString(0) {
        return Err(Error::UnsupportedType(format!("{path}: zero-width string")));
    }
    Ok(())
}

pub(crate) fn check_payload(path: &NodePath, shape: &[u64], dtype: DType, payload: &ArrayData) -> Result<()> {
    check_dtype(path, dtype)?;
    if payload.dtype() != dtype {
        return Err(Error::UnsupportedType(format!(
            "{path}: payload is {}, dataset declared {dtype}",
            payload.dtype()
        )));
    }
    let expected = element_count(shape).unwrap_or(u64::MAX);
    if expected != payload.len() as u64 {
        return Err(Error::ShapeMismatch {
            shape: shape.to_vec(),
            expected,
            actual: payload.len() as u64,
        });
    }
    Ok(())
}

impl<W: Write + Seek> WriteContainer for Writer<W> {
    type Output = W;

    fn create_group(&mut self, path: &NodePath) -> Result<()> {
        if path.is_root() {
            return Err(Error::DuplicatePath(path.to_string()));
        }
        Ok(self.inner.create_group(&path.key())?)
    }

    fn create_dataset(
        &mut self,
        path: &NodePath,
        shape: &[u64],
        dtype: DType,
        payload: &ArrayData,
        codec: &CodecConfig,
    ) -> Result<u64> {
        check_payload(path, shape, dtype, payload)?;
        if path.is_root() || self.contains(path) {
            return Err(Error::DuplicatePath(path.to_string()));
        }
        let encoded = CodecAdapter::new(codec).encode(payload, shape)?;
        let stored = encoded.stored_len() as u64;
        let key = path.key();
        let datatype = dtype.to_datatype();
        let dataspace = Dataspace::simple(shape);
        match encoded {
            EncodedDataset::Contiguous { raw } => {
                self.inner
                    .write_contiguous_dataset(&key, datatype, dataspace, &raw)?;
            }
            EncodedDataset::Chunked {
                chunk_dims,
                pipeline,
                chunks,
            } => {
                self.inner
                    .write_chunked_dataset(&key, datatype, dataspace, chunk_dims, pipeline, chunks)?;
            }
        }
        Ok(stored)
    }

    fn set_attribute(&mut self, path: &NodePath, name: &str, value: &Array) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidPath(format!("{path}: empty attribute name")));
        }
        check_dtype(path, value.dtype())?;
        let msg = AttributeMessage {
            name: name.to_string(),
            datatype: value.dtype().to_datatype(),
            dataspace: Dataspace::simple(value.shape()),
            raw_data: value.data().encode(),
        };
        Ok(self.inner.set_attribute(&path.key(), msg)?)
    }

    fn finalize(self) -> Result<Finalized<W>> {
        let (output, bytes_written) = self.inner.finish()?;
        Ok(Finalized {
            output,
            bytes_written,
        })
    }
}

/// What a finalized [`Destination`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationOutput {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Bytes under a [`Destination`]: a buffer or an atomically renamed file.
#[derive(Debug)]
pub enum DestinationSink {
    Memory(Cursor<Vec<u8>>),
    File(AtomicFileSink),
}

impl Write for DestinationSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DestinationSink::Memory(c) => c.write(buf),
            DestinationSink::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DestinationSink::Memory(c) => c.flush(),
            DestinationSink::File(f) => f.flush(),
        }
    }
}

impl Seek for DestinationSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            DestinationSink::Memory(c) => c.seek(pos),
            DestinationSink::File(f) => f.seek(pos),
        }
    }
}

#[derive(Debug)]
enum Encoder {
    Hcf(Writer<DestinationSink>),
    Hdf5(Hdf5Sink<DestinationSink>),
}

/// A destination container of either format, in memory or in a file that
/// only appears at its target path once finalized.
#[derive(Debug)]
pub struct Destination {
    encoder: Encoder,
}

impl Destination {
    /// An HCF container in memory.
    pub fn memory() -> Result<Self> {
        Self::create(&DestinationTarget::Memory, ContainerFormat::Hcf)
    }

    /// An HCF container written to a scratch file next to `target`;
    /// `target` only appears on finalize.
    pub fn file<P: AsRef<Path>>(target: P) -> Result<Self> {
        Self::create(
            &DestinationTarget::Path(target.as_ref().to_path_buf()),
            ContainerFormat::Hcf,
        )
    }

    pub fn create(target: &DestinationTarget, format: ContainerFormat) -> Result<Self> {
        let sink = match target {
            DestinationTarget::Memory => DestinationSink::Memory(Cursor::new(Vec::new())),
            DestinationTarget::Path(path) => DestinationSink::File(
                AtomicFileSink::create(path).map_err(Error::DestinationWriteFailure)?,
            ),
        };
        let encoder = match format {
            ContainerFormat::Hcf => Encoder::Hcf(Writer::new(sink)?),
            ContainerFormat::Hdf5 => Encoder::Hdf5(Hdf5Sink::new(sink)?),
        };
        Ok(Self { encoder })
    }

    pub fn format(&self) -> ContainerFormat {
        match self.encoder {
            Encoder::Hcf(_) => ContainerFormat::Hcf,
            Encoder::Hdf5(_) => ContainerFormat::Hdf5,
        }
    }

    fn sink(&self) -> &DestinationSink {
        match &self.encoder {
            Encoder::Hcf(w) => w.get_ref(),
            Encoder::Hdf5(w) => w.get_ref(),
        }
    }

    /// Path of the scratch file, for file destinations.
    pub fn scratch_path(&self) -> Option<&Path> {
        match self.sink() {
            DestinationSink::Memory(_) => None,
            DestinationSink::File(f) => Some(f.temp_path()),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        match &self.encoder {
            Encoder::Hcf(w) => w.bytes_written(),
            Encoder::Hdf5(w) => w.bytes_written(),
        }
    }

    fn finish(self) -> Result<(DestinationSink, u64)> {
        let done = match self.encoder {
            Encoder::Hcf(w) => w.finalize()?,
            Encoder::Hdf5(w) => w.finalize()?,
        };
        Ok((done.output, done.bytes_written))
    }

    /// Complete a file destination without moving it to its target. The
    /// staged file can be read back, then persisted or dropped.
    pub fn finalize_staged(self) -> Result<Finalized<StagedFile>> {
        if let DestinationSink::Memory(_) = self.sink() {
            return Err(Error::InvalidConfig(
                "only file destinations can be staged".into(),
            ));
        }
        match self.finish()? {
            (DestinationSink::File(f), bytes_written) => Ok(Finalized {
                output: f.stage().map_err(Error::DestinationWriteFailure)?,
                bytes_written,
            }),
            (DestinationSink::Memory(_), _) => Err(Error::InvalidConfig(
                "only file destinations can be staged".into(),
            )),
        }
    }
}

/// A file [`Destination`] whose finalize stops at [`StagedFile`], leaving
/// the target path untouched until the caller persists it.
#[derive(Debug)]
pub struct Staging(Destination);

impl Destination {
    pub fn staging(self) -> Staging {
        Staging(self)
    }
}

impl WriteContainer for Staging {
    type Output = StagedFile;

    fn create_group(&mut self, path: &NodePath) -> Result<()> {
        self.0.create_group(path)
    }

    fn create_dataset(
        &mut self,
        path: &NodePath,
        shape: &[u64],
        dtype: DType,
        payload: &ArrayData,
        codec: &CodecConfig,
    ) -> Result<u64> {
        self.0.create_dataset(path, shape, dtype, payload, codec)
    }

    fn set_attribute(&mut self, path: &NodePath, name: &str, value: &Array) -> Result<()> {
        self.0.set_attribute(path, name, value)
    }

    fn finalize(self) -> Result<Finalized<StagedFile>> {
        self.0.finalize_staged()
    }
}

impl WriteContainer for Destination {
    type Output = DestinationOutput;

    fn create_group(&mut self, path: &NodePath) -> Result<()> {
        match &mut self.encoder {
            Encoder::Hcf(w) => w.create_group(path),
            Encoder::Hdf5(w) => w.create_group(path),
        }
    }

    fn create_dataset(
        &mut self,
        path: &NodePath,
        shape: &[u64],
        dtype: DType,
        payload: &ArrayData,
        codec: &CodecConfig,
    ) -> Result<u64> {
        match &mut self.encoder {
            Encoder::Hcf(w) => w.create_dataset(path, shape, dtype, payload, codec),
            Encoder::Hdf5(w) => w.create_dataset(path, shape, dtype, payload, codec),
        }
    }

    fn set_attribute(&mut self, path: &NodePath, name: &str, value: &Array) -> Result<()> {
        match &mut self.encoder {
            Encoder::Hcf(w) => w.set_attribute(path, name, value),
            Encoder::Hdf5(w) => w.set_attribute(path, name, value),
        }
    }

    fn finalize(self) -> Result<Finalized<DestinationOutput>> {
        let (sink, bytes_written) = self.finish()?;
        let output = match sink {
            DestinationSink::Memory(c) => DestinationOutput::Bytes(c.into_inner()),
            DestinationSink::File(f) => {
                DestinationOutput::File(f.persist().map_err(Error::DestinationWriteFailure)?)
            }
        };
        Ok(Finalized {
            output,
            bytes_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::node::{NodeKind, ReadContainer};
    use crate::reader::File;

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    fn finish(w: Writer<Cursor<Vec<u8>>>) -> File {
        File::from_bytes(w.finalize().unwrap().output.into_inner()).unwrap()
    }

    #[test]
    fn write_then_read() {
        let mut w = Writer::new(Cursor::new(Vec::new())).unwrap();
        let codec = CodecConfig::default();
        w.create_group(&p("g")).unwrap();
        let data = ArrayData::F64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        w.create_dataset(&p("g/d"), &[2, 3], DType::F64, &data, &codec)
            .unwrap();
        w.set_attribute(&p("g/d"), "units", &Array::scalar(vec!["m".to_string()]).unwrap())
            .unwrap();
        w.set_attribute(&NodePath::root(), "title", &Array::from(vec![1u8, 2]))
            .unwrap();

        let file = finish(w);
        let d = file.dataset("g/d").unwrap();
        assert_eq!(d.shape(), &[2, 3]);
        assert_eq!(d.dtype().unwrap(), DType::F64);
        assert_eq!(d.read_f64().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let storage = d.storage().unwrap();
        assert_eq!(storage.deflate_level, Some(9));
        assert!(storage.shuffle);
        assert_eq!(storage.chunk_count, 1);

        let attrs = d.attrs().unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "units");
        assert_eq!(attrs[0].value.shape(), &[] as &[u64]);

        let root_attrs = file.root_group().attrs().unwrap();
        assert_eq!(root_attrs[0].value.data().as_u8(), Some(&[1u8, 2][..]));
        assert_eq!(file.root_group().member_names().unwrap(), vec!["g"]);
        assert_eq!(
            file.node_kind(file.root()).unwrap(),
            NodeKind::Group
        );
    }

    #[test]
    fn dataset_errors() {
        let mut w = Writer::new(Cursor::new(Vec::new())).unwrap();
        let codec = CodecConfig::default();
        let data = ArrayData::I32(vec![1, 2, 3]);

        let err = w
            .create_dataset(&p("d"), &[4], DType::I32, &data, &codec)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

        let err = w
            .create_dataset(&p("d"), &[3], DType::I64, &data, &codec)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);

        let strings = ArrayData::fixed_strings(4, &["ab"]).unwrap();
        let err = w
            .create_dataset(&p("s"), &[1], DType::FixedString(8), &strings, &codec)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);

        w.create_dataset(&p("d"), &[3], DType::I32, &data, &codec)
            .unwrap();
        let err = w
            .create_dataset(&p("d"), &[3], DType::I32, &data, &codec)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicatePath);

        let err = w
            .create_dataset(&p("missing/d"), &[3], DType::I32, &data, &codec)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NodeNotFound);

        let err = w
            .create_dataset(&p("d/x"), &[3], DType::I32, &data, &codec)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAGroup);
    }

    #[test]
    fn zero_width_strings_are_refused() {
        let mut w = Writer::new(Cursor::new(Vec::new())).unwrap();
        let empty = ArrayData::FixedString {
            width: 0,
            bytes: Vec::new(),
        };
        let err = w
            .create_dataset(&p("s"), &[1], DType::FixedString(0), &empty, &CodecConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert!(!w.contains(&p("s")));

        let value = Array::new(vec![0], empty).unwrap();
        let err = w.set_attribute(&NodePath::root(), "blank", &value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);

        // Nothing unreadable was written.
        let file = finish(w);
        assert!(file.root_group().attrs().unwrap().is_empty());
        assert!(file.root_group().member_names().unwrap().is_empty());
    }

    #[test]
    fn group_and_attribute_errors() {
        let mut w = Writer::new(Cursor::new(Vec::new())).unwrap();
        assert_eq!(
            w.create_group(&NodePath::root()).unwrap_err().kind(),
            ErrorKind::DuplicatePath
        );
        w.create_group(&p("g")).unwrap();
        assert_eq!(
            w.create_group(&p("g")).unwrap_err().kind(),
            ErrorKind::DuplicatePath
        );
        assert_eq!(
            w.create_group(&p("a/b")).unwrap_err().kind(),
            ErrorKind::NodeNotFound
        );

        let v = Array::scalar(vec![1i64]).unwrap();
        assert_eq!(
            w.set_attribute(&p("h"), "k", &v).unwrap_err().kind(),
            ErrorKind::NodeNotFound
        );
        w.set_attribute(&p("g"), "k", &v).unwrap();
        let err = w.set_attribute(&p("g"), "k", &v).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateAttribute);
        assert_eq!(err.to_string(), "attribute \"k\" already set on g");
    }

    #[test]
    fn stored_mode_is_contiguous() {
        let mut w = Writer::new(Cursor::new(Vec::new())).unwrap();
        let data = ArrayData::U32((0..10).collect());
        let stored = w
            .create_dataset(&p("d"), &[10], DType::U32, &data, &CodecConfig::stored())
            .unwrap();
        assert_eq!(stored, 40);
        let file = finish(w);
        let storage = file.dataset("d").unwrap().storage().unwrap();
        assert_eq!(storage.chunk_dims, None);
        assert_eq!(storage.deflate_level, None);
        assert_eq!(storage.stored_bytes, 40);
    }

    #[test]
    fn file_destination_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("compressed_x.hcf");
        let mut dest = Destination::file(&target).unwrap();
        dest.create_group(&p("g")).unwrap();
        let scratch = dest.scratch_path().unwrap().to_path_buf();
        assert!(scratch.exists());
        assert!(!target.exists());

        let done = dest.finalize().unwrap();
        assert_eq!(done.output, DestinationOutput::File(target.clone()));
        assert!(!scratch.exists());
        let file = File::open(&target).unwrap();
        assert!(file.is_mmap());
        assert_eq!(file.stored_size(), done.bytes_written);
        assert!(file.group("g").is_ok());
    }

    #[test]
    fn hdf5_file_destination() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("compressed_x.h5");
        let mut dest =
            Destination::create(&DestinationTarget::Path(target.clone()), ContainerFormat::Hdf5)
                .unwrap();
        assert_eq!(dest.format(), ContainerFormat::Hdf5);
        dest.create_group(&p("g")).unwrap();
        dest.create_dataset(
            &p("g/d"),
            &[4],
            DType::U16,
            &ArrayData::U16(vec![1, 2, 3, 4]),
            &CodecConfig::default(),
        )
        .unwrap();
        assert!(dest.bytes_written() > 0);
        let done = dest.finalize().unwrap();
        assert_eq!(done.output, DestinationOutput::File(target.clone()));
        let bytes = std::fs::read(&target).unwrap();
        assert_eq!(bytes.len() as u64, done.bytes_written);
        assert!(hcf_hdf5::is_hdf5(&bytes));
    }

    #[test]
    fn staged_destination_waits_for_persist() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("compressed_x.hcf");
        let mut dest = Destination::file(&target).unwrap();
        dest.create_group(&p("g")).unwrap();
        let staged = dest.finalize_staged().unwrap();
        assert!(!target.exists());
        let file = File::open(staged.output.path()).unwrap();
        assert!(file.group("g").is_ok());
        drop(file);
        assert_eq!(staged.output.persist().unwrap(), target);
        assert!(File::open(&target).unwrap().group("g").is_ok());

        let err = Destination::memory().unwrap().finalize_staged().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn staging_through_the_write_trait() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("compressed_y.hcf");
        let mut staging = Destination::file(&target).unwrap().staging();
        staging.create_group(&p("g")).unwrap();
        staging
            .set_attribute(&p("g"), "k", &Array::scalar(vec![3u32]).unwrap())
            .unwrap();
        let done = staging.finalize().unwrap();
        assert_eq!(done.output.target(), target.as_path());
        assert!(!target.exists());
        drop(done);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn dropped_file_destination_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.hcf");
        let mut dest = Destination::file(&target).unwrap();
        dest.create_group(&p("g")).unwrap();
        drop(dest);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
