//! The recompression driver.
//!
//! Walks the source tree once, recreating every node in the destination
//! with its payload passed through the codec and its attributes copied in
//! source order. The first failure aborts the run; the destination is then
//! dropped without being finalized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span};

use crate::codec::CodecConfig;
use crate::error::{Error, TranscodeError};
use crate::node::{NodeKind, ReadContainer, WriteContainer};
use crate::path::NodePath;
use crate::progress::{ProgressCallback, ProgressTick, Stats};
use crate::walker::TreeWalker;

/// Output of a successful run.
#[derive(Debug)]
pub struct Transcoded<O> {
    pub output: O,
    pub stats: Stats,
}

/// Configured recompression run.
pub struct Transcoder<'a> {
    codec: CodecConfig,
    progress: Option<&'a dyn ProgressCallback>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Transcoder<'a> {
    pub fn new(codec: CodecConfig) -> Self {
        Self {
            codec,
            progress: None,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Abort with [`Error::Cancelled`] once `flag` is set. Checked before
    /// each node.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Copy `source` into `destination` and finalize it.
    pub fn run<S, D>(
        &self,
        source: &S,
        mut destination: D,
    ) -> Result<Transcoded<D::Output>, TranscodeError>
    where
        S: ReadContainer + ?Sized,
        D: WriteContainer,
    {
        let at_root = |e: Error| TranscodeError::new(NodePath::root(), e);
        self.codec.validate().map_err(at_root)?;

        let span = info_span!("transcode", bytes_in = source.stored_size());
        let _guard = span.enter();

        let start = Instant::now();
        let estimated_total = source.object_count_hint().map(|n| n.saturating_sub(1));
        if let Some(p) = self.progress {
            p.on_started(estimated_total);
        }

        let mut stats = Stats {
            bytes_in: source.stored_size(),
            ..Stats::default()
        };

        for entry in TreeWalker::new(source) {
            let entry = entry?;
            let path = entry.path;
            let fail = |e: Error| TranscodeError::new(path.clone(), e);

            if self.cancelled() {
                return Err(fail(Error::Cancelled));
            }

            match &entry.kind {
                NodeKind::Group => {
                    if !path.is_root() {
                        destination.create_group(&path).map_err(fail)?;
                        stats.group_count += 1;
                    }
                }
                NodeKind::Dataset { shape, dtype } => {
                    let payload = source.read_payload(entry.id).map_err(fail)?;
                    stats.payload_bytes += payload.data().encoded_len() as u64;
                    let stored = destination
                        .create_dataset(&path, shape, *dtype, payload.data(), &self.codec)
                        .map_err(fail)?;
                    debug!(
                        path = %path,
                        dtype = %dtype,
                        elements = payload.len(),
                        stored,
                        "dataset written"
                    );
                    stats.dataset_count += 1;
                }
            }

            let attributes = source.list_attributes(entry.id).map_err(fail)?;
            for attr in &attributes {
                destination
                    .set_attribute(&path, &attr.name, &attr.value)
                    .map_err(fail)?;
            }
            stats.attribute_count += attributes.len() as u64;
            debug!(path = %path, attributes = attributes.len(), "node copied");

            if path.is_root() {
                continue;
            }
            stats.node_count += 1;
            if let Some(p) = self.progress {
                p.on_node_completed(&ProgressTick {
                    path,
                    processed: stats.node_count,
                    estimated_total,
                    elapsed: start.elapsed(),
                });
            }
        }

        let finalized = destination.finalize().map_err(at_root)?;
        stats.bytes_out = finalized.bytes_written;
        stats.elapsed = start.elapsed();

        info!(
            nodes = stats.node_count,
            groups = stats.group_count,
            datasets = stats.dataset_count,
            attributes = stats.attribute_count,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            reduction = format_args!("{:.1}%", stats.reduction_ratio() * 100.0),
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "transcode complete"
        );
        if let Some(p) = self.progress {
            p.on_finished(&stats);
        }

        Ok(Transcoded {
            output: finalized.output,
            stats,
        })
    }
}

/// Recompress `source` into `destination` with `codec` and no progress
/// reporting.
pub fn transcode<S, D>(
    source: &S,
    destination: D,
    codec: &CodecConfig,
) -> Result<Transcoded<D::Output>, TranscodeError>
where
    S: ReadContainer + ?Sized,
    D: WriteContainer,
{
    Transcoder::new(codec.clone()).run(source, destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::reader::File;
    use crate::testing::MockContainer;
    use crate::types::{Array, ArrayData, Attribute, DType};
    use crate::writer::{Destination, DestinationOutput, Writer};
    use std::cell::RefCell;
    use std::io::Cursor;

    fn sample() -> MockContainer {
        let mut m = MockContainer::new();
        m.attr(0, Attribute::new("title", Array::from(vec!["run 7".to_string()])));
        let g = m.group(0, "g");
        let d = m.dataset_with(
            g,
            "d",
            Array::new(vec![2, 2], ArrayData::F32(vec![1.0, f32::NAN, -0.0, 4.0])).unwrap(),
        );
        m.attr(d, Attribute::new("scale", Array::scalar(vec![0.5f64]).unwrap()));
        m.attr(d, Attribute::new("flags", Array::from(vec![true, false])));
        m.dataset(0, "empty", vec![0, 3], DType::U16);
        m
    }

    fn into_file(out: DestinationOutput) -> File {
        match out {
            DestinationOutput::Bytes(b) => File::from_bytes(b).unwrap(),
            DestinationOutput::File(p) => File::open(p).unwrap(),
        }
    }

    #[test]
    fn copies_everything_from_a_mock() {
        let src = sample();
        let done = transcode(&src, Destination::memory().unwrap(), &CodecConfig::default()).unwrap();
        let stats = &done.stats;
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.group_count, 1);
        assert_eq!(stats.dataset_count, 2);
        assert_eq!(stats.attribute_count, 3);
        assert_eq!(stats.payload_bytes, 16);

        let file = into_file(done.output);
        assert_eq!(stats.bytes_out, file.stored_size());
        let d = file.dataset("g/d").unwrap();
        assert_eq!(
            d.read().unwrap(),
            Array::new(vec![2, 2], ArrayData::F32(vec![1.0, f32::NAN, -0.0, 4.0])).unwrap()
        );
        let names: Vec<String> = d.attrs().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["scale", "flags"]);
        assert_eq!(file.root_group().attrs().unwrap().len(), 1);
        assert_eq!(file.dataset("empty").unwrap().shape(), &[0, 3]);
    }

    #[test]
    fn progress_ticks_in_walk_order() {
        let src = sample();
        let ticks = RefCell::new(Vec::new());
        let cb = |t: &ProgressTick| {
            ticks
                .borrow_mut()
                .push((t.path.to_string(), t.processed, t.estimated_total))
        };
        Transcoder::new(CodecConfig::default())
            .with_progress(&cb)
            .run(&src, Destination::memory().unwrap())
            .unwrap();
        assert_eq!(
            *ticks.borrow(),
            vec![
                ("g".to_string(), 1, Some(3)),
                ("g/d".to_string(), 2, Some(3)),
                ("empty".to_string(), 3, Some(3)),
            ]
        );
    }

    #[test]
    fn cancelled_before_first_node() {
        let src = sample();
        let flag = Arc::new(AtomicBool::new(true));
        let err = Transcoder::new(CodecConfig::default())
            .with_cancel_flag(flag)
            .run(&src, Destination::memory().unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(err.path.is_root());
    }

    #[test]
    fn cancelled_mid_run_leaves_no_file() {
        let src = sample();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("compressed_s.hcf");
        let flag = Arc::new(AtomicBool::new(false));
        let trip = Arc::clone(&flag);
        let cb = move |t: &ProgressTick| {
            if t.processed == 1 {
                trip.store(true, Ordering::Relaxed);
            }
        };
        let err = Transcoder::new(CodecConfig::default())
            .with_progress(&cb)
            .with_cancel_flag(flag)
            .run(&src, Destination::file(&target).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.path.to_string(), "g/d");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn malformed_source_aborts() {
        let mut src = sample();
        src.link(0, "loop", 0);
        let err = transcode(&src, Destination::memory().unwrap(), &CodecConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHierarchy);
        assert_eq!(err.path.to_string(), "loop");
    }

    #[test]
    fn payload_failure_names_the_dataset() {
        let mut src = MockContainer::new();
        let g = src.group(0, "g");
        let d = src.dataset(g, "bad", vec![4], DType::I64);
        src.corrupt_payload(d);
        let err = transcode(&src, Destination::memory().unwrap(), &CodecConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.to_string(), "g/bad: format error: filter failed: corrupt chunk");
    }

    #[test]
    fn invalid_level_is_rejected_up_front() {
        let src = sample();
        let mut codec = CodecConfig::default();
        codec.compression = crate::codec::Compression::Deflate { level: 0 };
        let err = transcode(&src, Destination::memory().unwrap(), &codec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn writes_into_any_seekable_sink() {
        let src = sample();
        let writer = Writer::new(Cursor::new(Vec::new())).unwrap();
        let done = transcode(&src, writer, &CodecConfig::default()).unwrap();
        let bytes = done.output.into_inner();
        assert_eq!(bytes.len() as u64, done.stats.bytes_out);
        assert!(File::from_bytes(bytes).unwrap().dataset("g/d").is_ok());
    }
}
