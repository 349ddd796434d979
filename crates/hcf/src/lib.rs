//! Read, write and recompress hierarchical containers.
//!
//! A container is a tree of groups and typed, shaped datasets, with
//! attributes on every node. [`transcode`] copies a source container into
//! a destination where every dataset is chunked and deflate-compressed,
//! while the tree, the values and the attributes stay identical.
//!
//! HCF and HDF5 files are both read and written; [`open_source`] tells
//! them apart by signature.
//!
//! ```no_run
//! use hcf::{transcode, CodecConfig, Destination, File};
//!
//! let source = File::open("run.hcf")?;
//! let dest = Destination::file("compressed_run.hcf")?;
//! let done = transcode(&source, dest, &CodecConfig::default())?;
//! println!("saved {:.1}%", done.stats.reduction_ratio() * 100.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codec;
pub mod container;
pub mod error;
pub mod hdf5;
pub mod node;
pub mod path;
pub mod progress;
pub mod reader;
pub mod transcode;
pub mod types;
pub mod verify;
pub mod walker;
pub mod writer;

#[cfg(test)]
mod testing;

pub use codec::{CodecAdapter, CodecConfig, Compression, EncodedDataset};
pub use container::{
    compressed_file_name, create_destination, has_accepted_extension, open_source,
    output_path_for, Backing, ContainerFormat, DestinationTarget, ShellConfig, Source,
    SourceInput,
};
pub use error::{Error, ErrorKind, Result, TranscodeError};
pub use hdf5::{Hdf5Sink, Hdf5Source};
pub use node::{Finalized, NodeKind, ObjectId, ReadContainer, WriteContainer};
pub use path::NodePath;
pub use progress::{ProgressCallback, ProgressTick, Stats};
pub use reader::{Dataset, File, Group, Node, StorageInfo};
pub use transcode::{transcode, Transcoded, Transcoder};
pub use types::{Array, ArrayData, Attribute, DType};
pub use verify::{compare, Mismatch, MismatchKind};
pub use walker::{TreeWalker, WalkEntry};
pub use writer::{Destination, DestinationOutput, DestinationSink, Staging, Writer};

pub use hcf_io::StagedFile;
