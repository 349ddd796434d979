//! HDF5 files as sources and destinations of the recompressor.
//!
//! [`Hdf5File`] reads the parts of the format a recompression needs: all
//! superblock versions, version 1 and 2 object headers, old-style
//! (symbol table) and new-style (compact or dense) groups, compact and
//! dense attributes, and contiguous, compact and chunked datasets with
//! every chunk index the library writes.
//!
//! [`Hdf5Writer`] streams a new file: dataset storage goes out as soon as a
//! dataset is created, object headers and the superblock are written by
//! [`Hdf5Writer::finish`].

pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod chunks;
pub mod cursor;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod extensible_array;
pub mod file;
pub mod filters;
pub mod fixed_array;
pub mod fractal_heap;
pub mod global_heap;
pub mod layout;
pub mod local_heap;
pub mod messages;
pub mod object_header;
pub mod superblock;
pub mod writer;

pub use dataspace::Dataspace;
pub use datatype::{ByteOrder, CharSet, Datatype, StringPadding};
pub use error::Hdf5Error;
pub use file::{Attribute, DatasetInfo, Elements, Hdf5File, ObjectKind, StorageSummary};
pub use superblock::{is_hdf5, HDF5_SIGNATURE};
pub use writer::{ChunkedStorage, Hdf5Writer, Storage};

/// Convenience alias.
pub type Result<T> = std::result::Result<T, Hdf5Error>;

/// Address value meaning "not allocated".
pub const UNDEF_ADDR: u64 = u64::MAX;
