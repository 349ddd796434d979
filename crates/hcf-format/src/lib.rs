//! Binary format structures for HCF hierarchical container files.
//!
//! An HCF file is a superblock followed by dataset storage and object
//! headers. Object headers are lists of typed messages; groups link to their
//! children by header address, datasets describe their element type, shape
//! and storage layout. Chunked datasets run every chunk through a filter
//! pipeline (shuffle, deflate).
//!
//! This crate parses and produces those structures. The logical node model
//! lives in the `hcf` crate.

pub mod attribute;
pub mod chunked_read;
pub mod chunked_write;
pub mod cursor;
pub mod data_layout;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod file_writer;
pub mod filter_pipeline;
pub mod filters;
pub mod link_message;
pub mod message_type;
pub mod object_header;
pub mod object_header_writer;
pub mod signature;
pub mod superblock;

pub use error::{FormatError, WriteError};
