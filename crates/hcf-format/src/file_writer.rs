//! Streaming HCF file writer.
//!
//! Dataset storage is written to the sink as soon as a dataset is added;
//! only node metadata (names, types, layouts, attributes) is kept in memory.
//! [`FileWriter::finish`] writes the object headers children-first, then
//! overwrites the zeroed superblock placeholder at offset 0. Until then the
//! sink never holds a readable file.
//!
//! Paths are `/`-joined names without a leading slash; the root is `""`.

use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};

use crate::attribute::AttributeMessage;
use crate::chunked_write::EncodedChunk;
use crate::data_layout::{serialize_chunk_index, ChunkEntry, DataLayout};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::WriteError;
use crate::filter_pipeline::FilterPipeline;
use crate::link_message::{LinkInfo, LinkMessage};
use crate::message_type::MessageType;
use crate::object_header_writer::ObjectHeaderWriter;
use crate::superblock::{Superblock, SUPERBLOCK_SIZE};

#[derive(Debug)]
enum PendingKind {
    Group {
        children: Vec<usize>,
    },
    Dataset {
        datatype: Datatype,
        dataspace: Dataspace,
        layout: DataLayout,
        pipeline: Option<FilterPipeline>,
    },
}

#[derive(Debug)]
struct PendingNode {
    name: String,
    kind: PendingKind,
    attributes: Vec<AttributeMessage>,
}

/// Writes an HCF file into any seekable sink.
#[derive(Debug)]
pub struct FileWriter<W: Write + Seek> {
    sink: W,
    pos: u64,
    nodes: Vec<PendingNode>,
    paths: HashMap<String, usize>,
}

impl<W: Write + Seek> FileWriter<W> {
    /// Start a new file at offset 0 of `sink`.
    pub fn new(mut sink: W) -> Result<Self, WriteError> {
        sink.seek(SeekFrom::Start(0))?;
        sink.write_all(&[0u8; SUPERBLOCK_SIZE])?;
        let root = PendingNode {
            name: String::new(),
            kind: PendingKind::Group { children: Vec::new() },
            attributes: Vec::new(),
        };
        let mut paths = HashMap::new();
        paths.insert(String::new(), 0);
        Ok(Self {
            sink,
            pos: SUPERBLOCK_SIZE as u64,
            nodes: vec![root],
            paths,
        })
    }

    /// Bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.pos
    }

    /// Borrow the sink. Its contents are not a valid file before `finish`.
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Whether a node exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    /// Check that `path` is free and its parent is a group; return the parent
    /// index and the leaf name.
    fn resolve_new(&self, path: &str) -> Result<(usize, String), WriteError> {
        if path.is_empty() || path.split('/').any(str::is_empty) {
            return Err(WriteError::InvalidName(path.to_string()));
        }
        if self.paths.contains_key(path) {
            return Err(WriteError::DuplicatePath(path.to_string()));
        }
        let (parent, name) = match path.rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", path),
        };
        let &parent_idx = self
            .paths
            .get(parent)
            .ok_or_else(|| WriteError::NodeNotFound(parent.to_string()))?;
        if !matches!(self.nodes[parent_idx].kind, PendingKind::Group { .. }) {
            return Err(WriteError::ParentNotGroup(parent.to_string()));
        }
        Ok((parent_idx, name.to_string()))
    }

    fn insert(&mut self, path: &str, parent: usize, node: PendingNode) {
        let idx = self.nodes.len();
        self.nodes.push(node);
        if let PendingKind::Group { children } = &mut self.nodes[parent].kind {
            children.push(idx);
        }
        self.paths.insert(path.to_string(), idx);
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64, WriteError> {
        let address = self.pos;
        self.sink.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(address)
    }

    /// Add an empty group.
    pub fn create_group(&mut self, path: &str) -> Result<(), WriteError> {
        let (parent, name) = self.resolve_new(path)?;
        self.insert(
            path,
            parent,
            PendingNode {
                name,
                kind: PendingKind::Group { children: Vec::new() },
                attributes: Vec::new(),
            },
        );
        Ok(())
    }

    /// Add a dataset stored as one unfiltered run of bytes.
    pub fn write_contiguous_dataset(
        &mut self,
        path: &str,
        datatype: Datatype,
        dataspace: Dataspace,
        raw: &[u8],
    ) -> Result<(), WriteError> {
        let (parent, name) = self.resolve_new(path)?;
        let address = self.append(raw)?;
        let layout = DataLayout::Contiguous {
            address,
            size: raw.len() as u64,
        };
        self.insert(
            path,
            parent,
            PendingNode {
                name,
                kind: PendingKind::Dataset {
                    datatype,
                    dataspace,
                    layout,
                    pipeline: None,
                },
                attributes: Vec::new(),
            },
        );
        Ok(())
    }

    /// Add a chunked dataset from already filtered chunks.
    ///
    /// Chunks must be in element order and cover every element exactly once.
    pub fn write_chunked_dataset(
        &mut self,
        path: &str,
        datatype: Datatype,
        dataspace: Dataspace,
        chunk_dims: Vec<u64>,
        pipeline: FilterPipeline,
        chunks: Vec<EncodedChunk>,
    ) -> Result<(), WriteError> {
        let (parent, name) = self.resolve_new(path)?;
        if chunk_dims.len() != dataspace.rank() {
            return Err(WriteError::InvalidChunks(format!(
                "chunk rank {} does not match dataspace rank {}",
                chunk_dims.len(),
                dataspace.rank()
            )));
        }
        let total = dataspace
            .num_elements()
            .ok_or_else(|| WriteError::InvalidChunks("element count overflows u64".into()))?;
        let mut next = 0u64;
        for c in &chunks {
            if c.start_element != next || c.element_count == 0 {
                return Err(WriteError::InvalidChunks(format!(
                    "chunk at element {} does not follow element {next}",
                    c.start_element
                )));
            }
            next += c.element_count;
        }
        if next != total {
            return Err(WriteError::InvalidChunks(format!(
                "chunks cover {next} of {total} elements"
            )));
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for c in &chunks {
            let address = self.append(&c.data)?;
            entries.push(ChunkEntry {
                start_element: c.start_element,
                element_count: c.element_count,
                address,
                stored_size: c.data.len() as u64,
                raw_size: c.raw_size,
                filter_mask: c.filter_mask,
            });
        }
        let index_address = self.append(&serialize_chunk_index(&entries))?;
        let layout = DataLayout::Chunked {
            chunk_dims,
            index_address,
            chunk_count: entries.len() as u64,
        };
        self.insert(
            path,
            parent,
            PendingNode {
                name,
                kind: PendingKind::Dataset {
                    datatype,
                    dataspace,
                    layout,
                    pipeline: (!pipeline.is_empty()).then_some(pipeline),
                },
                attributes: Vec::new(),
            },
        );
        Ok(())
    }

    /// Attach an attribute to an existing node. `""` is the root group.
    pub fn set_attribute(&mut self, path: &str, attr: AttributeMessage) -> Result<(), WriteError> {
        let &idx = self
            .paths
            .get(path)
            .ok_or_else(|| WriteError::NodeNotFound(path.to_string()))?;
        let node = &mut self.nodes[idx];
        if node.attributes.iter().any(|a| a.name == attr.name) {
            return Err(WriteError::DuplicateAttribute {
                path: path.to_string(),
                name: attr.name,
            });
        }
        node.attributes.push(attr);
        Ok(())
    }

    fn header_for(&self, idx: usize, addresses: &[u64]) -> ObjectHeaderWriter {
        let node = &self.nodes[idx];
        let mut oh = ObjectHeaderWriter::new();
        match &node.kind {
            PendingKind::Group { children } => {
                let info = LinkInfo {
                    child_count: children.len() as u64,
                };
                oh.add_message(MessageType::LinkInfo, info.serialize());
                for &child in children {
                    let link = LinkMessage {
                        name: self.nodes[child].name.clone(),
                        address: addresses[child],
                    };
                    oh.add_message(MessageType::Link, link.serialize());
                }
            }
            PendingKind::Dataset {
                datatype,
                dataspace,
                layout,
                pipeline,
            } => {
                oh.add_message(MessageType::Datatype, datatype.serialize());
                oh.add_message(MessageType::Dataspace, dataspace.serialize());
                oh.add_message(MessageType::DataLayout, layout.serialize());
                if let Some(p) = pipeline {
                    oh.add_message(MessageType::FilterPipeline, p.serialize());
                }
            }
        }
        for attr in &node.attributes {
            oh.add_message(MessageType::Attribute, attr.serialize());
        }
        oh
    }

    /// Write all object headers and the superblock.
    ///
    /// Returns the sink and the final file size.
    pub fn finish(mut self) -> Result<(W, u64), WriteError> {
        // Nodes are only ever added under existing groups, so every child has
        // a larger index than its parent; reverse order is children-first.
        let mut addresses = vec![0u64; self.nodes.len()];
        for idx in (0..self.nodes.len()).rev() {
            let header = self.header_for(idx, &addresses).serialize();
            addresses[idx] = self.append(&header)?;
        }

        let eof = self.pos;
        let superblock = Superblock::new(addresses[0], eof, self.nodes.len() as u64);
        self.sink.seek(SeekFrom::Start(0))?;
        self.sink.write_all(&superblock.serialize())?;
        self.sink.seek(SeekFrom::Start(eof))?;
        self.sink.flush()?;
        Ok((self.sink, eof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked_write::{encode_chunks, ChunkPlan, RawChunk};
    use crate::error::FormatError;
    use crate::object_header::ObjectHeader;
    use std::io::Cursor;

    fn f64_attr(name: &str, v: f64) -> AttributeMessage {
        AttributeMessage {
            name: name.into(),
            datatype: Datatype::FloatingPoint { size: 8 },
            dataspace: Dataspace::scalar(),
            raw_data: v.to_le_bytes().to_vec(),
        }
    }

    fn links(data: &[u8], address: u64) -> Vec<LinkMessage> {
        let oh = ObjectHeader::parse(data, address).unwrap();
        oh.find_all(MessageType::Link)
            .map(|m| LinkMessage::parse(&m.data).unwrap())
            .collect()
    }

    #[test]
    fn empty_file() {
        let w = FileWriter::new(Cursor::new(Vec::new())).unwrap();
        let (sink, eof) = w.finish().unwrap();
        let data = sink.into_inner();
        assert_eq!(data.len() as u64, eof);
        let sb = Superblock::parse(&data).unwrap();
        assert_eq!(sb.object_count, 1);
        assert!(links(&data, sb.root_group_address).is_empty());
    }

    #[test]
    fn unfinished_sink_is_not_a_file() {
        let mut w = FileWriter::new(Cursor::new(Vec::new())).unwrap();
        w.create_group("g").unwrap();
        w.write_contiguous_dataset("g/d", Datatype::Boolean, Dataspace::simple(&[2]), &[1, 0])
            .unwrap();
        let partial = w.get_ref().get_ref();
        assert_eq!(Superblock::parse(partial), Err(FormatError::NotFinalized));
    }

    #[test]
    fn groups_datasets_and_attributes() {
        let mut w = FileWriter::new(Cursor::new(Vec::new())).unwrap();
        w.set_attribute("", f64_attr("version", 2.0)).unwrap();
        w.create_group("b").unwrap();
        w.create_group("a").unwrap();
        let raw: Vec<u8> = (0..6i32).flat_map(|v| v.to_le_bytes()).collect();
        w.write_contiguous_dataset(
            "a/x",
            Datatype::FixedPoint { size: 4, signed: true },
            Dataspace::simple(&[2, 3]),
            &raw,
        )
        .unwrap();
        w.set_attribute("a/x", f64_attr("scale", 0.5)).unwrap();
        let (sink, _) = w.finish().unwrap();
        let data = sink.into_inner();

        let sb = Superblock::parse(&data).unwrap();
        assert_eq!(sb.object_count, 4);
        let root_links = links(&data, sb.root_group_address);
        let names: Vec<&str> = root_links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);

        let root = ObjectHeader::parse(&data, sb.root_group_address).unwrap();
        assert_eq!(root.find_all(MessageType::Attribute).count(), 1);

        let a_links = links(&data, root_links[1].address);
        assert_eq!(a_links.len(), 1);
        let x = ObjectHeader::parse(&data, a_links[0].address).unwrap();
        let layout =
            DataLayout::parse(x.require(MessageType::DataLayout, "layout").unwrap()).unwrap();
        match layout {
            DataLayout::Contiguous { address, size } => {
                assert_eq!(&data[address as usize..(address + size) as usize], &raw[..]);
            }
            other => panic!("expected contiguous, got {other:?}"),
        }
        assert!(!x.has(MessageType::FilterPipeline));
    }

    #[test]
    fn chunked_dataset_writes_index_and_pipeline() {
        let mut w = FileWriter::new(Cursor::new(Vec::new())).unwrap();
        let plan = ChunkPlan::with_target(&[10], 8.0, 32);
        let raw: Vec<u8> = (0..10u64).flat_map(|v| v.to_le_bytes()).collect();
        let chunks: Vec<RawChunk> = plan
            .ranges()
            .into_iter()
            .map(|(start, count)| RawChunk {
                start_element: start,
                element_count: count,
                data: raw[start as usize * 8..(start + count) as usize * 8].to_vec(),
            })
            .collect();
        let pipeline = FilterPipeline {
            filters: vec![FilterPipeline::shuffle(8), FilterPipeline::deflate(9)],
        };
        let encoded = encode_chunks(chunks, &pipeline, false).unwrap();
        w.write_chunked_dataset(
            "d",
            Datatype::FixedPoint { size: 8, signed: false },
            Dataspace::simple(&[10]),
            plan.chunk_dims(),
            pipeline.clone(),
            encoded,
        )
        .unwrap();
        let (sink, _) = w.finish().unwrap();
        let data = sink.into_inner();
        let sb = Superblock::parse(&data).unwrap();
        let d = links(&data, sb.root_group_address)[0].address;
        let oh = ObjectHeader::parse(&data, d).unwrap();
        let stored =
            FilterPipeline::parse(oh.require(MessageType::FilterPipeline, "pipeline").unwrap())
                .unwrap();
        assert_eq!(stored, pipeline);
        let layout =
            DataLayout::parse(oh.require(MessageType::DataLayout, "layout").unwrap()).unwrap();
        let back = crate::chunked_read::read_raw_data(&data, &layout, Some(&stored), 10, Some(8))
            .unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn chunks_must_tile() {
        let mut w = FileWriter::new(Cursor::new(Vec::new())).unwrap();
        let chunk = EncodedChunk {
            start_element: 0,
            element_count: 2,
            raw_size: 2,
            filter_mask: 0,
            data: vec![1, 2],
        };
        let err = w
            .write_chunked_dataset(
                "d",
                Datatype::Boolean,
                Dataspace::simple(&[3]),
                vec![2],
                FilterPipeline::default(),
                vec![chunk],
            )
            .unwrap_err();
        assert!(matches!(err, WriteError::InvalidChunks(_)));
        assert!(!w.contains("d"));
    }

    #[test]
    fn path_errors() {
        let mut w = FileWriter::new(Cursor::new(Vec::new())).unwrap();
        w.create_group("g").unwrap();
        w.write_contiguous_dataset("g/d", Datatype::Boolean, Dataspace::scalar(), &[1])
            .unwrap();

        assert!(matches!(w.create_group("g"), Err(WriteError::DuplicatePath(_))));
        assert!(matches!(w.create_group("x/y"), Err(WriteError::NodeNotFound(_))));
        assert!(matches!(w.create_group("g/d/e"), Err(WriteError::ParentNotGroup(_))));
        assert!(matches!(w.create_group("a//b"), Err(WriteError::InvalidName(_))));
        assert!(matches!(w.create_group(""), Err(WriteError::InvalidName(_))));
        assert!(matches!(
            w.set_attribute("nope", f64_attr("k", 1.0)),
            Err(WriteError::NodeNotFound(_))
        ));
        w.set_attribute("g/d", f64_attr("k", 1.0)).unwrap();
        assert!(matches!(
            w.set_attribute("g/d", f64_attr("k", 2.0)),
            Err(WriteError::DuplicateAttribute { .. })
        ));
        assert!(w.contains("g/d"));
        assert!(!w.contains("zzz"));
    }
}
