//! Files in the layout older libraries write: version 0 superblock, a
//! symbol-table root group, version 1 object headers, and chunks indexed
//! by a version 1 B-tree.

use hcf_filters::deflate_compress;
use hcf_hdf5::{CharSet, Datatype, Elements, Hdf5File, ObjectKind, StringPadding, HDF5_SIGNATURE};

const UNDEF: u64 = u64::MAX;

fn pad8(mut v: Vec<u8>) -> Vec<u8> {
    v.resize(v.len().div_ceil(8) * 8, 0);
    v
}

fn u64s(values: &[u64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Version 1 object header with 8-byte aligned messages.
fn header_v1(messages: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (kind, payload) in messages {
        let payload = pad8(payload.clone());
        body.extend_from_slice(&kind.to_le_bytes());
        body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        body.extend_from_slice(&[0; 4]);
        body.extend_from_slice(&payload);
    }
    let mut out = vec![1, 0];
    out.extend_from_slice(&(messages.len() as u16).to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend(body);
    out
}

fn superblock_v0(root: u64, eof: u64) -> Vec<u8> {
    let mut d = HDF5_SIGNATURE.to_vec();
    d.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
    d.extend_from_slice(&4u16.to_le_bytes());
    d.extend_from_slice(&16u16.to_le_bytes());
    d.extend_from_slice(&0u32.to_le_bytes());
    d.extend(u64s(&[0, UNDEF, eof, UNDEF, 0, root]));
    d.extend_from_slice(&[0; 24]);
    d
}

fn dataspace_v1(dims: &[u64]) -> Vec<u8> {
    let mut d = vec![1, dims.len() as u8, 0, 0, 0, 0, 0, 0];
    d.extend(u64s(dims));
    d
}

fn f64_type() -> Datatype {
    Datatype::Float {
        size: 8,
        order: hcf_hdf5::ByteOrder::Little,
    }
}

fn label_type() -> Datatype {
    Datatype::FixedString {
        size: 5,
        padding: StringPadding::NullTerminate,
        charset: CharSet::Ascii,
    }
}

/// Addresses of every block; each block's size does not depend on them.
#[derive(Default, Clone, Copy)]
struct Plan {
    root: u64,
    heap: u64,
    tree: u64,
    snod: u64,
    temps: u64,
    label: u64,
    chunk_tree: u64,
    chunks: u64,
    eof: u64,
}

fn blocks(p: Plan, chunks: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let root = header_v1(&[(0x11, u64s(&[p.tree, p.heap]))]);

    let segment = b"\0\0\0\0\0\0\0\0temps\0\0\0label\0\0\0";
    let mut heap = b"HEAP\0\0\0\0".to_vec();
    heap.extend(u64s(&[segment.len() as u64, UNDEF, p.heap + 32]));
    heap.extend_from_slice(segment);

    let mut tree = b"TREE".to_vec();
    tree.extend_from_slice(&[0, 0]);
    tree.extend_from_slice(&1u16.to_le_bytes());
    tree.extend(u64s(&[UNDEF, UNDEF, 0, p.snod, 16]));

    let mut snod = b"SNOD".to_vec();
    snod.extend_from_slice(&[1, 0]);
    snod.extend_from_slice(&2u16.to_le_bytes());
    for (name_offset, object) in [(16, p.label), (8, p.temps)] {
        snod.extend(u64s(&[name_offset, object]));
        snod.extend_from_slice(&[0; 24]);
    }

    let mut layout = vec![3, 2, 2];
    layout.extend(u64s(&[p.chunk_tree]));
    layout.extend_from_slice(&4u32.to_le_bytes());
    layout.extend_from_slice(&8u32.to_le_bytes());
    let mut pipeline = vec![1, 1, 0, 0, 0, 0, 0, 0];
    for v in [1u16, 0, 0, 1] {
        pipeline.extend_from_slice(&v.to_le_bytes());
    }
    pipeline.extend_from_slice(&6u32.to_le_bytes());
    pipeline.extend_from_slice(&[0; 4]);
    let temps = header_v1(&[
        (0x01, dataspace_v1(&[8])),
        (0x03, f64_type().encode()),
        (0x08, layout),
        (0x0B, pipeline),
    ]);

    let mut compact = vec![3, 0];
    compact.extend_from_slice(&5u16.to_le_bytes());
    compact.extend_from_slice(b"hello");
    let unit_type = Datatype::FixedString {
        size: 1,
        padding: StringPadding::NullTerminate,
        charset: CharSet::Ascii,
    }
    .encode();
    let mut attribute = vec![1, 0];
    for len in [6u16, unit_type.len() as u16, 8] {
        attribute.extend_from_slice(&len.to_le_bytes());
    }
    attribute.extend(pad8(b"units\0".to_vec()));
    attribute.extend(pad8(unit_type));
    attribute.extend(dataspace_v1(&[]));
    attribute.push(b'K');
    let label = header_v1(&[
        (0x01, dataspace_v1(&[])),
        (0x03, label_type().encode()),
        (0x08, compact),
        (0x0C, attribute),
    ]);

    let mut chunk_tree = b"TREE".to_vec();
    chunk_tree.extend_from_slice(&[1, 0]);
    chunk_tree.extend_from_slice(&2u16.to_le_bytes());
    chunk_tree.extend(u64s(&[UNDEF, UNDEF]));
    let mut at = p.chunks;
    for (i, chunk) in chunks.iter().enumerate() {
        chunk_tree.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        chunk_tree.extend_from_slice(&0u32.to_le_bytes());
        chunk_tree.extend(u64s(&[i as u64 * 4, 0, at]));
        at += chunk.len() as u64;
    }
    chunk_tree.extend_from_slice(&[0; 8]);
    chunk_tree.extend(u64s(&[8, 0]));

    let mut out = vec![superblock_v0(p.root, p.eof), root, heap, tree, snod, temps, label, chunk_tree];
    out.extend(chunks.iter().cloned());
    out
}

fn legacy_file() -> Vec<u8> {
    let values: Vec<f64> = (0..8).map(|i| i as f64 * 1.5).collect();
    let chunks: Vec<Vec<u8>> = values
        .chunks(4)
        .map(|c| {
            let raw: Vec<u8> = c.iter().flat_map(|v| v.to_le_bytes()).collect();
            deflate_compress(&raw, 6).unwrap()
        })
        .collect();

    let sizes: Vec<u64> = blocks(Plan::default(), &chunks)
        .iter()
        .map(|b| b.len() as u64)
        .collect();
    let mut starts = vec![0u64];
    for s in &sizes {
        starts.push(starts.last().unwrap() + s);
    }
    let plan = Plan {
        root: starts[1],
        heap: starts[2],
        tree: starts[3],
        snod: starts[4],
        temps: starts[5],
        label: starts[6],
        chunk_tree: starts[7],
        chunks: starts[8],
        eof: *starts.last().unwrap(),
    };
    blocks(plan, &chunks).concat()
}

#[test]
fn symbol_table_group_and_v1_chunk_tree() {
    let file = Hdf5File::open(legacy_file()).unwrap();
    assert_eq!(file.superblock().version, 0);
    let children = file.children(file.root()).unwrap();
    let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["label", "temps"]);

    let temps = children[1].1;
    assert_eq!(file.kind(temps).unwrap(), ObjectKind::Dataset);
    let info = file.dataset(temps).unwrap();
    assert_eq!(info.chunk, Some(vec![4]));
    assert_eq!(info.filters, vec![1]);
    let expected: Vec<u8> = (0..8)
        .flat_map(|i| (i as f64 * 1.5).to_le_bytes())
        .collect();
    assert_eq!(file.read(temps).unwrap(), Elements::Fixed(expected));
    assert_eq!(file.storage(temps).unwrap().chunks, 2);
}

#[test]
fn compact_scalar_with_a_version_1_attribute() {
    let file = Hdf5File::open(legacy_file()).unwrap();
    let label = file.children(file.root()).unwrap()[0].1;
    assert_eq!(file.dataset(label).unwrap().datatype, label_type());
    assert_eq!(file.read(label).unwrap(), Elements::Fixed(b"hello".to_vec()));
    let attrs = file.attributes(label).unwrap();
    assert_eq!(attrs.len(), 1);
    assert_eq!(attrs[0].name, "units");
    assert_eq!(attrs[0].value, Elements::Fixed(b"K".to_vec()));
}

#[test]
fn truncated_file_is_an_error() {
    let mut bytes = legacy_file();
    bytes.truncate(bytes.len() - 10);
    let file = Hdf5File::open(bytes).unwrap();
    let temps = file.children(file.root()).unwrap()[1].1;
    assert!(file.read(temps).is_err());
}
