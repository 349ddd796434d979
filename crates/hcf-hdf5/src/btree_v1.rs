//! Version 1 B-trees: group nodes (type 0) and raw data chunks (type 1).

use std::collections::HashSet;

use crate::chunks::ChunkRecord;
use crate::cursor::FileView;
use crate::error::Hdf5Error;

const GROUP_NODE: u8 = 0;
const CHUNK_NODE: u8 = 1;

/// Deepest tree followed; real files stay in single digits.
const MAX_LEVEL: u8 = 64;

struct Node {
    level: u8,
    /// Keys as raw byte slices, `entries + 1` of them.
    keys: Vec<usize>,
    children: Vec<u64>,
}

fn read_node(
    view: &FileView<'_>,
    address: u64,
    kind: u8,
    key_len: usize,
) -> Result<Node, Hdf5Error> {
    let mut c = view.at(address)?;
    c.magic(b"TREE", "v1 B-tree node")?;
    let node_type = c.u8()?;
    if node_type != kind {
        return Err(Hdf5Error::corrupt(format!(
            "B-tree node type {node_type}, expected {kind}"
        )));
    }
    let level = c.u8()?;
    let entries = c.u16()? as usize;
    c.address()?; // left sibling
    c.address()?; // right sibling
    let mut keys = Vec::with_capacity(entries + 1);
    let mut children = Vec::with_capacity(entries);
    for _ in 0..entries {
        keys.push(c.position());
        c.skip(key_len)?;
        children.push(c.address()?);
    }
    keys.push(c.position());
    c.skip(key_len)?;
    Ok(Node {
        level,
        keys,
        children,
    })
}

/// Walk a tree depth first, handing each leaf entry (key position, child
/// address) to `visit`.
fn walk(
    view: &FileView<'_>,
    root: u64,
    kind: u8,
    key_len: usize,
    visit: &mut dyn FnMut(usize, u64) -> Result<(), Hdf5Error>,
) -> Result<(), Hdf5Error> {
    let mut seen = HashSet::new();
    let mut stack = vec![(root, None::<u8>)];
    while let Some((address, expected_level)) = stack.pop() {
        if !seen.insert(address) {
            return Err(Hdf5Error::corrupt(format!(
                "B-tree node {address:#x} reached twice"
            )));
        }
        let node = read_node(view, address, kind, key_len)?;
        if node.level > MAX_LEVEL || expected_level.is_some_and(|l| l != node.level) {
            return Err(Hdf5Error::corrupt(format!(
                "B-tree node {address:#x} at level {}",
                node.level
            )));
        }
        if node.level == 0 {
            for (&key, &child) in node.keys.iter().zip(&node.children) {
                visit(key, child)?;
            }
        } else {
            // Reversed so children come off the stack left to right.
            for &child in node.children.iter().rev() {
                stack.push((child, Some(node.level - 1)));
            }
        }
    }
    Ok(())
}

/// Addresses of the symbol table nodes of an old-style group, in order.
pub fn group_nodes(view: &FileView<'_>, root: u64) -> Result<Vec<u64>, Hdf5Error> {
    let mut out = Vec::new();
    walk(view, root, GROUP_NODE, view.sizes.length as usize, &mut |_, child| {
        out.push(child);
        Ok(())
    })?;
    Ok(out)
}

/// Every chunk of a dataset of rank `rank`.
pub fn chunk_records(
    view: &FileView<'_>,
    root: u64,
    rank: usize,
) -> Result<Vec<ChunkRecord>, Hdf5Error> {
    // size, filter mask, then one offset per dimension plus the element one
    let key_len = 8 + (rank + 1) * 8;
    let mut out = Vec::new();
    walk(view, root, CHUNK_NODE, key_len, &mut |key, child| {
        let mut c = crate::cursor::Cursor::new(view.data, key, view.sizes);
        let size = u64::from(c.u32()?);
        let mask = c.u32()?;
        let offsets = (0..rank).map(|_| c.u64()).collect::<Result<Vec<_>, _>>()?;
        out.push(ChunkRecord {
            offsets,
            address: child,
            size,
            mask,
        });
        Ok(())
    })?;
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cursor::Sizes;
    use crate::UNDEF_ADDR;

    /// A leaf chunk node for a 1-D dataset.
    pub(crate) fn chunk_leaf(entries: &[(u32, u64, u64)], end: u64) -> Vec<u8> {
        let mut d = b"TREE".to_vec();
        d.extend_from_slice(&[CHUNK_NODE, 0]);
        d.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        d.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        d.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        let key = |d: &mut Vec<u8>, size: u32, offset: u64| {
            d.extend_from_slice(&size.to_le_bytes());
            d.extend_from_slice(&0u32.to_le_bytes());
            d.extend_from_slice(&offset.to_le_bytes());
            d.extend_from_slice(&0u64.to_le_bytes());
        };
        for &(size, offset, addr) in entries {
            key(&mut d, size, offset);
            d.extend_from_slice(&addr.to_le_bytes());
        }
        key(&mut d, 0, end);
        d
    }

    #[test]
    fn leaf_chunks() {
        let node = chunk_leaf(&[(40, 0, 1000), (40, 10, 2000)], 20);
        let view = FileView::new(&node, 0, Sizes::WIDE);
        let chunks = chunk_records(&view, 0, 1).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].offsets, vec![10]);
        assert_eq!(chunks[1].address, 2000);
        assert_eq!(chunks[1].size, 40);
    }

    #[test]
    fn internal_node_is_followed() {
        let mut file = vec![0u8; 8];
        let leaf_at = 200u64;
        // Internal node at 8 with one child.
        let mut inner = b"TREE".to_vec();
        inner.extend_from_slice(&[CHUNK_NODE, 1]);
        inner.extend_from_slice(&1u16.to_le_bytes());
        inner.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        inner.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        inner.extend_from_slice(&[0; 24]);
        inner.extend_from_slice(&leaf_at.to_le_bytes());
        inner.extend_from_slice(&[0; 24]);
        file.extend(inner);
        file.resize(leaf_at as usize, 0);
        file.extend(chunk_leaf(&[(16, 0, 4000)], 4));
        let view = FileView::new(&file, 0, Sizes::WIDE);
        let chunks = chunk_records(&view, 8, 1).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].address, 4000);
    }

    #[test]
    fn self_reference_is_an_error() {
        let mut node = b"TREE".to_vec();
        node.extend_from_slice(&[CHUNK_NODE, 1]);
        node.extend_from_slice(&1u16.to_le_bytes());
        node.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        node.extend_from_slice(&UNDEF_ADDR.to_le_bytes());
        node.extend_from_slice(&[0; 24]);
        node.extend_from_slice(&0u64.to_le_bytes());
        node.extend_from_slice(&[0; 24]);
        let view = FileView::new(&node, 0, Sizes::WIDE);
        assert!(chunk_records(&view, 0, 1).is_err());
    }

    #[test]
    fn wrong_signature() {
        let data = [0u8; 64];
        let view = FileView::new(&data, 0, Sizes::WIDE);
        assert!(matches!(
            group_nodes(&view, 0),
            Err(Hdf5Error::BadSignature { .. })
        ));
    }
}
