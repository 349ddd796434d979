//! Global heap collections: the bytes of variable-length strings.

use std::collections::HashMap;

use crate::cursor::{pad8, Cursor, FileView};
use crate::datatype::{read_vlen_ref, write_vlen_ref};
use crate::error::Hdf5Error;

/// Smallest collection the library writes.
const MIN_COLLECTION: usize = 4096;
/// Collection header with 8-byte lengths.
const COLLECTION_HEADER: usize = 16;
/// Object header with 8-byte lengths.
const OBJECT_HEADER: usize = 16;

/// Objects of one collection by index.
type Collection<'a> = HashMap<u16, &'a [u8]>;

/// Reads heap objects, parsing each collection once.
#[derive(Debug)]
pub struct GlobalHeap<'a> {
    view: FileView<'a>,
    collections: HashMap<u64, Collection<'a>>,
}

impl<'a> GlobalHeap<'a> {
    pub fn new(view: FileView<'a>) -> Self {
        GlobalHeap {
            view,
            collections: HashMap::new(),
        }
    }

    fn collection(&mut self, address: u64) -> Result<&Collection<'a>, Hdf5Error> {
        if !self.collections.contains_key(&address) {
            let parsed = parse_collection(&self.view, address)?;
            self.collections.insert(address, parsed);
        }
        self.collections
            .get(&address)
            .ok_or_else(|| Hdf5Error::corrupt("global heap collection vanished"))
    }

    /// Object `index` of the collection at `address`.
    pub fn object(&mut self, address: u64, index: u32) -> Result<&'a [u8], Hdf5Error> {
        let index16 = u16::try_from(index)
            .map_err(|_| Hdf5Error::corrupt(format!("global heap index {index}")))?;
        self.collection(address)?
            .get(&index16)
            .copied()
            .ok_or_else(|| {
                Hdf5Error::corrupt(format!(
                    "global heap collection {address:#x} has no object {index}"
                ))
            })
    }

    /// Resolve packed variable-length string elements to their bytes.
    pub fn strings(&mut self, raw: &[u8]) -> Result<Vec<Vec<u8>>, Hdf5Error> {
        let sizes = self.view.sizes;
        let width = 8 + sizes.offset as usize;
        if raw.len() % width != 0 {
            return Err(Hdf5Error::corrupt(format!(
                "{} bytes of string references",
                raw.len()
            )));
        }
        raw.chunks_exact(width)
            .map(|elem| {
                let (len, address, index) = read_vlen_ref(elem, sizes)?;
                if len == 0 {
                    return Ok(Vec::new());
                }
                let object = self.object(address, index)?;
                object
                    .get(..len as usize)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| {
                        Hdf5Error::corrupt(format!(
                            "string of {len} bytes in a heap object of {}",
                            object.len()
                        ))
                    })
            })
            .collect()
    }
}

fn parse_collection<'a>(view: &FileView<'a>, address: u64) -> Result<Collection<'a>, Hdf5Error> {
    let start = view.pos(address)?;
    let mut c = Cursor::new(view.data, start, view.sizes);
    c.magic(b"GCOL", "global heap collection")?;
    let version = c.u8()?;
    if version != 1 {
        return Err(Hdf5Error::UnsupportedVersion {
            what: "global heap collection",
            version,
        });
    }
    c.skip(3)?;
    let size = usize::try_from(c.length()?)
        .map_err(|_| Hdf5Error::corrupt("global heap collection size"))?;
    let end = start
        .checked_add(size)
        .filter(|&e| e <= view.data.len())
        .ok_or_else(|| Hdf5Error::corrupt(format!("global heap collection at {address:#x}")))?;
    let object_header = 8 + view.sizes.length as usize;

    let mut objects = HashMap::new();
    while c.position() + object_header <= end {
        let at = c.position();
        let index = c.u16()?;
        c.skip(6)?; // reference count, reserved
        let len = usize::try_from(c.length()?)
            .map_err(|_| Hdf5Error::corrupt("global heap object size"))?;
        if index == 0 {
            // Free space runs to the end of the collection.
            break;
        }
        let data = c.bytes(len)?;
        if c.position() > end {
            return Err(Hdf5Error::corrupt(format!(
                "global heap object {index} at {at:#x} runs past its collection"
            )));
        }
        objects.insert(index, data);
        if c.skip(pad8(len) - len).is_err() {
            break;
        }
    }
    Ok(objects)
}

/// Lay out `strings` as global heap collections starting at file address
/// `at`. Returns the collection bytes and the packed element references,
/// 16 bytes per string. Empty strings get no heap object.
pub fn encode_strings(at: u64, strings: &[&[u8]]) -> (Vec<u8>, Vec<u8>) {
    let mut heap = Vec::new();
    let mut refs = Vec::with_capacity(strings.len() * 16);
    let mut open: Option<(usize, u16)> = None; // collection start, last index

    for s in strings {
        if s.is_empty() {
            write_vlen_ref(&mut refs, 0, 0, 0);
            continue;
        }
        let (start, index) = match open {
            Some((start, index)) if index < u16::MAX => (start, index + 1),
            _ => {
                if let Some((start, _)) = open {
                    close_collection(&mut heap, start);
                }
                let start = heap.len();
                heap.extend_from_slice(b"GCOL");
                heap.extend_from_slice(&[1, 0, 0, 0]);
                heap.extend_from_slice(&0u64.to_le_bytes());
                (start, 1)
            }
        };
        open = Some((start, index));
        heap.extend_from_slice(&index.to_le_bytes());
        heap.extend_from_slice(&1u16.to_le_bytes());
        heap.extend_from_slice(&[0; 4]);
        heap.extend_from_slice(&(s.len() as u64).to_le_bytes());
        heap.extend_from_slice(s);
        heap.resize(heap.len() + pad8(s.len()) - s.len(), 0);
        write_vlen_ref(&mut refs, s.len() as u32, at + start as u64, u32::from(index));
    }
    if let Some((start, _)) = open {
        close_collection(&mut heap, start);
    }
    (heap, refs)
}

/// Append the free-space object and fill in the collection size.
fn close_collection(heap: &mut Vec<u8>, start: usize) {
    let used = heap.len() - start;
    let size = (used + OBJECT_HEADER).max(MIN_COLLECTION);
    let free = size - used;
    heap.extend_from_slice(&0u16.to_le_bytes());
    heap.extend_from_slice(&[0; 6]);
    heap.extend_from_slice(&(free as u64).to_le_bytes());
    heap.resize(start + size, 0);
    heap[start + 8..start + COLLECTION_HEADER].copy_from_slice(&(size as u64).to_le_bytes());
}
