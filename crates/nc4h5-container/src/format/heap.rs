//! Global heap collections ("GCOL"), which hold variable-length strings,
//! sequences and reference lists.
//!
//! ```text
//! collection  "GCOL" | version 1 | reserved 3 | collection size u64
//! object      index u16 | refcount u16 | reserved 4 | size u64 | data, padded to 8
//! free space  index 0, size covering the rest of the collection
//! ```

use std::collections::HashMap;

use crate::error::{ContainerError, Result};
use crate::format::cursor::Cursor;

const GCOL: &[u8; 4] = b"GCOL";
const HEADER_LEN: usize = 16;
const OBJECT_HEADER_LEN: usize = 16;

/// Smallest collection the library allocates.
const MIN_COLLECTION: usize = 4096;

/// Collects heap objects and lays them out in collections starting at
/// `base`.
#[derive(Debug)]
pub(crate) struct HeapWriter {
    base: u64,
    sealed: Vec<u8>,
    current: Vec<Vec<u8>>,
}

impl HeapWriter {
    pub fn new(base: u64) -> Self {
        Self {
            base,
            sealed: Vec::new(),
            current: Vec::new(),
        }
    }

    /// Store `data`; returns the collection address and object index.
    pub fn push(&mut self, data: &[u8]) -> (u64, u32) {
        if self.current.len() == u16::MAX as usize {
            self.seal();
        }
        self.current.push(data.to_vec());
        (self.base + self.sealed.len() as u64, self.current.len() as u32)
    }

    fn seal(&mut self) {
        let objects = std::mem::take(&mut self.current);
        self.sealed.extend_from_slice(&collection(&objects));
    }

    /// All collections, back to back.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.current.is_empty() {
            self.seal();
        }
        self.sealed
    }
}

fn padded(len: usize) -> usize {
    len.div_ceil(8) * 8
}

fn collection(objects: &[Vec<u8>]) -> Vec<u8> {
    let body: usize = objects.iter().map(|o| OBJECT_HEADER_LEN + padded(o.len())).sum();
    let used = HEADER_LEN + body;
    let total = if used + OBJECT_HEADER_LEN <= MIN_COLLECTION {
        MIN_COLLECTION
    } else {
        used
    };
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(GCOL);
    out.extend_from_slice(&[1, 0, 0, 0]);
    out.extend_from_slice(&(total as u64).to_le_bytes());
    for (i, obj) in objects.iter().enumerate() {
        out.extend_from_slice(&((i + 1) as u16).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&(obj.len() as u64).to_le_bytes());
        out.extend_from_slice(obj);
        out.resize(out.len() + padded(obj.len()) - obj.len(), 0);
    }
    if total > used {
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&[0; 6]);
        out.extend_from_slice(&((total - used) as u64).to_le_bytes());
        out.resize(total, 0);
    }
    out
}

/// Parse the collection at `addr` into its objects by index.
pub(crate) fn read_collection(bytes: &[u8], addr: u64) -> Result<HashMap<u16, &[u8]>> {
    let mut cur = Cursor::at(bytes, addr, "global heap")?;
    if cur.take(4)? != GCOL {
        return Err(ContainerError::BadImage(format!("no global heap at {addr}")));
    }
    let version = cur.u8()?;
    if version != 1 {
        return Err(ContainerError::BadImage(format!("global heap version {version}")));
    }
    cur.skip(3)?;
    let size = cur.u64()? as usize;
    let end = (cur.pos() - HEADER_LEN).saturating_add(size);
    let mut objects = HashMap::new();
    while cur.pos() + OBJECT_HEADER_LEN <= end {
        let index = cur.u16()?;
        if index == 0 {
            break;
        }
        cur.skip(6)?;
        let len = cur.u64()? as usize;
        let data = cur.take(len)?;
        cur.skip(padded(len) - len)?;
        objects.insert(index, data);
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_are_indexed_from_one() {
        let mut heap = HeapWriter::new(100);
        assert_eq!(heap.push(b"abc"), (100, 1));
        assert_eq!(heap.push(b""), (100, 2));
        let bytes = heap.finish();
        assert_eq!(bytes.len(), MIN_COLLECTION);

        let mut file = vec![0u8; 100];
        file.extend_from_slice(&bytes);
        let objects = read_collection(&file, 100).unwrap();
        assert_eq!(objects[&1], b"abc");
        assert_eq!(objects[&2], b"");
    }

    #[test]
    fn large_objects_grow_the_collection() {
        let mut heap = HeapWriter::new(0);
        let big = vec![7u8; 5000];
        heap.push(&big);
        let bytes = heap.finish();
        assert_eq!(bytes.len(), HEADER_LEN + OBJECT_HEADER_LEN + 5000);
        assert_eq!(read_collection(&bytes, 0).unwrap()[&1].len(), 5000);
    }
}
